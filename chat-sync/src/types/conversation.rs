//! Conversation summary types
//!
//! These are derived views owned by the conversation index. They reference
//! messages by client id and never hold a `Message` themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageStatus};

/// Summary of the latest message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessageSummary {
    pub client_id: String,
    pub preview: String,
    pub sender_id: String,
    pub is_own: bool,
    pub status: MessageStatus,
}

impl LastMessageSummary {
    /// Build a summary, truncating the preview to `preview_chars` characters.
    pub fn from_message(message: &Message, preview_chars: usize) -> Self {
        let preview = if message.content.chars().count() > preview_chars {
            let mut truncated: String = message.content.chars().take(preview_chars).collect();
            truncated.push_str("...");
            truncated
        } else {
            message.content.clone()
        };

        Self {
            client_id: message.client_id.clone(),
            preview,
            sender_id: message.sender_id.clone(),
            is_own: message.is_own,
            status: message.status,
        }
    }

    /// Whether the latest message failed to send
    pub fn is_failed(&self) -> bool {
        self.status == MessageStatus::Error
    }
}

/// Per-conversation summary kept by the conversation index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: Option<String>,
    pub participant_ids: Vec<String>,
    pub last_message_summary: Option<LastMessageSummary>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub has_new_message: bool,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl ConversationSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            participant_ids: Vec::new(),
            last_message_summary: None,
            last_activity_at: None,
            unread_count: 0,
            has_new_message: false,
            last_read_at: None,
        }
    }

    /// The participant that is not `user_id`, for private conversations.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        self.participant_ids
            .iter()
            .map(String::as_str)
            .find(|p| *p != user_id)
    }
}

/// A partial update for a conversation summary
///
/// `None` means "leave as is". The `Option<Option<_>>` fields allow clearing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub name: Option<Option<String>>,
    pub participant_ids: Option<Vec<String>>,
    pub last_message_summary: Option<Option<LastMessageSummary>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub unread_count: Option<u32>,
    pub has_new_message: Option<bool>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Authoritative state supplied by the durable store on load or reload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub conversations: Vec<ConversationSummary>,
    pub messages: Vec<Message>,
}

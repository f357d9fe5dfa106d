pub mod conversation;
pub mod error;
pub mod wire;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a message
///
/// Progression is monotonic along `Sending < Sent < Delivered < Read`; see
/// [`crate::sync::status`] for the rules, including the `Error` side branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of message content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// The local user of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// A message record held by the local store
///
/// `server_id` and `is_own` are write-once; use [`Message::assign_server_id`] and
/// [`crate::sync::ownership::classify`] rather than touching the fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub client_id: String,
    pub server_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub authorship_determined: bool,
    pub is_own: bool,
}

impl Message {
    /// Build an optimistic, self-authored message in `Sending` state.
    pub fn optimistic(
        client_id: String,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        kind: MessageKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id,
            server_id: None,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            kind,
            status: MessageStatus::Sending,
            created_at,
            authorship_determined: true,
            is_own: true,
        }
    }

    /// Assign the server id if none is set yet.
    ///
    /// Returns true when the id was stored. A message that already carries a server
    /// id keeps it, whatever the new value is.
    pub fn assign_server_id(&mut self, server_id: &str) -> bool {
        if self.server_id.is_some() || server_id.is_empty() {
            return false;
        }
        self.server_id = Some(server_id.to_string());
        true
    }
}

/// Generate a fresh client id: `temp_<unix-millis>_<8 hex chars>`.
///
/// The millisecond part is the temporal segment used when a transport echoes a
/// truncated id back.
pub fn generate_client_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("temp_{}_{}", now.timestamp_millis(), &suffix[..8])
}

/// Extract the temporal segment of a client id (`temp_<digits>...`).
pub fn temporal_segment(client_id: &str) -> Option<&str> {
    let rest = client_id.strip_prefix("temp_")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

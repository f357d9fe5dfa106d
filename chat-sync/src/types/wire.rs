//! Wire shapes consumed from and produced for the transport
//!
//! Everything arriving from the transport passes through here first. The sender
//! field in particular comes in several shapes; it is normalized once into a
//! [`SenderRef`] so nothing past this module has to inspect raw shapes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sync::ownership;
use crate::types::{generate_client_id, CurrentUser, Message, MessageKind, MessageStatus};

/// An id that may arrive as a string or a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Text(String),
    Number(i64),
}

impl IdValue {
    pub fn to_id(&self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Legacy sender object shapes still emitted by older servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySender {
    #[serde(default, alias = "userId")]
    pub user_id: Option<IdValue>,
    #[serde(default, alias = "senderId")]
    pub sender_id: Option<IdValue>,
}

/// Raw sender field as found on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderField {
    /// Plain id string
    Id(String),
    /// Numeric id
    Numeric(i64),
    /// User profile object with an `id` field
    Profile {
        id: IdValue,
        #[serde(default, alias = "displayName")]
        display_name: Option<String>,
    },
    /// Older `{userId}` / `{sender_id}` objects
    Legacy(LegacySender),
    /// Anything else
    Other(serde_json::Value),
}

impl From<&str> for SenderField {
    fn from(id: &str) -> Self {
        SenderField::Id(id.to_string())
    }
}

impl From<&CurrentUser> for SenderField {
    fn from(user: &CurrentUser) -> Self {
        SenderField::Profile {
            id: IdValue::Text(user.id.clone()),
            display_name: user.display_name.clone(),
        }
    }
}

/// Canonical sender representation used by core logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderRef {
    User(String),
    /// Shape could not be recognized; carries a short description for logs
    Unrecognized(String),
}

impl SenderRef {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Map any raw sender shape into a [`SenderRef`].
pub fn normalize_sender(sender: &SenderField) -> SenderRef {
    let id = match sender {
        SenderField::Id(id) => Some(id.trim().to_string()),
        SenderField::Numeric(n) => Some(n.to_string()),
        SenderField::Profile { id, .. } => Some(id.to_id()),
        SenderField::Legacy(legacy) => legacy
            .user_id
            .as_ref()
            .or(legacy.sender_id.as_ref())
            .map(IdValue::to_id),
        SenderField::Other(value) => {
            return SenderRef::Unrecognized(describe_shape(value));
        }
    };

    match id {
        Some(id) if !id.is_empty() => SenderRef::User(id),
        _ => SenderRef::Unrecognized("empty sender id".to_string()),
    }
}

fn describe_shape(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(_) => "bool".to_string(),
        serde_json::Value::Number(_) => "number".to_string(),
        serde_json::Value::String(_) => "string".to_string(),
        serde_json::Value::Array(items) => format!("array[{}]", items.len()),
        serde_json::Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object{{{}}}", keys.join(","))
        }
    }
}

fn default_status() -> MessageStatus {
    MessageStatus::Sent
}

/// Canonical message wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    pub conversation_id: String,
    #[serde(alias = "sender", alias = "from")]
    pub sender_id: SenderField,
    #[serde(default)]
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default = "default_status")]
    pub status: MessageStatus,
    /// Unix milliseconds
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl WireMessage {
    /// Produce the outgoing wire shape for a stored message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            client_id: Some(message.client_id.clone()),
            server_id: message.server_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: SenderField::Id(message.sender_id.clone()),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            status: message.status,
            created_at: Some(message.created_at.timestamp_millis()),
        }
    }

    /// Normalize into a store record, classifying ownership exactly once.
    pub fn into_message(self, current_user: &CurrentUser, now: DateTime<Utc>) -> Message {
        let sender = normalize_sender(&self.sender_id);
        let is_own = ownership::resolve(&sender, current_user);

        let sender_id = match &sender {
            SenderRef::User(id) => id.clone(),
            SenderRef::Unrecognized(_) => String::new(),
        };

        let created_at = self
            .created_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(|| {
                warn!(conversation_id = %self.conversation_id, "message without usable createdAt");
                now
            });

        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_client_id(created_at));

        Message {
            client_id,
            server_id: self.server_id.filter(|id| !id.is_empty()),
            conversation_id: self.conversation_id,
            sender_id,
            recipient_id: self.recipient_id,
            content: self.content,
            kind: self.kind,
            status: self.status,
            created_at,
            authorship_determined: true,
            is_own,
        }
    }
}

/// A delivery or read confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub status: MessageStatus,
    /// Unix milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Confirmation {
    pub fn for_client(client_id: &str, status: MessageStatus) -> Self {
        Self {
            server_id: None,
            client_id: Some(client_id.to_string()),
            status,
            timestamp: None,
        }
    }

    pub fn for_server(server_id: &str, status: MessageStatus) -> Self {
        Self {
            server_id: Some(server_id.to_string()),
            client_id: None,
            status,
            timestamp: None,
        }
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        format!(
            "server_id={:?} client_id={:?} status={}",
            self.server_id, self.client_id, self.status
        )
    }
}

/// Deletion notice for a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

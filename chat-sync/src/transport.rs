//! Transport seam
//!
//! The crate never speaks a protocol itself. A [`Transport`] delivers outgoing
//! messages, and whatever owns the socket feeds [`TransportEvent`]s back into the
//! session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::error::Result;
use crate::types::wire::{Confirmation, DeletionNotice, WireMessage};

/// Acknowledgement of an accepted send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub client_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message. Returns `SyncError::TransportUnavailable` when there is no
    /// connection at all; any other error counts as a failed attempt.
    async fn send(
        &self,
        conversation_id: &str,
        payload: &WireMessage,
        client_id: &str,
    ) -> Result<SendAck>;
}

/// Inbound events from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum TransportEvent {
    MessageDelivered(Confirmation),
    MessageRead(Confirmation),
    MessageIncoming(WireMessage),
    MessageDeleted(DeletionNotice),
    Connected,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageStatus;
    use serde_json::json;

    #[test]
    fn test_event_wire_names() {
        let raw = json!({
            "event": "message-read",
            "data": {"serverId": "srv-9", "status": "read"}
        });
        let event: TransportEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            event,
            TransportEvent::MessageRead(Confirmation::for_server("srv-9", MessageStatus::Read))
        );

        let connected: TransportEvent = serde_json::from_value(json!({"event": "connected"})).unwrap();
        assert_eq!(connected, TransportEvent::Connected);
    }
}

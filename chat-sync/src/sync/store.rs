//! Local message store
//!
//! Owns every message record of a session, optimistic and confirmed alike.
//! Messages are keyed by client id; each conversation keeps a timeline of client
//! ids ordered by `created_at` (ties keep arrival order). A secondary index maps
//! server ids back to client ids once they are known.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::sync::status::{self, StatusUpgrade};
use crate::types::{temporal_segment, Message, MessageStatus};

/// Outcome of a prefix lookup on the temporal segment of a client id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMatch {
    None,
    Unique(String),
    Ambiguous(usize),
}

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: HashMap<String, Message>,
    timelines: HashMap<String, Vec<String>>,
    server_index: HashMap<String, String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Insert a message. Returns false if its client id or server id is already known.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.messages.contains_key(&message.client_id) {
            debug!(client_id = %message.client_id, "duplicate client id, not inserting");
            return false;
        }
        if let Some(server_id) = &message.server_id {
            if self.server_index.contains_key(server_id) {
                debug!(server_id = %server_id, "duplicate server id, not inserting");
                return false;
            }
            self.server_index
                .insert(server_id.clone(), message.client_id.clone());
        }

        let timeline = self
            .timelines
            .entry(message.conversation_id.clone())
            .or_default();
        let position = timeline
            .iter()
            .rposition(|id| {
                self.messages
                    .get(id)
                    .map(|m| m.created_at <= message.created_at)
                    .unwrap_or(false)
            })
            .map(|p| p + 1)
            .unwrap_or(0);
        timeline.insert(position, message.client_id.clone());

        self.messages.insert(message.client_id.clone(), message);
        true
    }

    pub fn get(&self, client_id: &str) -> Option<&Message> {
        self.messages.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.messages.contains_key(client_id)
    }

    /// Client id of the message carrying `server_id`
    pub fn find_by_server_id(&self, server_id: &str) -> Option<&str> {
        self.server_index.get(server_id).map(String::as_str)
    }

    /// Find an own message whose temporal segment starts with the one in `echoed`.
    ///
    /// `echoed` may be a full or truncated client id, or just the digits. Segments
    /// shorter than `min_len` never match.
    pub fn find_by_temporal_prefix(&self, echoed: &str, min_len: usize) -> PrefixMatch {
        let segment = match temporal_segment(echoed) {
            Some(s) => s,
            None if !echoed.is_empty() && echoed.chars().all(|c| c.is_ascii_digit()) => echoed,
            None => return PrefixMatch::None,
        };
        if segment.len() < min_len {
            return PrefixMatch::None;
        }

        let candidates: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| m.is_own)
            .filter(|m| {
                temporal_segment(&m.client_id)
                    .map(|own| own.starts_with(segment))
                    .unwrap_or(false)
            })
            .collect();

        match candidates.as_slice() {
            [] => PrefixMatch::None,
            [only] => PrefixMatch::Unique(only.client_id.clone()),
            many => PrefixMatch::Ambiguous(many.len()),
        }
    }

    /// Set the server id of a message, honouring write-once semantics.
    pub fn assign_server_id(&mut self, client_id: &str, server_id: &str) -> bool {
        if let Some(owner) = self.server_index.get(server_id) {
            if owner != client_id {
                warn!(
                    server_id = %server_id,
                    owner = %owner,
                    client_id = %client_id,
                    "server id already belongs to another message"
                );
            }
            return false;
        }

        let Some(message) = self.messages.get_mut(client_id) else {
            return false;
        };
        if !message.assign_server_id(server_id) {
            return false;
        }
        self.server_index
            .insert(server_id.to_string(), client_id.to_string());
        debug!(client_id = %client_id, server_id = %server_id, "server id assigned");
        true
    }

    /// Run the status state machine on a stored message.
    pub fn upgrade_status(
        &mut self,
        client_id: &str,
        requested: MessageStatus,
    ) -> Option<StatusUpgrade> {
        let message = self.messages.get_mut(client_id)?;
        let result = status::upgrade(message.status, requested);
        if result.applied {
            message.status = result.status;
        }
        Some(result)
    }

    /// Put a failed message back to `sending` for a manual resend.
    pub fn reset_for_resend(&mut self, client_id: &str) -> Option<MessageStatus> {
        let message = self.messages.get_mut(client_id)?;
        let status = status::reset_for_resend(message.status)?;
        message.status = status;
        Some(status)
    }

    /// Messages of a conversation in timeline order
    pub fn messages(&self, conversation_id: &str) -> Vec<&Message> {
        self.timelines
            .get(conversation_id)
            .map(|ids| ids.iter().filter_map(|id| self.messages.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn last_message(&self, conversation_id: &str) -> Option<&Message> {
        self.timelines
            .get(conversation_id)?
            .last()
            .and_then(|id| self.messages.get(id))
    }

    pub fn remove(&mut self, client_id: &str) -> Option<Message> {
        let message = self.messages.remove(client_id)?;
        if let Some(server_id) = &message.server_id {
            self.server_index.remove(server_id);
        }
        if let Some(timeline) = self.timelines.get_mut(&message.conversation_id) {
            timeline.retain(|id| id != client_id);
            if timeline.is_empty() {
                self.timelines.remove(&message.conversation_id);
            }
        }
        Some(message)
    }

    /// Drop every message of a conversation. Returns how many were removed.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> usize {
        let Some(ids) = self.timelines.remove(conversation_id) else {
            return 0;
        };
        for id in &ids {
            if let Some(message) = self.messages.remove(id) {
                if let Some(server_id) = &message.server_id {
                    self.server_index.remove(server_id);
                }
            }
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;
    use chrono::{Duration, TimeZone, Utc};

    fn message(client_id: &str, conv: &str, offset_secs: i64) -> Message {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Message::optimistic(
            client_id.into(),
            conv,
            "me",
            "bob",
            client_id,
            MessageKind::Text,
            base + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn test_insert_orders_by_created_at() {
        let mut store = MessageStore::new();
        assert!(store.insert(message("b", "c1", 20)));
        assert!(store.insert(message("a", "c1", 10)));
        assert!(store.insert(message("c", "c1", 20)));
        assert!(store.insert(message("x", "c2", 0)));

        let ids: Vec<&str> = store
            .messages("c1")
            .iter()
            .map(|m| m.client_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.last_message("c1").unwrap().client_id, "c");
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut store = MessageStore::new();
        assert!(store.insert(message("a", "c1", 0)));
        assert!(!store.insert(message("a", "c1", 5)));

        let mut with_server = message("b", "c1", 1);
        with_server.server_id = Some("srv-1".into());
        assert!(store.insert(with_server));

        let mut dup_server = message("c", "c1", 2);
        dup_server.server_id = Some("srv-1".into());
        assert!(!store.insert(dup_server));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_assign_server_id_once() {
        let mut store = MessageStore::new();
        store.insert(message("a", "c1", 0));
        store.insert(message("b", "c1", 1));

        assert!(store.assign_server_id("a", "srv-1"));
        assert!(!store.assign_server_id("a", "srv-2"));
        assert!(!store.assign_server_id("b", "srv-1"));
        assert_eq!(store.find_by_server_id("srv-1"), Some("a"));
        assert_eq!(store.find_by_server_id("srv-2"), None);
    }

    #[test]
    fn test_temporal_prefix_lookup() {
        let mut store = MessageStore::new();
        store.insert(message("temp_1700000000123_aaaa0000", "c1", 0));
        store.insert(message("temp_1700000999456_bbbb1111", "c1", 1));

        assert_eq!(
            store.find_by_temporal_prefix("temp_1700000000", 10),
            PrefixMatch::Unique("temp_1700000000123_aaaa0000".into())
        );
        assert_eq!(
            store.find_by_temporal_prefix("1700000999456", 10),
            PrefixMatch::Unique("temp_1700000999456_bbbb1111".into())
        );
        assert_eq!(
            store.find_by_temporal_prefix("temp_1700000", 10),
            PrefixMatch::None
        );
        assert_eq!(
            store.find_by_temporal_prefix("temp_17000009", 8),
            PrefixMatch::Unique("temp_1700000999456_bbbb1111".into())
        );
        assert_eq!(
            store.find_by_temporal_prefix("temp_1700000", 7),
            PrefixMatch::Ambiguous(2)
        );
        assert_eq!(store.find_by_temporal_prefix("nope", 1), PrefixMatch::None);
    }

    #[test]
    fn test_upgrade_and_remove() {
        let mut store = MessageStore::new();
        let mut msg = message("a", "c1", 0);
        msg.server_id = Some("srv-1".into());
        store.insert(msg);

        let result = store.upgrade_status("a", MessageStatus::Delivered).unwrap();
        assert!(result.applied);
        let result = store.upgrade_status("a", MessageStatus::Sent).unwrap();
        assert!(!result.applied);
        assert_eq!(store.get("a").unwrap().status, MessageStatus::Delivered);
        assert!(store.upgrade_status("missing", MessageStatus::Read).is_none());

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.client_id, "a");
        assert!(store.find_by_server_id("srv-1").is_none());
        assert!(store.messages("c1").is_empty());
    }

    #[test]
    fn test_remove_conversation() {
        let mut store = MessageStore::new();
        store.insert(message("a", "c1", 0));
        store.insert(message("b", "c1", 1));
        store.insert(message("c", "c2", 0));

        assert_eq!(store.remove_conversation("c1"), 2);
        assert_eq!(store.remove_conversation("c1"), 0);
        assert_eq!(store.len(), 1);
    }
}

//! Conversation index
//!
//! Holds one [`ConversationSummary`] per conversation plus the display order.
//! Every change goes through [`ConversationIndex::upsert`], [`ConversationIndex::mark_read`]
//! or [`ConversationIndex::remove`], and each of them reports whether anything
//! observable changed. Callers rely on a `false` to skip redraws, so a no-op patch
//! must leave the index exactly as it was.
//!
//! Order is by last activity, newest first, when seeded. After that a conversation
//! that gets a new latest message or becomes active moves to the front and the
//! rest keep their relative order. A latest message only counts as new when the
//! patch also carries activity; a tail change caused by a deletion does not reorder.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::conversation::{ConversationPatch, ConversationSummary};
use crate::types::error::{Result, SyncError};

#[derive(Debug, Default)]
pub struct ConversationIndex {
    conversations: HashMap<String, ConversationSummary>,
    order: Vec<String>,
    active: Option<String>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationSummary> {
        self.conversations.get(id)
    }

    /// Summaries in display order
    pub fn ordered(&self) -> Vec<&ConversationSummary> {
        self.order
            .iter()
            .filter_map(|id| self.conversations.get(id))
            .collect()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.as_deref() == Some(id)
    }

    /// Iterator over all unread counts, for aggregation
    pub fn unread_counts(&self) -> impl Iterator<Item = u32> + '_ {
        self.conversations.values().map(|c| c.unread_count)
    }

    /// Set the active conversation. An existing conversation moves to the front.
    ///
    /// Returns true if the order changed.
    pub fn set_active(&mut self, id: Option<&str>) -> bool {
        self.active = id.map(str::to_string);
        match id {
            Some(id) if self.conversations.contains_key(id) => self.move_to_front(id),
            _ => false,
        }
    }

    /// Unread count a conversation should have after an inbound message.
    ///
    /// Increments by exactly one when the sender is not the local user and the
    /// conversation is not the active one.
    pub fn unread_after_inbound(&self, id: &str, sender_id: &str, current_user_id: &str) -> u32 {
        let current = self.get(id).map(|c| c.unread_count).unwrap_or(0);
        if sender_id != current_user_id && !self.is_active(id) {
            current.saturating_add(1)
        } else {
            current
        }
    }

    /// Apply a patch, creating the conversation if it does not exist.
    ///
    /// Returns false, without touching anything, when the patch would not change
    /// the stored summary.
    pub fn upsert(&mut self, id: &str, patch: ConversationPatch) -> bool {
        let existing = self.conversations.get(id);
        let is_new = existing.is_none();
        let has_activity = patch.last_activity_at.is_some();

        let mut candidate = existing
            .cloned()
            .unwrap_or_else(|| ConversationSummary::new(id));
        apply_patch(&mut candidate, patch);

        if let Some(existing) = existing {
            if *existing == candidate {
                return false;
            }
        }

        let latest_changed = match (existing, &candidate.last_message_summary) {
            (Some(old), Some(new)) => old
                .last_message_summary
                .as_ref()
                .map(|s| s.client_id != new.client_id)
                .unwrap_or(true),
            (None, _) => true,
            (Some(_), None) => false,
        };

        self.conversations.insert(id.to_string(), candidate);
        if is_new {
            self.order.insert(0, id.to_string());
            debug!(conversation_id = %id, "conversation added");
        } else if latest_changed && has_activity {
            self.move_to_front(id);
        }
        true
    }

    /// Mark a conversation as read.
    ///
    /// Returns Ok(false) once the conversation is already fully read, so repeated
    /// calls leave the state exactly as the first one did.
    pub fn mark_read(&mut self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conversation = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| SyncError::ConversationNotFound(id.to_string()))?;

        if conversation.unread_count == 0
            && !conversation.has_new_message
            && conversation.last_read_at.is_some()
        {
            return Ok(false);
        }

        conversation.unread_count = 0;
        conversation.has_new_message = false;
        conversation.last_read_at = Some(now);
        debug!(conversation_id = %id, "conversation marked read");
        Ok(true)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if self.conversations.remove(id).is_none() {
            return false;
        }
        self.order.retain(|o| o != id);
        if self.is_active(id) {
            self.active = None;
        }
        true
    }

    /// Replace the whole index with authoritative summaries.
    ///
    /// Returns the ids whose summary changed, appeared or disappeared.
    pub fn replace_all(&mut self, mut summaries: Vec<ConversationSummary>) -> Vec<String> {
        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        let mut changed = Vec::new();
        let mut next = HashMap::with_capacity(summaries.len());
        let mut order = Vec::with_capacity(summaries.len());

        for summary in summaries {
            if next.contains_key(&summary.id) {
                continue;
            }
            if self.conversations.get(&summary.id) != Some(&summary) {
                changed.push(summary.id.clone());
            }
            order.push(summary.id.clone());
            next.insert(summary.id.clone(), summary);
        }

        for id in self.conversations.keys() {
            if !next.contains_key(id) {
                changed.push(id.clone());
            }
        }

        self.conversations = next;
        self.order = order;
        if let Some(active) = self.active.clone() {
            self.move_to_front(&active);
        }
        changed
    }

    fn move_to_front(&mut self, id: &str) -> bool {
        match self.order.iter().position(|o| o == id) {
            Some(0) | None => false,
            Some(pos) => {
                let id = self.order.remove(pos);
                self.order.insert(0, id);
                true
            }
        }
    }
}

fn apply_patch(summary: &mut ConversationSummary, patch: ConversationPatch) {
    if let Some(name) = patch.name {
        summary.name = name;
    }
    if let Some(participants) = patch.participant_ids {
        summary.participant_ids = participants;
    }
    if let Some(last) = patch.last_message_summary {
        summary.last_message_summary = last;
    }
    if let Some(at) = patch.last_activity_at {
        summary.last_activity_at = Some(at);
    }
    if let Some(unread) = patch.unread_count {
        summary.unread_count = unread;
    }
    if let Some(has_new) = patch.has_new_message {
        summary.has_new_message = has_new;
    }
    if let Some(at) = patch.last_read_at {
        summary.last_read_at = Some(at);
    }
}

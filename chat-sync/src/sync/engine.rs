//! Session-scoped sync engine
//!
//! [`SyncSession`] owns every piece of client-side sync state for one signed-in
//! user: the message store, the conversation index, the unread aggregator, the
//! send queue and presence. It is created at session start and dropped at
//! session end; nothing here is global.
//!
//! Each public operation is one logical event. Derived updates (status upgrade,
//! summary patch, global recompute) are applied first and the resulting
//! notifications are collected in a [`ChangeSet`] that is flushed to the
//! renderer channel in one batch at the end. Async drivers share the session as
//! `Arc<tokio::sync::Mutex<SyncSession>>` and hold the lock for exactly one
//! operation, so observers never see a half-applied event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::sync::action_queue::{FailureOutcome, PendingSend, RetryPolicy, SendQueue, SendState};
use crate::sync::conversation::ConversationIndex;
use crate::sync::ownership;
use crate::sync::presence::PresenceTracker;
use crate::sync::reconcile::{self, ReconcileOutcome};
use crate::sync::store::MessageStore;
use crate::sync::unread::{self, UnreadAggregator};
use crate::transport::{SendAck, TransportEvent};
use crate::types::conversation::{
    ConversationPatch, ConversationSummary, LastMessageSummary, SessionSnapshot,
};
use crate::types::error::{Result, SyncError};
use crate::types::wire::{normalize_sender, Confirmation, DeletionNotice, SenderRef, WireMessage};
use crate::types::{generate_client_id, CurrentUser, Message, MessageKind, MessageStatus};

/// Notification sent to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    ConversationChanged {
        id: String,
    },
    MessageStatusChanged {
        #[serde(rename = "clientId")]
        client_id: String,
        status: MessageStatus,
    },
    GlobalUnreadChanged {
        count: u32,
    },
    SendFailed {
        #[serde(rename = "clientId")]
        client_id: String,
        reason: String,
    },
}

/// Notifications collected during one logical event
#[derive(Debug, Default)]
pub struct ChangeSet {
    statuses: Vec<(String, MessageStatus)>,
    conversations: Vec<String>,
    failures: Vec<(String, String)>,
}

impl ChangeSet {
    /// Record a status change. A later change for the same message replaces the earlier one.
    fn status(&mut self, client_id: &str, status: MessageStatus) {
        match self.statuses.iter_mut().find(|(id, _)| id == client_id) {
            Some(entry) => entry.1 = status,
            None => self.statuses.push((client_id.to_string(), status)),
        }
    }

    fn conversation(&mut self, id: &str) {
        if !self.conversations.iter().any(|c| c == id) {
            self.conversations.push(id.to_string());
        }
    }

    fn failure(&mut self, client_id: &str, reason: String) {
        self.failures.push((client_id.to_string(), reason));
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() && self.conversations.is_empty() && self.failures.is_empty()
    }

    fn into_events(self, global_unread: Option<u32>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        for (client_id, status) in self.statuses {
            events.push(SyncEvent::MessageStatusChanged { client_id, status });
        }
        for id in self.conversations {
            events.push(SyncEvent::ConversationChanged { id });
        }
        for (client_id, reason) in self.failures {
            events.push(SyncEvent::SendFailed { client_id, reason });
        }
        if let Some(count) = global_unread {
            events.push(SyncEvent::GlobalUnreadChanged { count });
        }
        events
    }
}

pub struct SyncSession {
    current_user: CurrentUser,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    store: MessageStore,
    conversations: ConversationIndex,
    unread: UnreadAggregator,
    queue: SendQueue,
    presence: PresenceTracker,
    online: bool,
    events: Sender<SyncEvent>,
}

impl SyncSession {
    /// Start a session. The returned receiver carries every renderer notification.
    pub fn new(
        current_user: CurrentUser,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, Receiver<SyncEvent>) {
        let (tx, rx) = flume::unbounded();
        info!(user_id = %current_user.id, "sync session started");

        let session = Self {
            queue: SendQueue::new(RetryPolicy::from_config(&config)),
            presence: PresenceTracker::new(config.presence_threshold_secs),
            current_user,
            config,
            clock,
            store: MessageStore::new(),
            conversations: ConversationIndex::new(),
            unread: UnreadAggregator::new(),
            online: false,
            events: tx,
        };
        (session, rx)
    }

    pub fn current_user(&self) -> &CurrentUser {
        &self.current_user
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn conversations(&self) -> &ConversationIndex {
        &self.conversations
    }

    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn message(&self, client_id: &str) -> Option<&Message> {
        self.store.get(client_id)
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<&Message> {
        self.store.messages(conversation_id)
    }

    /// Current global unread count
    pub fn global_unread(&self) -> u32 {
        unread::recompute(&self.conversations)
    }

    /// Global unread count formatted for a badge
    pub fn global_badge(&self) -> String {
        unread::format_badge(self.global_unread(), self.config.unread_badge_cap)
    }

    /// Whether the peer of a private conversation has been seen recently
    pub fn peer_online(&self, conversation_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .and_then(|c| c.peer_of(&self.current_user.id))
            .map(|peer| self.presence.is_online(peer, self.clock.now()))
            .unwrap_or(false)
    }

    /// Client ids eligible for a reconnect flush, in submission order
    pub fn queued_ids(&self) -> Vec<String> {
        self.queue.queued_ids()
    }

    // -----------------------------------------------------------------------
    // Durable store
    // -----------------------------------------------------------------------

    /// Seed or reload from the durable store.
    ///
    /// The snapshot is authoritative for conversation summaries, including unread
    /// counts. Its messages are merged: known ones are reconciled, new ones inserted.
    /// Nothing is applied when validation fails.
    pub fn load_snapshot(&mut self, snapshot: SessionSnapshot) -> Result<()> {
        for conversation in &snapshot.conversations {
            self.validate_summary(conversation)?;
        }

        let mut changes = ChangeSet::default();
        let mut inserted = 0usize;

        for mut message in snapshot.messages {
            if self
                .find_known(message.server_id.as_deref(), Some(&message.client_id))
                .is_some()
            {
                let confirmation = Confirmation {
                    server_id: message.server_id.clone(),
                    client_id: Some(message.client_id.clone()),
                    status: message.status,
                    timestamp: None,
                };
                self.apply_confirmation(&confirmation, &mut changes);
                continue;
            }

            let sender = SenderRef::User(message.sender_id.clone());
            ownership::classify(&mut message, &sender, &self.current_user);
            if self.store.insert(message) {
                inserted += 1;
            }
        }

        for id in self.conversations.replace_all(snapshot.conversations) {
            changes.conversation(&id);
        }

        info!(
            conversations = self.conversations.len(),
            inserted, "session snapshot loaded"
        );
        self.flush(changes);
        Ok(())
    }

    fn validate_summary(&self, conversation: &ConversationSummary) -> Result<()> {
        if conversation.id.is_empty() {
            return Err(SyncError::InvalidInput(
                "conversation without id in snapshot".to_string(),
            ));
        }

        // Unnamed conversations are private: the local user plus exactly one peer
        if conversation.name.is_none() {
            let participants = &conversation.participant_ids;
            let valid = participants.len() == 2
                && participants[0] != participants[1]
                && participants.contains(&self.current_user.id);
            if !valid {
                return Err(SyncError::InvalidInput(format!(
                    "private conversation {} must have the current user and one peer, got {:?}",
                    conversation.id, participants
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Insert an optimistic message and queue it for sending. Returns its client id.
    pub fn compose(
        &mut self,
        conversation_id: &str,
        recipient_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<String> {
        if conversation_id.is_empty() {
            return Err(SyncError::InvalidInput(
                "conversation id must not be empty".to_string(),
            ));
        }
        if kind == MessageKind::Text && content.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "text message must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let client_id = generate_client_id(now);
        let message = Message::optimistic(
            client_id.clone(),
            conversation_id,
            &self.current_user.id,
            recipient_id,
            content,
            kind,
            now,
        );

        if !self.store.insert(message) {
            return Err(SyncError::InvalidInput(format!(
                "client id {} already in use",
                client_id
            )));
        }
        self.queue.queue(PendingSend::new(
            &client_id,
            conversation_id,
            recipient_id,
            content,
            now,
        ))?;

        let mut changes = ChangeSet::default();
        changes.status(&client_id, MessageStatus::Sending);
        self.refresh_summary(conversation_id, Some(now), &mut changes);
        debug!(client_id = %client_id, conversation_id = %conversation_id, "optimistic message inserted");

        self.flush(changes);
        Ok(client_id)
    }

    /// Claim a pending send for an attempt and build its payload.
    ///
    /// Returns `None` while offline, or when the record is missing, already in
    /// flight or cancelled.
    pub fn begin_send(&mut self, client_id: &str) -> Result<Option<WireMessage>> {
        let message = self
            .store
            .get(client_id)
            .ok_or_else(|| SyncError::MessageNotFound(client_id.to_string()))?;

        if !self.online {
            // A record between retries goes back to the queue so the reconnect flush sees it
            self.requeue(client_id);
            debug!(client_id = %client_id, "{}, keeping send queued", SyncError::TransportUnavailable);
            return Ok(None);
        }

        let payload = WireMessage::from_message(message);
        if !self.queue.mark_sending(client_id) {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// The transport accepted a send.
    pub fn handle_send_ack(&mut self, ack: SendAck) -> ReconcileOutcome {
        self.queue.mark_sent(&ack.client_id);
        let confirmation = Confirmation {
            server_id: ack.server_id,
            client_id: Some(ack.client_id),
            status: MessageStatus::Sent,
            timestamp: None,
        };
        self.reconcile(&confirmation)
    }

    /// A send attempt failed. Decides between retry, requeue and terminal failure.
    pub fn handle_send_failure(&mut self, client_id: &str, error: &SyncError) -> FailureOutcome {
        if matches!(error, SyncError::TransportUnavailable) {
            self.online = false;
            return if self.queue.mark_queued(client_id) {
                FailureOutcome::Requeued
            } else {
                FailureOutcome::Unknown
            };
        }

        let mut changes = ChangeSet::default();
        let outcome = self.queue.mark_failed(client_id, &error.to_string());
        match &outcome {
            FailureOutcome::Exhausted { attempts } => {
                let reason = SyncError::RetryExhausted {
                    client_id: client_id.to_string(),
                    attempts: *attempts,
                };
                self.fail_message(client_id, reason.to_string(), &mut changes);
            }
            FailureOutcome::Cancelled => {
                self.queue.remove(client_id);
                self.fail_message(client_id, error.to_string(), &mut changes);
            }
            _ => {}
        }
        self.flush(changes);
        outcome
    }

    /// Put a failed record back to `queued` so the next flush picks it up.
    pub fn requeue(&mut self, client_id: &str) -> bool {
        match self.queue.get(client_id) {
            Some(p) if p.state == SendState::Failed => self.queue.mark_queued(client_id),
            _ => false,
        }
    }

    /// Resend a failed message with a fresh attempt counter.
    pub fn manual_resend(&mut self, client_id: &str) -> Result<()> {
        let message = self
            .store
            .get(client_id)
            .ok_or_else(|| SyncError::MessageNotFound(client_id.to_string()))?;
        if !message.is_own {
            return Err(SyncError::InvalidInput(format!(
                "message {} was not sent by the current user",
                client_id
            )));
        }
        if matches!(self.queue.get(client_id), Some(p) if p.state == SendState::Sending) {
            return Err(SyncError::InvalidInput(format!(
                "message {} is already being sent",
                client_id
            )));
        }

        let previous = message.status;
        let conversation_id = message.conversation_id.clone();
        let pending = PendingSend::new(
            client_id,
            &message.conversation_id,
            &message.recipient_id,
            &message.content,
            self.clock.now(),
        );

        let status = self.store.reset_for_resend(client_id).ok_or_else(|| {
            SyncError::InvalidInput(format!(
                "message {} cannot be resent from status {}",
                client_id, previous
            ))
        })?;
        self.queue.requeue_fresh(pending);
        info!(client_id = %client_id, "manual resend requested");

        let mut changes = ChangeSet::default();
        if status != previous {
            changes.status(client_id, status);
        }
        self.refresh_summary(&conversation_id, None, &mut changes);
        self.flush(changes);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::MessageDelivered(confirmation) => {
                self.reconcile(&Confirmation {
                    status: MessageStatus::Delivered,
                    ..confirmation
                });
            }
            TransportEvent::MessageRead(confirmation) => {
                self.reconcile(&Confirmation {
                    status: MessageStatus::Read,
                    ..confirmation
                });
            }
            TransportEvent::MessageIncoming(wire) => self.receive(wire),
            TransportEvent::MessageDeleted(notice) => {
                self.delete(&notice);
            }
            TransportEvent::Connected => {
                self.set_online(true);
            }
            TransportEvent::Disconnected => {
                self.set_online(false);
            }
        }
    }

    /// Match a confirmation to a stored message and apply it. Orphans are dropped.
    pub fn reconcile(&mut self, confirmation: &Confirmation) -> ReconcileOutcome {
        let mut changes = ChangeSet::default();
        let outcome = self.apply_confirmation(confirmation, &mut changes);
        self.flush(changes);
        outcome
    }

    fn apply_confirmation(
        &mut self,
        confirmation: &Confirmation,
        changes: &mut ChangeSet,
    ) -> ReconcileOutcome {
        let outcome =
            reconcile::reconcile(&mut self.store, confirmation, self.config.prefix_match_min_len);

        let Some(client_id) = outcome.client_id().map(str::to_string) else {
            return outcome;
        };
        let Some(message) = self.store.get(&client_id) else {
            return outcome;
        };
        let conversation_id = message.conversation_id.clone();

        // A confirmation can beat the transport ack
        if message.status.rank().map(|r| r >= 1).unwrap_or(false)
            && self.queue.mark_sent(&client_id).is_some()
        {
            debug!(client_id = %client_id, "pending send settled by confirmation");
        }

        if let ReconcileOutcome::Applied { status, .. } = &outcome {
            changes.status(&client_id, *status);
            self.refresh_summary(&conversation_id, None, changes);
        }
        outcome
    }

    /// Handle an inbound message. Echoes of known messages are reconciled, not inserted.
    pub fn receive(&mut self, wire: WireMessage) {
        let mut changes = ChangeSet::default();

        let confirmation = Confirmation {
            server_id: wire.server_id.clone().filter(|s| !s.is_empty()),
            client_id: wire.client_id.clone().filter(|s| !s.is_empty()),
            status: wire.status,
            timestamp: wire.created_at,
        };
        if self.is_known(&wire, &confirmation) {
            debug!(conversation_id = %wire.conversation_id, "incoming message already known, reconciling");
            self.apply_confirmation(&confirmation, &mut changes);
            self.flush(changes);
            return;
        }

        let now = self.clock.now();
        let message = wire.into_message(&self.current_user, now);
        let client_id = message.client_id.clone();
        let conversation_id = message.conversation_id.clone();
        let sender_id = message.sender_id.clone();
        let created_at = message.created_at;
        let is_own = message.is_own;

        if !self.store.insert(message) {
            return;
        }
        if !is_own && !sender_id.is_empty() {
            self.presence.record(&sender_id, created_at);
        }

        let is_tail = self
            .store
            .last_message(&conversation_id)
            .map(|m| m.client_id == client_id)
            .unwrap_or(false);
        let unread = self.conversations.unread_after_inbound(
            &conversation_id,
            &sender_id,
            &self.current_user.id,
        );
        let previous_unread = self
            .conversations
            .get(&conversation_id)
            .map(|c| c.unread_count)
            .unwrap_or(0);

        let mut patch = ConversationPatch {
            unread_count: Some(unread),
            ..Default::default()
        };
        if unread > previous_unread {
            patch.has_new_message = Some(true);
        }
        if is_tail {
            patch.last_message_summary = Some(self.summary_of(&conversation_id));
            patch.last_activity_at = Some(created_at);
        }
        if self.conversations.upsert(&conversation_id, patch) {
            changes.conversation(&conversation_id);
        }
        debug!(client_id = %client_id, conversation_id = %conversation_id, is_own, "incoming message stored");

        self.flush(changes);
    }

    /// Client id of a stored message with exactly this server or client id
    fn find_known(&self, server_id: Option<&str>, client_id: Option<&str>) -> Option<String> {
        server_id
            .filter(|sid| !sid.is_empty())
            .and_then(|sid| self.store.find_by_server_id(sid))
            .or_else(|| client_id.filter(|cid| self.store.contains(cid)))
            .map(str::to_string)
    }

    fn is_known(&self, wire: &WireMessage, confirmation: &Confirmation) -> bool {
        if self
            .find_known(
                confirmation.server_id.as_deref(),
                confirmation.client_id.as_deref(),
            )
            .is_some()
        {
            return true;
        }

        // Truncated echoes of our own sends
        let from_self = !self.current_user.id.is_empty()
            && normalize_sender(&wire.sender_id).user_id() == Some(self.current_user.id.as_str());
        from_self
            && reconcile::find_match(&self.store, confirmation, self.config.prefix_match_min_len)
                .is_some()
    }

    /// Remove a deleted message. Returns true if it was known.
    pub fn delete(&mut self, notice: &DeletionNotice) -> bool {
        let client_id =
            self.find_known(notice.server_id.as_deref(), notice.client_id.as_deref());
        let Some(client_id) = client_id else {
            warn!("{}, discarding", SyncError::OrphanEvent(format!("deletion {:?}", notice)));
            return false;
        };
        let Some(message) = self.store.remove(&client_id) else {
            return false;
        };
        self.queue.remove(&client_id);
        debug!(client_id = %client_id, "message deleted");

        let mut changes = ChangeSet::default();
        self.refresh_summary(&message.conversation_id, None, &mut changes);
        self.flush(changes);
        true
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Make a conversation the active one.
    pub fn open_conversation(&mut self, conversation_id: &str) {
        let mut changes = ChangeSet::default();
        if self.conversations.set_active(Some(conversation_id)) {
            changes.conversation(conversation_id);
        }
        debug!(conversation_id = %conversation_id, "conversation opened");
        self.flush(changes);
    }

    /// Leave the active conversation, cancelling automatic retries if configured.
    pub fn leave_conversation(&mut self) {
        let Some(previous) = self.conversations.active().map(str::to_string) else {
            return;
        };
        self.conversations.set_active(None);

        if self.config.cancel_retries_on_leave {
            let cancelled = self.queue.cancel_conversation(&previous);
            if !cancelled.is_empty() {
                info!(
                    conversation_id = %previous,
                    count = cancelled.len(),
                    "automatic retries cancelled on leave"
                );
            }
        }
    }

    /// Mark a conversation as read. Returns false when it already was.
    pub fn mark_read(&mut self, conversation_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let changed = self.conversations.mark_read(conversation_id, now)?;

        let mut changes = ChangeSet::default();
        if changed {
            changes.conversation(conversation_id);
        }
        self.flush(changes);
        Ok(changed)
    }

    /// Drop a conversation with its messages and pending sends.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> bool {
        let removed = self.conversations.remove(conversation_id);
        let messages = self.store.remove_conversation(conversation_id);
        let pending = self.queue.remove_conversation(conversation_id);
        if !removed && messages == 0 && pending.is_empty() {
            return false;
        }
        info!(
            conversation_id = %conversation_id,
            messages,
            pending = pending.len(),
            "conversation removed"
        );

        let mut changes = ChangeSet::default();
        changes.conversation(conversation_id);
        self.flush(changes);
        true
    }

    /// Record the transport's connectivity. Returns true if it changed.
    pub fn set_online(&mut self, online: bool) -> bool {
        if self.online == online {
            return false;
        }
        self.online = online;
        info!(online, queued = self.queue.queued_ids().len(), "connectivity changed");
        true
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn summary_of(&self, conversation_id: &str) -> Option<LastMessageSummary> {
        self.store
            .last_message(conversation_id)
            .map(|m| LastMessageSummary::from_message(m, self.config.preview_chars))
    }

    /// Re-derive the last-message summary of a conversation from the store tail.
    fn refresh_summary(
        &mut self,
        conversation_id: &str,
        activity: Option<DateTime<Utc>>,
        changes: &mut ChangeSet,
    ) {
        let summary = self.summary_of(conversation_id);
        if summary.is_none() && self.conversations.get(conversation_id).is_none() {
            return;
        }

        let patch = ConversationPatch {
            last_message_summary: Some(summary),
            last_activity_at: activity,
            ..Default::default()
        };
        if self.conversations.upsert(conversation_id, patch) {
            changes.conversation(conversation_id);
        }
    }

    fn fail_message(&mut self, client_id: &str, reason: String, changes: &mut ChangeSet) {
        let Some(result) = self.store.upgrade_status(client_id, MessageStatus::Error) else {
            return;
        };
        if result.applied {
            changes.status(client_id, result.status);
            if let Some(conversation_id) =
                self.store.get(client_id).map(|m| m.conversation_id.clone())
            {
                self.refresh_summary(&conversation_id, None, changes);
            }
        }
        warn!(client_id = %client_id, "send failed: {}", reason);
        changes.failure(client_id, reason);
    }

    /// Emit a batch of notifications after all derived state is updated.
    fn flush(&mut self, changes: ChangeSet) {
        let global = self.unread.refresh(&self.conversations);
        if changes.is_empty() && global.is_none() {
            return;
        }

        for event in changes.into_events(global) {
            if let Err(e) = self.events.send(event) {
                debug!("no renderer listening for sync event: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::conversation::ConversationSummary;
    use crate::types::wire::SenderField;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn session() -> (SyncSession, Receiver<SyncEvent>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let (session, rx) =
            SyncSession::new(CurrentUser::new("me"), SyncConfig::default(), clock.clone());
        (session, rx, clock)
    }

    fn drain(rx: &Receiver<SyncEvent>) -> Vec<SyncEvent> {
        rx.try_iter().collect()
    }

    fn private(id: &str, peer: &str) -> ConversationSummary {
        let mut summary = ConversationSummary::new(id);
        summary.participant_ids = vec!["me".into(), peer.into()];
        summary
    }

    fn incoming(conversation: &str, sender: &str, server_id: &str) -> WireMessage {
        WireMessage {
            client_id: None,
            server_id: Some(server_id.into()),
            conversation_id: conversation.into(),
            sender_id: SenderField::from(sender),
            recipient_id: "me".into(),
            content: "hey".into(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            created_at: Some(start().timestamp_millis() + 10),
        }
    }

    #[test]
    fn test_compose_emits_status_and_conversation() {
        let (mut session, rx, _) = session();
        let client_id = session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();

        assert_eq!(
            drain(&rx),
            vec![
                SyncEvent::MessageStatusChanged {
                    client_id: client_id.clone(),
                    status: MessageStatus::Sending
                },
                SyncEvent::ConversationChanged { id: "c1".into() },
            ]
        );
        assert_eq!(session.queue().len(), 1);
        let summary = session.conversations().get("c1").unwrap();
        assert_eq!(
            summary.last_message_summary.as_ref().unwrap().client_id,
            client_id
        );
    }

    #[test]
    fn test_compose_rejects_empty_text() {
        let (mut session, rx, _) = session();
        assert!(matches!(
            session.compose("c1", "bob", "  ", MessageKind::Text),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(session.store().is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_begin_send_requires_connection() {
        let (mut session, _rx, _) = session();
        let client_id = session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();

        assert_eq!(session.begin_send(&client_id).unwrap(), None);
        session.set_online(true);
        let payload = session.begin_send(&client_id).unwrap().unwrap();
        assert_eq!(payload.client_id.as_deref(), Some(client_id.as_str()));
        assert_eq!(session.begin_send(&client_id).unwrap(), None);
    }

    #[test]
    fn test_stale_confirmation_emits_nothing() {
        let (mut session, rx, _) = session();
        let client_id = session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();
        session.reconcile(&Confirmation::for_client(&client_id, MessageStatus::Delivered));
        drain(&rx);

        let outcome = session.reconcile(&Confirmation::for_client(&client_id, MessageStatus::Sent));
        assert!(matches!(outcome, ReconcileOutcome::Unchanged { .. }));
        assert!(drain(&rx).is_empty());
        assert!(session.queue().is_empty());
    }

    #[test]
    fn test_orphan_leaves_state_untouched() {
        let (mut session, rx, _) = session();
        session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();
        drain(&rx);

        let outcome = session.reconcile(&Confirmation::for_server("srv-404", MessageStatus::Read));
        assert_eq!(outcome, ReconcileOutcome::Orphan);
        assert_eq!(session.store().len(), 1);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_duplicate_incoming_counts_once() {
        let (mut session, rx, _) = session();
        session.receive(incoming("c1", "bob", "srv-1"));
        session.receive(incoming("c1", "bob", "srv-1"));

        assert_eq!(session.store().len(), 1);
        assert_eq!(session.conversations().get("c1").unwrap().unread_count, 1);
        assert_eq!(session.global_unread(), 1);

        let globals: Vec<_> = drain(&rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::GlobalUnreadChanged { .. }))
            .collect();
        assert_eq!(globals, vec![SyncEvent::GlobalUnreadChanged { count: 1 }]);
    }

    #[test]
    fn test_own_echo_reconciles_optimistic_message() {
        let (mut session, _rx, _) = session();
        let client_id = session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();

        let mut echo = incoming("c1", "me", "srv-7");
        echo.client_id = Some(client_id.clone());
        session.receive(echo);

        assert_eq!(session.store().len(), 1);
        let message = session.message(&client_id).unwrap();
        assert_eq!(message.server_id.as_deref(), Some("srv-7"));
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(session.conversations().get("c1").unwrap().unread_count, 0);
    }

    #[test]
    fn test_active_conversation_does_not_count_unread() {
        let (mut session, _rx, _) = session();
        session.open_conversation("c1");
        session.receive(incoming("c1", "bob", "srv-1"));
        assert_eq!(session.conversations().get("c1").unwrap().unread_count, 0);
        assert_eq!(
            session.presence().last_seen("bob").map(|t| t.timestamp_millis()),
            Some(start().timestamp_millis() + 10)
        );
    }

    #[test]
    fn test_delete_refreshes_summary_without_reordering() {
        let (mut session, rx, _) = session();
        session.receive(incoming("c1", "bob", "srv-1"));
        let mut second = incoming("c1", "bob", "srv-2");
        second.created_at = Some(start().timestamp_millis() + 20);
        session.receive(second);
        session.receive(incoming("c2", "carol", "srv-3"));
        drain(&rx);

        assert!(session.delete(&DeletionNotice {
            server_id: Some("srv-2".into()),
            client_id: None
        }));
        let summary = session.conversations().get("c1").unwrap();
        let tail = session.store().find_by_server_id("srv-1").unwrap();
        assert_eq!(summary.last_message_summary.as_ref().unwrap().client_id, tail);
        assert_eq!(summary.unread_count, 2);
        assert_eq!(session.conversations().ids()[0], "c2");

        assert!(!session.delete(&DeletionNotice {
            server_id: Some("srv-2".into()),
            client_id: None
        }));
    }

    #[test]
    fn test_leave_cancels_retries_but_keeps_message() {
        let (mut session, _rx, _) = session();
        session.open_conversation("c1");
        let client_id = session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();
        session.leave_conversation();

        assert!(session.message(&client_id).is_some());
        assert!(!session.queue().get(&client_id).unwrap().auto_retry);
        assert!(session.queued_ids().is_empty());
        assert_eq!(session.conversations().active(), None);
    }

    #[test]
    fn test_snapshot_validation_and_authority() {
        let (mut session, rx, _) = session();
        let mut bad = ConversationSummary::new("c9");
        bad.participant_ids = vec!["bob".into(), "carol".into()];
        let result = session.load_snapshot(SessionSnapshot {
            conversations: vec![bad],
            messages: vec![],
        });
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));
        assert!(session.conversations().is_empty());

        let mut seeded = private("c1", "bob");
        seeded.unread_count = 4;
        session
            .load_snapshot(SessionSnapshot {
                conversations: vec![seeded, private("c2", "carol")],
                messages: vec![],
            })
            .unwrap();
        assert_eq!(session.global_unread(), 4);
        assert!(drain(&rx).contains(&SyncEvent::GlobalUnreadChanged { count: 4 }));
    }

    #[test]
    fn test_manual_resend_requires_failed_or_sending() {
        let (mut session, _rx, _) = session();
        let client_id = session
            .compose("c1", "bob", "hello", MessageKind::Text)
            .unwrap();
        session.reconcile(&Confirmation::for_client(&client_id, MessageStatus::Sent));

        assert!(matches!(
            session.manual_resend(&client_id),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            session.manual_resend("temp_0_nothing"),
            Err(SyncError::MessageNotFound(_))
        ));
    }

    #[test]
    fn test_global_badge_caps() {
        let (mut session, _rx, _) = session();
        let mut busy = private("c1", "bob");
        busy.unread_count = 150;
        session
            .load_snapshot(SessionSnapshot {
                conversations: vec![busy],
                messages: vec![],
            })
            .unwrap();
        assert_eq!(session.global_unread(), 150);
        assert_eq!(session.global_badge(), "99+");
    }
}

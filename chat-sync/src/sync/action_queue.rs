//! Send queue for offline support and bounded retries
//!
//! Every outgoing message gets a [`PendingSend`] that walks
//! `queued -> sending -> (sent | failed)`. A failure is retried with growing
//! backoff until the policy's bound is reached, then the record is dropped and the
//! caller marks the message as `error`.
//!
//! Records are kept in submission order so a reconnect flush replays them FIFO.
//! The queue references messages by client id only; the store owns the messages.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::types::error::{Result, SyncError};

/// State of a pending send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    Queued,
    Sending,
    Failed,
}

/// A send awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSend {
    pub client_id: String,
    pub conversation_id: String,
    pub recipient_id: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
    pub state: SendState,
    pub auto_retry: bool,
    pub last_error: Option<String>,
}

impl PendingSend {
    pub fn new(
        client_id: &str,
        conversation_id: &str,
        recipient_id: &str,
        payload: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            conversation_id: conversation_id.to_string(),
            recipient_id: recipient_id.to_string(),
            payload: payload.to_string(),
            created_at,
            attempt: 0,
            state: SendState::Queued,
            auto_retry: true,
            last_error: None,
        }
    }
}

/// Backoff and retry bound
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_multiplier: u32,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_initial: Duration::from_millis(1_000),
            backoff_multiplier: 2,
            backoff_max: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_multiplier: config.backoff_multiplier,
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.backoff_multiplier.max(1).saturating_pow(exponent);
        self.backoff_initial
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry after `delay`
    Retry { attempt: u32, delay: Duration },
    /// The bound is exceeded; the record has been removed
    Exhausted { attempts: u32 },
    /// Automatic retries were cancelled while the attempt was in flight
    Cancelled,
    /// The transport was unavailable; back to `queued` without spending an attempt
    Requeued,
    /// No such pending send
    Unknown,
}

#[derive(Debug, Default)]
pub struct SendQueue {
    items: VecDeque<PendingSend>,
    policy: RetryPolicy,
}

impl SendQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, client_id: &str) -> Option<&PendingSend> {
        self.items.iter().find(|p| p.client_id == client_id)
    }

    fn get_mut(&mut self, client_id: &str) -> Option<&mut PendingSend> {
        self.items.iter_mut().find(|p| p.client_id == client_id)
    }

    /// Append a new record at the tail.
    pub fn queue(&mut self, pending: PendingSend) -> Result<()> {
        if self.get(&pending.client_id).is_some() {
            return Err(SyncError::InvalidInput(format!(
                "send {} is already queued",
                pending.client_id
            )));
        }
        debug!(client_id = %pending.client_id, "send queued");
        self.items.push_back(pending);
        Ok(())
    }

    /// Replace any record for the same client id with a fresh one at the tail.
    pub fn requeue_fresh(&mut self, pending: PendingSend) {
        self.remove(&pending.client_id);
        debug!(client_id = %pending.client_id, "send requeued with fresh attempt counter");
        self.items.push_back(pending);
    }

    /// Move a queued or failed record to `sending`.
    ///
    /// Returns false if the record is missing, already in flight, or cancelled.
    pub fn mark_sending(&mut self, client_id: &str) -> bool {
        match self.get_mut(client_id) {
            Some(p) if p.state != SendState::Sending && p.auto_retry => {
                p.state = SendState::Sending;
                true
            }
            Some(p) if !p.auto_retry => {
                debug!(client_id = %client_id, "send cancelled, not starting attempt");
                false
            }
            _ => false,
        }
    }

    /// The send was confirmed; drop the record.
    pub fn mark_sent(&mut self, client_id: &str) -> Option<PendingSend> {
        self.remove(client_id)
    }

    /// Put an in-flight record back to `queued` without spending an attempt.
    ///
    /// Used when the transport is not connected at all.
    pub fn mark_queued(&mut self, client_id: &str) -> bool {
        match self.get_mut(client_id) {
            Some(p) => {
                p.state = SendState::Queued;
                true
            }
            None => false,
        }
    }

    /// Record a failed attempt and decide whether to retry.
    pub fn mark_failed(&mut self, client_id: &str, error: &str) -> FailureOutcome {
        let max_retries = self.policy.max_retries;
        let Some(pending) = self.get_mut(client_id) else {
            return FailureOutcome::Unknown;
        };

        pending.attempt = pending.attempt.saturating_add(1);
        pending.last_error = Some(error.to_string());
        let attempt = pending.attempt;

        if attempt > max_retries {
            error!(
                client_id = %client_id,
                attempts = attempt,
                max_retries,
                "send exceeded max retries"
            );
            self.remove(client_id);
            return FailureOutcome::Exhausted { attempts: attempt };
        }

        pending.state = SendState::Failed;
        if !pending.auto_retry {
            return FailureOutcome::Cancelled;
        }

        let delay = self.policy.delay_for(attempt);
        warn!(
            client_id = %client_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "send failed, will retry: {}",
            error
        );
        FailureOutcome::Retry { attempt, delay }
    }

    /// Stop automatic retries for a record. The record stays for a manual resend.
    pub fn cancel(&mut self, client_id: &str) -> bool {
        match self.get_mut(client_id) {
            Some(p) if p.auto_retry => {
                p.auto_retry = false;
                info!(client_id = %client_id, "automatic retries cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancel every record of a conversation. Returns the affected client ids.
    pub fn cancel_conversation(&mut self, conversation_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .items
            .iter()
            .filter(|p| p.conversation_id == conversation_id && p.auto_retry)
            .map(|p| p.client_id.clone())
            .collect();
        for id in &ids {
            self.cancel(id);
        }
        ids
    }

    /// Drop every record of a conversation. Returns the removed client ids.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.items.retain(|p| {
            if p.conversation_id == conversation_id {
                removed.push(p.client_id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Client ids of every `queued` record eligible for automatic sending, FIFO.
    pub fn queued_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|p| p.state == SendState::Queued && p.auto_retry)
            .map(|p| p.client_id.clone())
            .collect()
    }

    pub fn remove(&mut self, client_id: &str) -> Option<PendingSend> {
        let pos = self.items.iter().position(|p| p.client_id == client_id)?;
        self.items.remove(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: &str, conv: &str) -> PendingSend {
        PendingSend::new(id, conv, "bob", "hello", Utc::now())
    }

    fn queue_of(ids: &[&str]) -> SendQueue {
        let mut queue = SendQueue::new(RetryPolicy::default());
        for id in ids {
            queue.queue(pending(id, "c1")).unwrap();
        }
        queue
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_initial: Duration::from_millis(100),
            backoff_multiplier: 3,
            backoff_max: Duration::from_millis(1_000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(900));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_duplicate_queue_rejected() {
        let mut queue = queue_of(&["a"]);
        assert!(matches!(
            queue.queue(pending("a", "c1")),
            Err(SyncError::InvalidInput(_))
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_retry_bound() {
        let mut queue = queue_of(&["a"]);

        assert!(queue.mark_sending("a"));
        assert!(!queue.mark_sending("a"));
        assert_eq!(
            queue.mark_failed("a", "timeout"),
            FailureOutcome::Retry {
                attempt: 1,
                delay: Duration::from_millis(1_000)
            }
        );

        assert!(queue.mark_sending("a"));
        assert_eq!(
            queue.mark_failed("a", "timeout"),
            FailureOutcome::Retry {
                attempt: 2,
                delay: Duration::from_millis(2_000)
            }
        );

        assert!(queue.mark_sending("a"));
        assert_eq!(
            queue.mark_failed("a", "timeout"),
            FailureOutcome::Exhausted { attempts: 3 }
        );
        assert!(queue.get("a").is_none());
        assert_eq!(queue.mark_failed("a", "timeout"), FailureOutcome::Unknown);
    }

    #[test]
    fn test_queued_ids_fifo() {
        let mut queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.queued_ids(), vec!["a", "b", "c"]);

        queue.mark_sending("b");
        assert_eq!(queue.queued_ids(), vec!["a", "c"]);

        queue.mark_queued("b");
        assert_eq!(queue.queued_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cancel_keeps_record() {
        let mut queue = queue_of(&["a"]);
        queue.queue(pending("b", "c2")).unwrap();

        assert_eq!(queue.cancel_conversation("c1"), vec!["a"]);
        assert!(queue.get("a").is_some());
        assert!(!queue.mark_sending("a"));
        assert_eq!(queue.queued_ids(), vec!["b"]);

        queue.queue(pending("c", "c1")).unwrap();
        assert!(queue.mark_sending("c"));
        assert!(queue.cancel("c"));
        assert_eq!(queue.mark_failed("c", "down"), FailureOutcome::Cancelled);
    }

    #[test]
    fn test_requeue_fresh_resets_attempts() {
        let mut queue = queue_of(&["a", "b"]);
        queue.mark_sending("a");
        queue.mark_failed("a", "down");
        assert_eq!(queue.get("a").unwrap().attempt, 1);

        queue.requeue_fresh(pending("a", "c1"));
        let fresh = queue.get("a").unwrap();
        assert_eq!(fresh.attempt, 0);
        assert_eq!(fresh.state, SendState::Queued);
        assert_eq!(queue.queued_ids(), vec!["b", "a"]);
    }
}

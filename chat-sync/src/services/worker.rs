//! Async driver for outgoing sends and inbound transport events
//!
//! The worker never holds the session lock across an await on the transport or
//! the scheduler. Each lock scope covers exactly one session operation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Scheduler;
use crate::services::logger;
use crate::sync::action_queue::FailureOutcome;
use crate::sync::engine::{SyncEvent, SyncSession};
use crate::transport::{Transport, TransportEvent};
use crate::types::error::{Result, SyncError};

/// Final state of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The transport acknowledged the send
    Sent,
    /// Offline or otherwise not sendable right now; the record waits in the queue
    Deferred,
    /// Automatic retries were cancelled; only a manual resend will try again
    Cancelled,
    /// The pending send disappeared, e.g. the message was deleted
    Dropped,
}

/// Result of a single attempt
enum Attempt {
    Sent,
    Skipped,
    Cancelled,
    Failed(FailureOutcome),
}

pub struct SendWorker {
    session: Arc<Mutex<SyncSession>>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    ack_timeout: Duration,
}

impl SendWorker {
    pub fn new(
        session: Arc<Mutex<SyncSession>>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            session,
            transport,
            scheduler,
            ack_timeout,
        }
    }

    pub fn session(&self) -> &Arc<Mutex<SyncSession>> {
        &self.session
    }

    /// Deliver one message, retrying with backoff until it is sent or the bound is hit.
    ///
    /// Exceeding the bound is the only transport failure surfaced to the caller.
    pub async fn deliver(&self, client_id: &str) -> Result<Delivery> {
        loop {
            match self.attempt(client_id).await? {
                Attempt::Sent => return Ok(Delivery::Sent),
                Attempt::Skipped => return Ok(Delivery::Deferred),
                Attempt::Cancelled => return Ok(Delivery::Cancelled),
                Attempt::Failed(outcome) => match outcome {
                    FailureOutcome::Retry { attempt, delay } => {
                        debug!(
                            client_id = %client_id,
                            attempt,
                            "retrying in {}",
                            logger::fmt_ms(delay)
                        );
                        self.scheduler.sleep(delay).await;
                    }
                    FailureOutcome::Exhausted { attempts } => {
                        return Err(SyncError::RetryExhausted {
                            client_id: client_id.to_string(),
                            attempts,
                        });
                    }
                    FailureOutcome::Cancelled => return Ok(Delivery::Cancelled),
                    FailureOutcome::Requeued => return Ok(Delivery::Deferred),
                    FailureOutcome::Unknown => return Ok(Delivery::Dropped),
                },
            }
        }
    }

    /// Flush every queued send in submission order, one automatic attempt each.
    ///
    /// A send that fails but still has retries left goes back to the queue for the
    /// next flush.
    pub async fn flush_queued(&self) -> Vec<(String, Result<Delivery>)> {
        let ids = self.session.lock().await.queued_ids();
        if ids.is_empty() {
            return Vec::new();
        }
        info!(count = ids.len(), "flushing queued sends");

        let mut report = Vec::with_capacity(ids.len());
        for client_id in ids {
            let result = match self.attempt(&client_id).await {
                Ok(Attempt::Sent) => Ok(Delivery::Sent),
                Ok(Attempt::Skipped) => Ok(Delivery::Deferred),
                Ok(Attempt::Cancelled) => Ok(Delivery::Cancelled),
                Ok(Attempt::Failed(FailureOutcome::Retry { .. })) => {
                    self.session.lock().await.requeue(&client_id);
                    Ok(Delivery::Deferred)
                }
                Ok(Attempt::Failed(FailureOutcome::Exhausted { attempts })) => {
                    Err(SyncError::RetryExhausted {
                        client_id: client_id.clone(),
                        attempts,
                    })
                }
                Ok(Attempt::Failed(FailureOutcome::Cancelled)) => Ok(Delivery::Cancelled),
                Ok(Attempt::Failed(FailureOutcome::Requeued)) => Ok(Delivery::Deferred),
                Ok(Attempt::Failed(FailureOutcome::Unknown)) => Ok(Delivery::Dropped),
                Err(e) => Err(e),
            };
            report.push((client_id, result));
            self.scheduler.yield_now().await;
        }
        report
    }

    /// Feed transport events into the session until the channel closes.
    ///
    /// A `Connected` event triggers a flush of the queue.
    pub async fn run_events(&self, events: Receiver<TransportEvent>) {
        while let Ok(event) = events.recv_async().await {
            let reconnected = matches!(event, TransportEvent::Connected);
            self.session.lock().await.handle_event(event);

            if reconnected {
                for (client_id, result) in self.flush_queued().await {
                    if let Err(e) = result {
                        warn!(client_id = %client_id, "queued send failed: {}", e);
                    }
                }
            }
            self.scheduler.yield_now().await;
        }
        debug!("transport event channel closed");
    }

    /// Hand renderer notifications to `sink`, yielding between dispatches.
    pub async fn dispatch<F>(&self, notifications: Receiver<SyncEvent>, mut sink: F)
    where
        F: FnMut(SyncEvent) + Send,
    {
        while let Ok(event) = notifications.recv_async().await {
            sink(event);
            self.scheduler.yield_now().await;
        }
    }

    async fn attempt(&self, client_id: &str) -> Result<Attempt> {
        let payload = {
            let mut session = self.session.lock().await;
            match session.begin_send(client_id)? {
                Some(payload) => payload,
                None => {
                    let cancelled = session
                        .queue()
                        .get(client_id)
                        .map(|p| !p.auto_retry)
                        .unwrap_or(false);
                    return Ok(if cancelled {
                        Attempt::Cancelled
                    } else {
                        Attempt::Skipped
                    });
                }
            }
        };

        let started = Instant::now();
        let sent = tokio::time::timeout(
            self.ack_timeout,
            self.transport
                .send(&payload.conversation_id, &payload, client_id),
        )
        .await;
        let result = match sent {
            Ok(result) => result,
            Err(_) => Err(SyncError::AckTimeout(client_id.to_string())),
        };

        let mut session = self.session.lock().await;
        match result {
            Ok(ack) => {
                debug!(
                    client_id = %client_id,
                    "send acknowledged in {}",
                    logger::fmt_ms(started.elapsed())
                );
                session.handle_send_ack(ack);
                Ok(Attempt::Sent)
            }
            Err(e) => Ok(Attempt::Failed(session.handle_send_failure(client_id, &e))),
        }
    }
}

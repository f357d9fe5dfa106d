//! Time and scheduling seams
//!
//! The session reads wall-clock time through [`Clock`]; the send worker waits on
//! backoff delays and yields through [`Scheduler`]. Tests swap both for
//! deterministic versions.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(step, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Suspension points of the send worker
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Wait before the next retry
    async fn sleep(&self, delay: Duration);

    /// Let other tasks run between notification dispatches
    async fn yield_now(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}

/// Scheduler that returns immediately and remembers every requested delay
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    sleeps: Mutex<Vec<Duration>>,
    yields: AtomicUsize,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        match self.sleeps.lock() {
            Ok(sleeps) => sleeps.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn yields(&self) -> usize {
        self.yields.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, delay: Duration) {
        match self.sleeps.lock() {
            Ok(mut sleeps) => sleeps.push(delay),
            Err(poisoned) => poisoned.into_inner().push(delay),
        }
    }

    async fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }
}

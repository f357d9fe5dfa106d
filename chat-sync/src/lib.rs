//! chat-sync - client-side message lifecycle and conversation synchronization
//!
//! Keeps optimistic messages, delivery confirmations, unread counters and the
//! send queue consistent under reordered and duplicated transport events.
//!
//! ## Module Organization
//!
//! - `sync/`: Core state: store, reconciliation, conversation index, unread, queue, session
//! - `services/`: Async send worker and logging setup
//! - `types/`: Data structures, wire shapes and errors
//! - `config/`: Configuration management
//! - `transport`: Transport seam and inbound events
//! - `clock`: Clock and scheduler seams

pub mod clock;
pub mod config;
pub mod services;
pub mod sync;
pub mod transport;
pub mod types;

pub use clock::{Clock, ManualClock, RecordingScheduler, Scheduler, SystemClock, TokioScheduler};
pub use config::SyncConfig;
pub use services::worker::{Delivery, SendWorker};
pub use sync::engine::{SyncEvent, SyncSession};
pub use transport::{SendAck, Transport, TransportEvent};
pub use types::error::{Result, SyncError};
pub use types::{CurrentUser, Message, MessageKind, MessageStatus};

//! Client-side sync core
//!
//! Leaf modules first: ownership and status rules, then the store and the
//! reconciliation on top of it, the conversation index and unread aggregation,
//! the send queue, and finally the session that ties them together.

pub mod action_queue;
pub mod conversation;
pub mod engine;
pub mod ownership;
pub mod presence;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod unread;

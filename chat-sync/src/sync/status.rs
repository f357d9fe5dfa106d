//! Message status state machine
//!
//! Statuses advance along `sending(0) < sent(1) < delivered(2) < read(3)`.
//! `error` is a side branch reachable from `sending` or `sent` and is terminal;
//! only a manual resend puts the message back to `sending`, and that goes through
//! [`reset_for_resend`], not [`upgrade`].
//!
//! A rejected upgrade must produce no observable change at all. Duplicate and
//! reordered confirmations are the normal case, not the exception.

use serde::{Deserialize, Serialize};

use crate::types::MessageStatus;

impl MessageStatus {
    /// Position in the total order, `None` for `Error`.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Error => None,
        }
    }
}

/// Result of an upgrade attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpgrade {
    pub applied: bool,
    pub status: MessageStatus,
}

impl StatusUpgrade {
    fn applied(status: MessageStatus) -> Self {
        Self {
            applied: true,
            status,
        }
    }

    fn unchanged(status: MessageStatus) -> Self {
        Self {
            applied: false,
            status,
        }
    }
}

/// Compute the status after a requested transition.
pub fn upgrade(current: MessageStatus, requested: MessageStatus) -> StatusUpgrade {
    match (current.rank(), requested.rank()) {
        // Error only branches off before delivery
        (Some(cur), None) => {
            if cur <= 1 {
                StatusUpgrade::applied(MessageStatus::Error)
            } else {
                StatusUpgrade::unchanged(current)
            }
        }
        // Nothing leaves Error automatically
        (None, _) => StatusUpgrade::unchanged(current),
        (Some(cur), Some(req)) if req > cur => StatusUpgrade::applied(requested),
        _ => StatusUpgrade::unchanged(current),
    }
}

/// Status a message takes when the user manually resends it.
///
/// Only failed or still-unsent messages can be resent; anything the server has
/// already accepted returns `None`.
pub fn reset_for_resend(current: MessageStatus) -> Option<MessageStatus> {
    match current {
        MessageStatus::Error | MessageStatus::Sending => Some(MessageStatus::Sending),
        _ => None,
    }
}

//! Reconciliation of inbound confirmations against stored messages
//!
//! Transports echo ids inconsistently, so a confirmation is matched with a chain
//! of strategies, first hit wins:
//!
//! 1. exact server id
//! 2. exact client id
//! 3. the echoed client id used as a server id (servers that echo their own id)
//! 4. prefix of the temporal segment of the client id (truncated echoes)
//!
//! Events that match nothing are orphans. They are logged and dropped; they never
//! create a message and never surface as an error.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sync::store::{MessageStore, PrefixMatch};
use crate::types::error::SyncError;
use crate::types::wire::Confirmation;
use crate::types::MessageStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    ServerId,
    ClientId,
    ClientIdAsServerId,
    TemporalPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The status advanced
    Applied {
        client_id: String,
        status: MessageStatus,
        strategy: MatchStrategy,
    },
    /// Matched, but the status did not move (duplicate or stale event)
    Unchanged {
        client_id: String,
        server_id_assigned: bool,
    },
    Orphan,
}

impl ReconcileOutcome {
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::Applied { client_id, .. } | Self::Unchanged { client_id, .. } => {
                Some(client_id)
            }
            Self::Orphan => None,
        }
    }
}

/// Find the stored message a confirmation refers to.
pub fn find_match(
    store: &MessageStore,
    confirmation: &Confirmation,
    prefix_min_len: usize,
) -> Option<(String, MatchStrategy)> {
    let server_id = confirmation.server_id.as_deref().filter(|s| !s.is_empty());
    let client_id = confirmation.client_id.as_deref().filter(|s| !s.is_empty());

    if let Some(found) = server_id.and_then(|sid| store.find_by_server_id(sid)) {
        return Some((found.to_string(), MatchStrategy::ServerId));
    }

    let client_id = client_id?;

    if store.contains(client_id) {
        return Some((client_id.to_string(), MatchStrategy::ClientId));
    }

    if let Some(found) = store.find_by_server_id(client_id) {
        return Some((found.to_string(), MatchStrategy::ClientIdAsServerId));
    }

    match store.find_by_temporal_prefix(client_id, prefix_min_len) {
        PrefixMatch::Unique(found) => Some((found, MatchStrategy::TemporalPrefix)),
        PrefixMatch::Ambiguous(count) => {
            warn!(
                client_id = %client_id,
                candidates = count,
                "ambiguous temporal prefix, not matching"
            );
            None
        }
        PrefixMatch::None => None,
    }
}

/// Apply a confirmation to the store.
pub fn reconcile(
    store: &mut MessageStore,
    confirmation: &Confirmation,
    prefix_min_len: usize,
) -> ReconcileOutcome {
    let Some((client_id, strategy)) = find_match(store, confirmation, prefix_min_len) else {
        let orphan = SyncError::OrphanEvent(confirmation.describe());
        warn!("{}, discarding", orphan);
        return ReconcileOutcome::Orphan;
    };

    let mut server_id_assigned = false;
    if let Some(server_id) = confirmation.server_id.as_deref().filter(|s| !s.is_empty()) {
        let has_server_id = store
            .get(&client_id)
            .map(|m| m.server_id.is_some())
            .unwrap_or(true);
        if !has_server_id {
            server_id_assigned = store.assign_server_id(&client_id, server_id);
        }
    }

    match store.upgrade_status(&client_id, confirmation.status) {
        Some(result) if result.applied => {
            debug!(
                client_id = %client_id,
                status = %result.status,
                ?strategy,
                "confirmation applied"
            );
            ReconcileOutcome::Applied {
                client_id,
                status: result.status,
                strategy,
            }
        }
        _ => {
            debug!(
                client_id = %client_id,
                requested = %confirmation.status,
                "confirmation did not advance status"
            );
            ReconcileOutcome::Unchanged {
                client_id,
                server_id_assigned,
            }
        }
    }
}

//! Peer presence based on last-seen timestamps
//!
//! One threshold decides whether a peer counts as online. It comes from
//! [`SyncConfig::presence_threshold_secs`](crate::config::SyncConfig).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug)]
pub struct PresenceTracker {
    threshold: Duration,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl PresenceTracker {
    pub fn new(threshold_secs: u64) -> Self {
        Self {
            threshold: i64::try_from(threshold_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            last_seen: HashMap::new(),
        }
    }

    /// Record activity for a peer. Older timestamps than the stored one are ignored.
    pub fn record(&mut self, user_id: &str, at: DateTime<Utc>) {
        let entry = self.last_seen.entry(user_id.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).copied()
    }

    pub fn is_online(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        self.last_seen(user_id)
            .map(|seen| now.signed_duration_since(seen) <= self.threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_threshold() {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut presence = PresenceTracker::new(120);
        assert!(!presence.is_online("bob", base));

        presence.record("bob", base);
        assert!(presence.is_online("bob", base + Duration::seconds(120)));
        assert!(!presence.is_online("bob", base + Duration::seconds(121)));
    }

    #[test]
    fn test_stale_record_ignored() {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut presence = PresenceTracker::new(300);
        presence.record("bob", base);
        presence.record("bob", base - Duration::seconds(60));
        assert_eq!(presence.last_seen("bob"), Some(base));
    }

    #[test]
    fn test_huge_threshold_saturates() {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut presence = PresenceTracker::new(u64::MAX);
        presence.record("bob", base);
        assert!(presence.is_online("bob", base + Duration::days(365 * 100)));
    }
}

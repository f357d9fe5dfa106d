//! Global unread aggregation
//!
//! The global count is always derived from the conversation index, never stored
//! independently. The aggregator only remembers the last published value so the
//! session can tell whether a `GlobalUnreadChanged` notification is due.

use crate::sync::conversation::ConversationIndex;

/// Sum of every conversation's unread count.
pub fn recompute(index: &ConversationIndex) -> u32 {
    index
        .unread_counts()
        .fold(0u32, |total, count| total.saturating_add(count))
}

/// Render a count for a badge, capping at `cap` (`"99+"` for the default cap).
pub fn format_badge(count: u32, cap: u32) -> String {
    if count > cap {
        format!("{}+", cap)
    } else {
        count.to_string()
    }
}

#[derive(Debug, Default)]
pub struct UnreadAggregator {
    last: u32,
}

impl UnreadAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published total
    pub fn total(&self) -> u32 {
        self.last
    }

    /// Recompute from the index. Returns the new total if it differs from the last one.
    pub fn refresh(&mut self, index: &ConversationIndex) -> Option<u32> {
        let total = recompute(index);
        if total == self.last {
            return None;
        }
        self.last = total;
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::conversation::ConversationPatch;

    fn with_unread(counts: &[u32]) -> ConversationIndex {
        let mut index = ConversationIndex::new();
        for (i, count) in counts.iter().enumerate() {
            index.upsert(
                &format!("c{}", i),
                ConversationPatch {
                    unread_count: Some(*count),
                    ..Default::default()
                },
            );
        }
        index
    }

    #[test]
    fn test_recompute_sums_all() {
        assert_eq!(recompute(&ConversationIndex::new()), 0);
        assert_eq!(recompute(&with_unread(&[0, 0])), 0);
        assert_eq!(recompute(&with_unread(&[3, 0, 7, 1])), 11);
    }

    #[test]
    fn test_format_badge() {
        assert_eq!(format_badge(0, 99), "0");
        assert_eq!(format_badge(99, 99), "99");
        assert_eq!(format_badge(100, 99), "99+");
        assert_eq!(format_badge(12_345, 99), "99+");
        assert_eq!(format_badge(10, 9), "9+");
    }

    #[test]
    fn test_refresh_reports_only_changes() {
        let mut aggregator = UnreadAggregator::new();
        let mut index = with_unread(&[2, 3]);

        assert_eq!(aggregator.refresh(&index), Some(5));
        assert_eq!(aggregator.refresh(&index), None);

        index.mark_read("c0", chrono::Utc::now()).unwrap();
        assert_eq!(aggregator.refresh(&index), Some(3));
        assert_eq!(aggregator.total(), 3);
    }
}

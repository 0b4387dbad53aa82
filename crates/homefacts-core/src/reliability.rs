use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::adapter::FetchStatus;
use crate::SourceId;

/// Lookups a demoted source sits out before it is given another turn.
pub const RECOVERY_LOOKUPS: u32 = 3;

/// Counters for one source, accumulated across lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilitySnapshot {
    pub successes: u64,
    pub terminal_failures: u64,
    pub transient_failures: u64,
    /// `Blocked` or `NoCapacity` results since the last success.
    pub consecutive_refusals: u32,
    /// Lookups skipped while demoted, since the last refusal.
    pub passed_over: u32,
}

/// Thread-safe per-source reliability counters.
///
/// Consecutive refusals (`Blocked`, `NoCapacity`) push a source behind its
/// equal-tier peers in the priority plan. `NotFound` is counted but never
/// demotes: it says nothing about whether the source is serving us. A
/// demoted source that has been passed over for [`RECOVERY_LOOKUPS`]
/// lookups gets its place back for one attempt; one success clears the
/// streak. Tier ordering itself is never affected.
#[derive(Debug, Default)]
pub struct ReliabilityTracker {
    inner: Mutex<HashMap<SourceId, ReliabilitySnapshot>>,
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: SourceId, status: FetchStatus) {
        let mut inner = self.lock();
        let entry = inner.entry(source).or_default();
        if status == FetchStatus::Success {
            entry.successes = entry.successes.saturating_add(1);
            entry.consecutive_refusals = 0;
            entry.passed_over = 0;
        } else if status.is_terminal_failure() {
            entry.terminal_failures = entry.terminal_failures.saturating_add(1);
            if status.signals_unreliability() {
                entry.consecutive_refusals = entry.consecutive_refusals.saturating_add(1);
                entry.passed_over = 0;
            }
        } else {
            entry.transient_failures = entry.transient_failures.saturating_add(1);
        }
    }

    /// Notes a lookup that ended before reaching `source`.
    pub fn record_passed_over(&self, source: SourceId) {
        let mut inner = self.lock();
        if let Some(entry) = inner.get_mut(&source) {
            if entry.consecutive_refusals > 0 {
                entry.passed_over = entry.passed_over.saturating_add(1);
            }
        }
    }

    /// Tie-break penalty; larger values sort later within a tier.
    pub fn penalty(&self, source: SourceId) -> u32 {
        let snapshot = self.snapshot(source);
        if snapshot.passed_over >= RECOVERY_LOOKUPS {
            return 0;
        }
        snapshot.consecutive_refusals
    }

    pub fn snapshot(&self, source: SourceId) -> ReliabilitySnapshot {
        self.lock().get(&source).copied().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SourceId, ReliabilitySnapshot>> {
        self.inner.lock().expect("reliability lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_accumulate_until_success() {
        let tracker = ReliabilityTracker::new();

        tracker.record(SourceId::Zoopla, FetchStatus::Blocked);
        tracker.record(SourceId::Zoopla, FetchStatus::NoCapacity);
        assert_eq!(tracker.penalty(SourceId::Zoopla), 2);

        tracker.record(SourceId::Zoopla, FetchStatus::Timeout);
        tracker.record(SourceId::Zoopla, FetchStatus::NotFound);
        assert_eq!(tracker.penalty(SourceId::Zoopla), 2);

        tracker.record(SourceId::Zoopla, FetchStatus::Success);
        let snapshot = tracker.snapshot(SourceId::Zoopla);
        assert_eq!(snapshot.consecutive_refusals, 0);
        assert_eq!(snapshot.terminal_failures, 3);
        assert_eq!(snapshot.transient_failures, 1);
        assert_eq!(snapshot.successes, 1);
    }

    #[test]
    fn not_found_never_demotes() {
        let tracker = ReliabilityTracker::new();
        tracker.record(SourceId::Rightmove, FetchStatus::NotFound);
        tracker.record(SourceId::Rightmove, FetchStatus::NotFound);
        assert_eq!(tracker.penalty(SourceId::Rightmove), 0);
    }

    #[test]
    fn penalty_lapses_after_enough_passed_over_lookups() {
        let tracker = ReliabilityTracker::new();
        tracker.record(SourceId::Rightmove, FetchStatus::Blocked);

        for _ in 1..RECOVERY_LOOKUPS {
            tracker.record_passed_over(SourceId::Rightmove);
            assert_eq!(tracker.penalty(SourceId::Rightmove), 1);
        }
        tracker.record_passed_over(SourceId::Rightmove);
        assert_eq!(tracker.penalty(SourceId::Rightmove), 0);

        // Refused again on its second chance: demoted afresh.
        tracker.record(SourceId::Rightmove, FetchStatus::Blocked);
        assert_eq!(tracker.penalty(SourceId::Rightmove), 2);
    }

    #[test]
    fn passing_over_a_healthy_source_changes_nothing() {
        let tracker = ReliabilityTracker::new();
        tracker.record(SourceId::Zoopla, FetchStatus::Success);
        tracker.record_passed_over(SourceId::Zoopla);
        tracker.record_passed_over(SourceId::LandRegistry);
        assert_eq!(tracker.snapshot(SourceId::Zoopla).passed_over, 0);
        assert_eq!(tracker.penalty(SourceId::LandRegistry), 0);
    }
}

//! Sliding-window request log for one caller and one bucket.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::fmt;

/// A key that uniquely identifies one window in the store.
///
/// The key is composed of the caller identity and the bucket (policy tier)
/// the request was counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Caller identity, e.g. `ip:203.0.113.9` or `sub:student-42`
    pub identity: String,
    /// Bucket the request is limited under, e.g. `PAYMENT_CREATE`
    pub bucket: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(identity: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            bucket: bucket.into(),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bucket, self.identity)
    }
}

/// Result of trying to record one request in a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether the request was admitted and recorded
    pub admitted: bool,
    /// Requests counted in the window after this call
    pub count: u32,
    /// When the oldest counted request leaves the window
    pub reset_at: DateTime<Utc>,
}

/// Read-only view of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests counted in the window
    pub count: u32,
    /// Arrival time of the oldest counted request
    pub oldest: Option<DateTime<Utc>>,
}

/// One caller's request history for one bucket.
///
/// Holds the arrival time of every admitted request that is still inside
/// the window. A timestamp `t` is inside the window at `now` when
/// `now - window < t <= now`.
#[derive(Debug, Clone)]
pub struct RateWindowEntry {
    window: Duration,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl RateWindowEntry {
    /// Create an empty entry for a window of the given length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Window length for this entry.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Latest instant that is already outside the window at `now`.
    ///
    /// `None` when the window reaches back past the earliest representable
    /// time, in which case nothing has expired.
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.window)
    }

    /// Drop timestamps that have left the window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = self.cutoff(now) else {
            return;
        };
        while self.timestamps.front().is_some_and(|&t| t <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Record one request if fewer than `limit` are already counted.
    ///
    /// Denied requests are not recorded, so a caller hammering a closed
    /// window does not push its own reset further out.
    pub fn try_record(&mut self, now: DateTime<Utc>, limit: u32) -> WindowOutcome {
        self.prune(now);

        let admitted = self.timestamps.len() < limit as usize;
        if admitted {
            // Callers read the clock before taking the lock, so a later
            // caller may arrive with an earlier instant. Clamp to keep the
            // log sorted.
            let at = self.timestamps.back().map_or(now, |&newest| newest.max(now));
            self.timestamps.push_back(at);
        }

        WindowOutcome {
            admitted,
            count: self.timestamps.len() as u32,
            reset_at: self.reset_at(now),
        }
    }

    /// Count and oldest timestamp as seen at `now`, without mutating.
    pub fn snapshot(&self, now: DateTime<Utc>) -> WindowSnapshot {
        let cutoff = self.cutoff(now);
        let mut live = self
            .timestamps
            .iter()
            .filter(|&&t| cutoff.map_or(true, |cutoff| t > cutoff));
        let oldest = live.next().copied();
        let count = oldest.map_or(0, |_| 1 + live.count() as u32);
        WindowSnapshot { count, oldest }
    }

    /// When the oldest counted request exits the window.
    pub fn reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamps
            .front()
            .copied()
            .unwrap_or(now)
            .checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether no counted request remains inside the window.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match (self.timestamps.back(), self.cutoff(now)) {
            (None, _) => true,
            (Some(&newest), Some(cutoff)) => newest <= cutoff,
            (Some(_), None) => false,
        }
    }

    /// Number of retained timestamps, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the entry holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_window_key_display() {
        let key = WindowKey::new("ip:10.0.0.1", "AUTH");
        assert_eq!(key.to_string(), "AUTH:ip:10.0.0.1");
    }

    #[test]
    fn test_record_within_limit() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));

        for expected in 1..=3 {
            let outcome = entry.try_record(t0(), 3);
            assert!(outcome.admitted);
            assert_eq!(outcome.count, expected);
        }

        let outcome = entry.try_record(t0(), 3);
        assert!(!outcome.admitted);
        assert_eq!(outcome.count, 3);
        assert_eq!(entry.len(), 3);
    }

    #[test]
    fn test_reset_tracks_oldest_request() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        entry.try_record(t0(), 2);
        entry.try_record(t0() + Duration::seconds(20), 2);

        let denied = entry.try_record(t0() + Duration::seconds(30), 2);
        assert!(!denied.admitted);
        assert_eq!(denied.reset_at, t0() + Duration::seconds(60));
    }

    #[test]
    fn test_window_boundary_is_exclusive_of_old_edge() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        entry.try_record(t0(), 1);

        // Exactly one window later the first request no longer counts
        let outcome = entry.try_record(t0() + Duration::seconds(60), 1);
        assert!(outcome.admitted);
        assert_eq!(outcome.count, 1);
    }

    #[test]
    fn test_just_inside_boundary_still_counts() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        entry.try_record(t0(), 1);

        let outcome = entry.try_record(t0() + Duration::milliseconds(59_999), 1);
        assert!(!outcome.admitted);
    }

    #[test]
    fn test_sliding_not_fixed() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        entry.try_record(t0(), 2);
        entry.try_record(t0() + Duration::seconds(40), 2);

        // At t=70 only the t=40 request remains, so one slot frees up
        let outcome = entry.try_record(t0() + Duration::seconds(70), 2);
        assert!(outcome.admitted);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.reset_at, t0() + Duration::seconds(100));
    }

    #[test]
    fn test_snapshot_ignores_expired() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        entry.try_record(t0(), 5);
        entry.try_record(t0() + Duration::seconds(30), 5);

        let snap = entry.snapshot(t0() + Duration::seconds(65));
        assert_eq!(snap.count, 1);
        assert_eq!(snap.oldest, Some(t0() + Duration::seconds(30)));

        let snap = entry.snapshot(t0() + Duration::seconds(120));
        assert_eq!(snap.count, 0);
        assert_eq!(snap.oldest, None);
    }

    #[test]
    fn test_staleness() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        assert!(entry.is_stale(t0()));

        entry.try_record(t0(), 5);
        assert!(!entry.is_stale(t0() + Duration::seconds(59)));
        assert!(entry.is_stale(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_out_of_order_instants_keep_log_sorted() {
        let mut entry = RateWindowEntry::new(Duration::seconds(60));
        entry.try_record(t0() + Duration::seconds(10), 5);
        // Read before the first caller took the lock, recorded after it
        entry.try_record(t0() + Duration::seconds(5), 5);

        // Neither request may be dropped while the t=10 one is live
        assert!(!entry.is_stale(t0() + Duration::seconds(68)));
        entry.prune(t0() + Duration::seconds(66));
        assert_eq!(entry.len(), 2);
        assert_eq!(entry.snapshot(t0() + Duration::seconds(66)).count, 2);

        // Both leave together once the newest has expired
        assert!(entry.is_stale(t0() + Duration::seconds(70)));
        entry.prune(t0() + Duration::seconds(70));
        assert!(entry.is_empty());
    }

    #[test]
    fn test_window_reaching_past_min_time_does_not_panic() {
        let mut entry = RateWindowEntry::new(Duration::days(365));
        let now = DateTime::<Utc>::MIN_UTC + Duration::days(1);

        let outcome = entry.try_record(now, 1);
        assert!(outcome.admitted);
        assert!(!entry.is_stale(now));
        assert_eq!(entry.snapshot(now).count, 1);

        let late = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let mut entry = RateWindowEntry::new(Duration::days(365));
        assert_eq!(entry.try_record(late, 1).reset_at, DateTime::<Utc>::MAX_UTC);
    }
}

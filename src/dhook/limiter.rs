//! Sliding-window rate limiters for the global and per-webhook limits.
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

pub const GLOBAL_PERIOD_SECS: i64 = 1;
pub const GLOBAL_REQUESTS: usize = 50;
pub const WEBHOOK_PERIOD_SECS: i64 = 60;
pub const WEBHOOK_REQUESTS: usize = 30;

/// Tracks request timestamps inside a sliding window.
#[derive(Debug)]
pub struct SlidingWindow {
    stamps: Vec<DateTime<Utc>>,
    period: TimeDelta,
    requests: usize,
    name: &'static str,
}

impl SlidingWindow {
    pub fn global() -> Self {
        Self::new(
            TimeDelta::seconds(GLOBAL_PERIOD_SECS),
            GLOBAL_REQUESTS,
            "global",
        )
    }

    pub fn webhook() -> Self {
        Self::new(
            TimeDelta::seconds(WEBHOOK_PERIOD_SECS),
            WEBHOOK_REQUESTS,
            "webhook",
        )
    }

    pub fn new(period: TimeDelta, requests: usize, name: &'static str) -> Self {
        Self {
            stamps: Vec::new(),
            period,
            requests,
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records the time of a request.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.stamps.push(now);
    }

    /// Reports how many requests remain in the window and how long until
    /// the limit resets. Drops timestamps that left the window.
    pub fn calc(&mut self, now: DateTime<Utc>) -> (usize, Duration) {
        let deadline = now - self.period;
        self.stamps.retain(|t| *t > deadline);
        let remaining = self.requests.saturating_sub(self.stamps.len());
        let reset = match self.stamps.iter().min() {
            None => Duration::ZERO,
            Some(oldest) => round_up_to_second(*oldest + self.period - now),
        };
        (remaining, reset)
    }
}

/// Rounds a duration up to the next whole second. Non-positive durations
/// collapse to zero.
pub fn round_up_to_second(d: TimeDelta) -> Duration {
    let ms = d.num_milliseconds();
    if ms <= 0 {
        return Duration::ZERO;
    }
    Duration::from_secs((ms as u64).div_ceil(1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 22, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_window_has_full_budget() {
        let mut l = SlidingWindow::new(TimeDelta::seconds(60), 30, "test");
        let (remaining, reset) = l.calc(t0());
        assert_eq!(remaining, 30);
        assert_eq!(reset, Duration::ZERO);
    }

    #[test]
    fn records_reduce_remaining() {
        let mut l = SlidingWindow::new(TimeDelta::seconds(60), 30, "test");
        for _ in 0..10 {
            l.record(t0());
        }
        let (remaining, _) = l.calc(t0() + TimeDelta::seconds(1));
        assert_eq!(remaining, 20);
    }

    #[test]
    fn exhausted_window_reports_reset() {
        let mut l = SlidingWindow::new(TimeDelta::seconds(60), 2, "test");
        l.record(t0());
        l.record(t0() + TimeDelta::seconds(5));
        let now = t0() + TimeDelta::seconds(10);
        let (remaining, reset) = l.calc(now);
        assert_eq!(remaining, 0);
        // Oldest stamp leaves the window 50s from now.
        assert_eq!(reset, Duration::from_secs(50));
    }

    #[test]
    fn stale_entries_are_dropped() {
        let mut l = SlidingWindow::new(TimeDelta::seconds(60), 2, "test");
        l.record(t0());
        l.record(t0());
        let (remaining, reset) = l.calc(t0() + TimeDelta::seconds(61));
        assert_eq!(remaining, 2);
        assert_eq!(reset, Duration::ZERO);
    }

    #[test]
    fn reset_rounds_up_to_whole_seconds() {
        let mut l = SlidingWindow::new(TimeDelta::seconds(60), 1, "test");
        l.record(t0());
        let now = t0() + TimeDelta::milliseconds(500);
        let (_, reset) = l.calc(now);
        assert_eq!(reset, Duration::from_secs(60));
    }

    #[test]
    fn round_up_handles_negative() {
        assert_eq!(round_up_to_second(TimeDelta::seconds(-3)), Duration::ZERO);
        assert_eq!(
            round_up_to_second(TimeDelta::milliseconds(1)),
            Duration::from_secs(1)
        );
        assert_eq!(
            round_up_to_second(TimeDelta::seconds(2)),
            Duration::from_secs(2)
        );
    }
}

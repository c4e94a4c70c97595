//! Cooldown after the API returned a 429. While active, no request is made.
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::limiter::round_up_to_second;

#[derive(Debug, Default)]
pub struct Cooldown {
    reset_at: Option<DateTime<Utc>>,
}

impl Cooldown {
    /// Remaining cooldown, or `None` when inactive. An expired marker is
    /// cleared on read.
    pub fn retry_after(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.reset_at?;
        if at <= now {
            self.reset_at = None;
            return None;
        }
        Some(round_up_to_second(at - now))
    }

    pub fn set(&mut self, until: DateTime<Utc>) {
        self.reset_at = Some(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn inactive_by_default() {
        let mut c = Cooldown::default();
        assert!(c.retry_after(Utc::now()).is_none());
    }

    #[test]
    fn active_until_reset_then_clears() {
        let now = Utc::now();
        let mut c = Cooldown::default();
        c.set(now + TimeDelta::seconds(2));
        assert_eq!(c.retry_after(now), Some(Duration::from_secs(2)));
        assert!(c.retry_after(now + TimeDelta::seconds(3)).is_none());
        // Cleared after expiry.
        assert!(c.retry_after(now).is_none());
    }
}

//! `Clock` implementation backed by the system wall clock.
use chrono::{DateTime, Utc};

use crate::ports::clock::Clock;

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

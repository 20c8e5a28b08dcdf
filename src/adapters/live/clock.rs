//! System clock.

use chrono::{DateTime, Utc};

use crate::ports::Clock;

/// Reads the wall clock; used to stamp `last_checked` and `last_changed`.
pub struct LiveClock;

impl Clock for LiveClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

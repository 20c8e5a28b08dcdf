//! Recording adapter for the `Clock` port.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::record_interaction;
use crate::cassette::recorder::CassetteRecorder;
use crate::ports::Clock;

/// Records every time reading.
pub struct RecordingClock {
    inner: Box<dyn Clock>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingClock {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn Clock>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

impl Clock for RecordingClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.inner.now();
        record_interaction(&self.recorder, "clock", "now", &(), &now);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::live::LiveClock;
    use crate::adapters::recording::test_support;

    #[test]
    fn records_the_time_it_returned() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = test_support::recorder(&dir.path().join("clock.cassette.yaml"));

        let now = RecordingClock::new(Box::new(LiveClock), Arc::clone(&recorder)).now();

        let cassette = test_support::finish(recorder);
        let recorded: DateTime<Utc> =
            serde_json::from_value(cassette.interactions[0].output.clone()).unwrap();
        assert_eq!(recorded, now);
    }
}

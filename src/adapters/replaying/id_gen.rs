//! Replaying adapter for the `IdGenerator` port.

use std::sync::Mutex;

use super::next_output;
use crate::cassette::replayer::CassetteReplayer;
use crate::ports::IdGenerator;

/// Serves recorded ids.
pub struct ReplayingIdGenerator {
    replayer: Mutex<CassetteReplayer>,
}

impl ReplayingIdGenerator {
    /// Creates a generator over `replayer`.
    #[must_use]
    pub fn new(replayer: CassetteReplayer) -> Self {
        Self {
            replayer: Mutex::new(replayer),
        }
    }
}

impl IdGenerator for ReplayingIdGenerator {
    fn generate_id(&self) -> String {
        let output = next_output(&self.replayer, "id_gen", "generate_id");
        output
            .as_str()
            .expect("id_gen::generate_id: recorded value is not a string")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::replaying::test_support::replayer;
    use serde_json::json;

    #[test]
    fn serves_recorded_ids() {
        let outputs = vec![json!("p-1"), json!("c-1")];
        let ids = ReplayingIdGenerator::new(replayer("id_gen", "generate_id", outputs));
        assert_eq!(ids.generate_id(), "p-1");
        assert_eq!(ids.generate_id(), "c-1");
    }
}

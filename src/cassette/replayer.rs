//! Replays recorded interactions from a cassette.

use std::collections::{HashMap, VecDeque};

use super::format::{Cassette, Interaction};

/// Serves a cassette's interactions back, one queue per port/method pair, so
/// interleaving between ports does not have to match the recording exactly.
pub struct CassetteReplayer {
    name: String,
    queues: HashMap<(String, String), VecDeque<Interaction>>,
}

impl CassetteReplayer {
    /// Creates a replayer over a loaded cassette.
    #[must_use]
    pub fn new(cassette: &Cassette) -> Self {
        let mut queues: HashMap<(String, String), VecDeque<Interaction>> = HashMap::new();
        for interaction in &cassette.interactions {
            queues
                .entry((interaction.port.clone(), interaction.method.clone()))
                .or_default()
                .push_back(interaction.clone());
        }
        Self {
            name: cassette.name.clone(),
            queues,
        }
    }

    /// Takes the next interaction recorded for `port`/`method`.
    ///
    /// # Panics
    ///
    /// Panics when the cassette has nothing (left) for that pair. A replayed
    /// run asking for more than was recorded is a broken fixture, and the
    /// message lists what the cassette does hold.
    pub fn next_interaction(&mut self, port: &str, method: &str) -> Interaction {
        let key = (port.to_string(), method.to_string());
        if let Some(interaction) = self.queues.get_mut(&key).and_then(VecDeque::pop_front) {
            return interaction;
        }

        let mut remaining: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|((p, m), queue)| format!("{p}::{m} x{}", queue.len()))
            .collect();
        remaining.sort();
        panic!(
            "Cassette exhausted: {name:?} has no interactions left for port={port:?} \
             method={method:?}. Remaining: [{}]",
            remaining.join(", "),
            name = self.name,
        );
    }

    /// Output of the next interaction for `port`/`method`.
    pub fn next_output(&mut self, port: &str, method: &str) -> serde_json::Value {
        self.next_interaction(port, method).output
    }

    /// Number of interactions not yet served.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cassette() -> Cassette {
        Cassette::from_interactions(
            "test",
            vec![
                (
                    "http".into(),
                    "send".into(),
                    json!({"url": "a"}),
                    json!({"ok": "first"}),
                ),
                (
                    "clock".into(),
                    "now".into(),
                    json!({}),
                    json!("2024-01-01T00:00:00Z"),
                ),
                (
                    "http".into(),
                    "send".into(),
                    json!({"url": "b"}),
                    json!({"ok": "second"}),
                ),
            ],
        )
    }

    #[test]
    fn serves_each_pair_in_recorded_order() {
        let mut replayer = CassetteReplayer::new(&cassette());

        // The clock can be asked first even though it was recorded second.
        assert_eq!(
            replayer.next_output("clock", "now"),
            json!("2024-01-01T00:00:00Z")
        );
        assert_eq!(replayer.next_output("http", "send"), json!({"ok": "first"}));
        assert_eq!(
            replayer.next_output("http", "send"),
            json!({"ok": "second"})
        );
        assert_eq!(replayer.remaining(), 0);
    }

    #[test]
    #[should_panic(expected = "Cassette exhausted")]
    fn asking_past_the_end_panics() {
        let mut replayer = CassetteReplayer::new(&cassette());
        let _ = replayer.next_interaction("clock", "now");
        let _ = replayer.next_interaction("clock", "now");
    }

    #[test]
    #[should_panic(expected = "http::send x2")]
    fn panic_lists_what_is_left() {
        let mut replayer = CassetteReplayer::new(&cassette());
        let _ = replayer.next_interaction("fs", "read_to_string");
    }
}

//! Cassette data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One call made through a port, with what it returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    /// Position in the recording, assigned by the recorder.
    pub seq: u64,
    /// Port name (`http`, `fs`, `clock`, `id_gen`).
    pub port: String,
    /// Method invoked on the port.
    pub method: String,
    /// Arguments of the call.
    pub input: serde_json::Value,
    /// Returned value. Fallible calls use `{"ok": ..}` / `{"err": ..}`.
    pub output: serde_json::Value,
}

/// A named, ordered list of interactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cassette {
    /// Human-readable name.
    pub name: String,
    /// When the recording finished.
    pub recorded_at: DateTime<Utc>,
    /// Tracker instance the recording was made against, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    /// Interactions in call order.
    pub interactions: Vec<Interaction>,
}

/// `(port, method, input, output)` of one interaction before numbering.
pub type RawInteraction = (String, String, serde_json::Value, serde_json::Value);

impl Cassette {
    /// Builds an in-memory cassette, numbering the interactions in order.
    pub fn from_interactions(
        name: impl Into<String>,
        interactions: impl IntoIterator<Item = RawInteraction>,
    ) -> Self {
        let interactions = interactions
            .into_iter()
            .zip(0u64..)
            .map(|((port, method, input, output), seq)| Interaction {
                seq,
                port,
                method,
                input,
                output,
            })
            .collect();
        Self {
            name: name.into(),
            recorded_at: Utc::now(),
            tracker: None,
            interactions,
        }
    }
}

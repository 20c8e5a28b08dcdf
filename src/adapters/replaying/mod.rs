//! Replaying adapters: answer port calls from a cassette instead of the world.
//!
//! A replayed call that finds nothing left in its cassette panics; see
//! [`CassetteReplayer::next_interaction`].

pub mod clock;
pub mod filesystem;
pub mod http;
pub mod id_gen;

use std::sync::Mutex;

use crate::cassette::replayer::CassetteReplayer;

pub use clock::ReplayingClock;
pub use filesystem::ReplayingFileSystem;
pub use http::ReplayingHttpClient;
pub use id_gen::ReplayingIdGenerator;

/// Takes the output of the next `port`/`method` interaction.
pub(crate) fn next_output(
    replayer: &Mutex<CassetteReplayer>,
    port: &str,
    method: &str,
) -> serde_json::Value {
    let mut replayer = replayer.lock().expect("replayer lock poisoned");
    replayer.next_output(port, method)
}

/// Splits a recorded `{"ok": ..}` / `{"err": ..}` output.
pub(crate) fn split_result(
    output: serde_json::Value,
) -> Result<serde_json::Value, serde_json::Value> {
    match output {
        serde_json::Value::Object(mut map) => {
            if let Some(err) = map.remove("err") {
                Err(err)
            } else {
                Ok(map.remove("ok").unwrap_or(serde_json::Value::Null))
            }
        }
        other => Ok(other),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_result_reads_both_shapes() {
        assert_eq!(split_result(json!({"ok": 3})), Ok(json!(3)));
        assert_eq!(split_result(json!({"err": "gone"})), Err(json!("gone")));
        assert_eq!(split_result(json!({"ok": null})), Ok(json!(null)));
    }
}

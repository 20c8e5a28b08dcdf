//! Recording adapters: delegate to an inner port and write every call to a
//! cassette.

pub mod clock;
pub mod filesystem;
pub mod http;
pub mod id_gen;

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::cassette::recorder::CassetteRecorder;

pub use clock::RecordingClock;
pub use filesystem::RecordingFileSystem;
pub use http::RecordingHttpClient;
pub use id_gen::RecordingIdGenerator;

/// Records a call whose return value is not a `Result`.
pub(crate) fn record_interaction<I, O>(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    port: &str,
    method: &str,
    input: &I,
    output: &O,
) where
    I: Serialize,
    O: Serialize,
{
    let input_json = serde_json::to_value(input).unwrap_or(serde_json::Value::Null);
    let output_json = serde_json::to_value(output).unwrap_or(serde_json::Value::Null);
    if let Ok(mut guard) = recorder.lock() {
        guard.record(port, method, input_json, output_json);
    }
}

/// Records a fallible call as `{"ok": value}` or `{"err": error}`.
///
/// Errors are stored through `err_value`, so ports with structured errors
/// (HTTP) keep their shape while the rest store the message text.
pub(crate) fn record_result<T, E, I>(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    port: &str,
    method: &str,
    input: &I,
    result: &Result<T, E>,
    err_value: impl Fn(&E) -> serde_json::Value,
) where
    T: Serialize,
    I: Serialize,
{
    let input_json = serde_json::to_value(input).unwrap_or(serde_json::Value::Null);
    let output_json = match result {
        Ok(v) => {
            let value = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
            serde_json::json!({ "ok": value })
        }
        Err(e) => serde_json::json!({ "err": err_value(e) }),
    };
    if let Ok(mut guard) = recorder.lock() {
        guard.record(port, method, input_json, output_json);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use crate::cassette::format::Cassette;
    use crate::cassette::recorder::CassetteRecorder;

    pub fn recorder(path: &Path) -> Arc<Mutex<CassetteRecorder>> {
        Arc::new(Mutex::new(CassetteRecorder::new(path, "test")))
    }

    /// Finishes the recorder and reads the cassette back.
    pub fn finish(recorder: Arc<Mutex<CassetteRecorder>>) -> Cassette {
        let recorder = Arc::try_unwrap(recorder)
            .unwrap_or_else(|_| panic!("adapter still holds the recorder"))
            .into_inner()
            .unwrap();
        let path = recorder.finish().unwrap();
        let yaml = std::fs::read_to_string(path).unwrap();
        serde_yaml::from_str(&yaml).unwrap()
    }
}

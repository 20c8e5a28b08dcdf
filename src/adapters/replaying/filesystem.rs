//! Replaying adapter for the `FileSystem` port.

use std::path::Path;
use std::sync::Mutex;

use super::{next_output, split_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::ports::FileSystem;

/// Serves recorded file contents; writes are swallowed.
pub struct ReplayingFileSystem {
    replayer: Mutex<CassetteReplayer>,
}

impl ReplayingFileSystem {
    /// Creates a filesystem over `replayer`.
    #[must_use]
    pub fn new(replayer: CassetteReplayer) -> Self {
        Self {
            replayer: Mutex::new(replayer),
        }
    }

    fn replay<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
    ) -> Result<T, Box<dyn std::error::Error + Send + Sync>> {
        match split_result(next_output(&self.replayer, "fs", method)) {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| format!("fs::{method}: failed to deserialize: {e}").into()),
            Err(err) => Err(err.as_str().unwrap_or("unknown error").to_string().into()),
        }
    }
}

impl FileSystem for ReplayingFileSystem {
    fn read_to_string(
        &self,
        _path: &Path,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        self.replay("read_to_string")
    }

    fn write(
        &self,
        _path: &Path,
        _contents: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.replay("write")
    }

    fn exists(&self, _path: &Path) -> bool {
        next_output(&self.replayer, "fs", "exists")
            .as_bool()
            .expect("fs::exists: recorded value is not a boolean")
    }
}

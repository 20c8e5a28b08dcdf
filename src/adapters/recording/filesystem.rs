//! Recording adapter for the `FileSystem` port.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::{record_interaction, record_result};
use crate::cassette::recorder::CassetteRecorder;
use crate::ports::FileSystem;

/// Records reads of the debbugs mirror and writes of the watch store.
pub struct RecordingFileSystem {
    inner: Box<dyn FileSystem>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingFileSystem {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn FileSystem>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

#[derive(Serialize)]
struct PathInput {
    path: String,
}

#[derive(Serialize)]
struct WriteInput<'a> {
    path: String,
    contents: &'a str,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn message(e: &BoxError) -> serde_json::Value {
    e.to_string().into()
}

impl FileSystem for RecordingFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, BoxError> {
        let result = self.inner.read_to_string(path);
        let input = PathInput {
            path: path.display().to_string(),
        };
        record_result(
            &self.recorder,
            "fs",
            "read_to_string",
            &input,
            &result,
            message,
        );
        result
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), BoxError> {
        let result = self.inner.write(path, contents);
        let input = WriteInput {
            path: path.display().to_string(),
            contents,
        };
        record_result(&self.recorder, "fs", "write", &input, &result, message);
        result
    }

    fn exists(&self, path: &Path) -> bool {
        let exists = self.inner.exists(path);
        let input = PathInput {
            path: path.display().to_string(),
        };
        record_interaction(&self.recorder, "fs", "exists", &input, &exists);
        exists
    }
}

//! Recording session managing per-port cassette recorders.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::config::PORTS;
use super::recorder::CassetteRecorder;

/// One recorder per port, all writing into the same directory.
pub struct RecordingSession {
    /// Recorder for HTTP exchanges.
    pub http: Arc<Mutex<CassetteRecorder>>,
    /// Recorder for filesystem access.
    pub fs: Arc<Mutex<CassetteRecorder>>,
    /// Recorder for clock reads.
    pub clock: Arc<Mutex<CassetteRecorder>>,
    /// Recorder for generated ids.
    pub id_gen: Arc<Mutex<CassetteRecorder>>,
    output_dir: PathBuf,
}

impl RecordingSession {
    /// Starts a session under `<root>/<timestamp>/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamped directory already exists or cannot
    /// be created.
    pub fn new(root: &Path) -> Result<Self, String> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let output_dir = root.join(&timestamp);
        if output_dir.exists() {
            return Err(format!(
                "Cassette directory already exists: {}",
                output_dir.display()
            ));
        }
        Self::at(output_dir, &timestamp)
    }

    /// Starts a session writing straight into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn at(dir: impl Into<PathBuf>, name: &str) -> Result<Self, String> {
        let output_dir = dir.into();
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| format!("Failed to create cassette directory: {e}"))?;

        let make_recorder = |port: &str| {
            let path = output_dir.join(format!("{port}.cassette.yaml"));
            Arc::new(Mutex::new(CassetteRecorder::new(path, format!("{name}-{port}"))))
        };

        Ok(Self {
            http: make_recorder(PORTS[0]),
            fs: make_recorder(PORTS[1]),
            clock: make_recorder(PORTS[2]),
            id_gen: make_recorder(PORTS[3]),
            output_dir,
        })
    }

    /// Directory the cassettes are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Tags every cassette with the tracker instance being synchronized.
    pub fn set_tracker(&self, tracker: &str) {
        for recorder in [&self.http, &self.fs, &self.clock, &self.id_gen] {
            if let Ok(mut guard) = recorder.lock() {
                guard.set_tracker(tracker);
            }
        }
    }

    /// Writes every cassette and returns the output directory.
    ///
    /// All adapters holding a recorder must have been dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorder is still shared or a file cannot be
    /// written.
    pub fn finish(self) -> Result<PathBuf, String> {
        fn finish_one(arc: Arc<Mutex<CassetteRecorder>>, port: &str) -> Result<(), String> {
            let recorder = Arc::try_unwrap(arc)
                .map_err(|_| format!("Recording adapter for {port} still has references"))?
                .into_inner()
                .map_err(|e| format!("Recorder lock for {port} poisoned: {e}"))?;
            recorder
                .finish()
                .map_err(|e| format!("Failed to write {port} cassette: {e}"))?;
            Ok(())
        }

        finish_one(self.http, PORTS[0])?;
        finish_one(self.fs, PORTS[1])?;
        finish_one(self.clock, PORTS[2])?;
        finish_one(self.id_gen, PORTS[3])?;

        Ok(self.output_dir)
    }
}

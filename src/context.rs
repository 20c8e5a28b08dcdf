//! Service context bundling all port trait objects.

use std::path::{Path, PathBuf};

use crate::adapters::live::{LiveClock, LiveFileSystem, LiveHttpClient, LiveIdGenerator};
use crate::adapters::recording::{
    RecordingClock, RecordingFileSystem, RecordingHttpClient, RecordingIdGenerator,
};
use crate::adapters::replaying::{
    ReplayingClock, ReplayingFileSystem, ReplayingHttpClient, ReplayingIdGenerator,
};
use crate::cassette::config::CassetteConfig;
use crate::cassette::format::Cassette;
use crate::cassette::replayer::CassetteReplayer;
use crate::cassette::session::RecordingSession;
use crate::config::SyncConfig;
use crate::ports::{
    Clock, FileSystem, HttpClient, HttpError, HttpRequest, HttpResponse, IdGenerator,
};

/// Every external boundary a sync run touches.
///
/// Constructors decide whether the ports talk to the real world, record
/// what the real world says, or replay an earlier recording.
pub struct ServiceContext {
    /// Source of `last_checked` / `last_changed` timestamps.
    pub clock: Box<dyn Clock>,
    /// Disk access for the watch store and the debbugs mirror.
    pub fs: Box<dyn FileSystem>,
    /// Allocates person and comment ids.
    pub id_gen: Box<dyn IdGenerator>,
    /// Reaches remote trackers.
    pub http: Box<dyn HttpClient>,
    session: Option<RecordingSession>,
}

impl ServiceContext {
    /// Wires every port to the real world.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn live(config: &SyncConfig) -> Result<Self, String> {
        Ok(Self {
            clock: Box::new(LiveClock),
            fs: Box::new(LiveFileSystem),
            id_gen: Box::new(LiveIdGenerator::new()),
            http: Box::new(LiveHttpClient::new(config.request_timeout)?),
            session: None,
        })
    }

    /// Live ports that also record every call into a new timestamped
    /// directory under `root`. Cassettes are written by
    /// [`finish_recording`](Self::finish_recording), or on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or the cassette directory cannot
    /// be created.
    pub fn recording_at(root: &Path, config: &SyncConfig) -> Result<Self, String> {
        let session = RecordingSession::new(root)?;
        Ok(Self {
            clock: Box::new(RecordingClock::new(Box::new(LiveClock), session.clock.clone())),
            fs: Box::new(RecordingFileSystem::new(Box::new(LiveFileSystem), session.fs.clone())),
            id_gen: Box::new(RecordingIdGenerator::new(
                Box::new(LiveIdGenerator::new()),
                session.id_gen.clone(),
            )),
            http: Box::new(RecordingHttpClient::new(
                Box::new(LiveHttpClient::new(config.request_timeout)?),
                session.http.clone(),
            )),
            session: Some(session),
        })
    }

    /// Replays every port from one cassette; each port reads its own
    /// interactions out of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette cannot be read or parsed.
    pub fn replaying(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read cassette file {}: {e}", path.display()))?;
        let cassette: Cassette = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse cassette file {}: {e}", path.display()))?;

        Ok(Self {
            clock: Box::new(ReplayingClock::new(CassetteReplayer::new(&cassette))),
            fs: Box::new(ReplayingFileSystem::new(CassetteReplayer::new(&cassette))),
            id_gen: Box::new(ReplayingIdGenerator::new(CassetteReplayer::new(&cassette))),
            http: Box::new(ReplayingHttpClient::new(CassetteReplayer::new(&cassette))),
            session: None,
        })
    }

    /// Replays each port from its own cassette. Ports without one panic
    /// when called.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured cassette cannot be read or parsed.
    pub fn replaying_from(config: &CassetteConfig) -> Result<Self, String> {
        let replayers = config.load_all()?;

        Ok(Self {
            clock: match replayers.clock {
                Some(r) => Box::new(ReplayingClock::new(r)),
                None => Box::new(Unconfigured),
            },
            fs: match replayers.fs {
                Some(r) => Box::new(ReplayingFileSystem::new(r)),
                None => Box::new(Unconfigured),
            },
            id_gen: match replayers.id_gen {
                Some(r) => Box::new(ReplayingIdGenerator::new(r)),
                None => Box::new(Unconfigured),
            },
            http: match replayers.http {
                Some(r) => Box::new(ReplayingHttpClient::new(r)),
                None => Box::new(Unconfigured),
            },
            session: None,
        })
    }

    /// Tags the cassettes of a recording context with the tracker name.
    /// Does nothing for other contexts.
    pub fn set_recording_tracker(&self, tracker: &str) {
        if let Some(session) = &self.session {
            session.set_tracker(tracker);
        }
    }

    /// Writes the cassettes of a recording context and returns their
    /// directory; `None` for contexts that do not record.
    ///
    /// # Errors
    ///
    /// Returns an error if a cassette cannot be written.
    pub fn finish_recording(mut self) -> Result<Option<PathBuf>, String> {
        self.close_session().transpose()
    }

    fn close_session(&mut self) -> Option<Result<PathBuf, String>> {
        let session = self.session.take()?;
        // The recording adapters share the recorders; drop them first.
        self.clock = Box::new(Unconfigured);
        self.fs = Box::new(Unconfigured);
        self.id_gen = Box::new(Unconfigured);
        self.http = Box::new(Unconfigured);
        Some(session.finish())
    }
}

impl Drop for ServiceContext {
    fn drop(&mut self) {
        if let Some(Err(e)) = self.close_session() {
            tracing::warn!(error = %e, "failed to write cassettes");
        }
    }
}

/// Stands in for any port that has no cassette during replay.
struct Unconfigured;

fn unconfigured(port: &str) -> ! {
    panic!("{port} port not configured in CassetteConfig: no cassette loaded for {port}");
}

impl Clock for Unconfigured {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        unconfigured("clock")
    }
}

impl FileSystem for Unconfigured {
    fn read_to_string(
        &self,
        _path: &Path,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        unconfigured("fs")
    }

    fn write(
        &self,
        _path: &Path,
        _contents: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        unconfigured("fs")
    }

    fn exists(&self, _path: &Path) -> bool {
        unconfigured("fs")
    }
}

impl IdGenerator for Unconfigured {
    fn generate_id(&self) -> String {
        unconfigured("id_gen")
    }
}

impl HttpClient for Unconfigured {
    fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        unconfigured("http")
    }
}

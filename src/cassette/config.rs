//! Per-port cassette configuration for replay.

use std::path::{Path, PathBuf};

use super::format::Cassette;
use super::replayer::CassetteReplayer;

/// Names of the ports a session records, in the order they are written.
pub const PORTS: [&str; 4] = ["http", "fs", "clock", "id_gen"];

/// Cassette file per port. Ports left as `None` panic if used during replay.
#[derive(Debug, Clone, Default)]
pub struct CassetteConfig {
    /// Cassette for the HTTP port.
    pub http: Option<PathBuf>,
    /// Cassette for the filesystem port.
    pub fs: Option<PathBuf>,
    /// Cassette for the clock port.
    pub clock: Option<PathBuf>,
    /// Cassette for the ID generator port.
    pub id_gen: Option<PathBuf>,
}

/// Loaded replayers, one per configured port.
pub struct PortReplayers {
    /// Replayer for the HTTP port.
    pub http: Option<CassetteReplayer>,
    /// Replayer for the filesystem port.
    pub fs: Option<CassetteReplayer>,
    /// Replayer for the clock port.
    pub clock: Option<CassetteReplayer>,
    /// Replayer for the ID generator port.
    pub id_gen: Option<CassetteReplayer>,
}

impl CassetteConfig {
    /// A config with no cassettes at all.
    #[must_use]
    pub fn panic_on_unspecified() -> Self {
        Self::default()
    }

    /// Points every port at `<dir>/<port>.cassette.yaml` when that file exists,
    /// which is the layout [`RecordingSession`](super::session::RecordingSession)
    /// writes.
    #[must_use]
    pub fn from_session_dir(dir: &Path) -> Self {
        let pick = |port: &str| {
            let path = dir.join(format!("{port}.cassette.yaml"));
            path.exists().then_some(path)
        };
        Self {
            http: pick("http"),
            fs: pick("fs"),
            clock: pick("clock"),
            id_gen: pick("id_gen"),
        }
    }

    /// Loads one cassette file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_cassette(path: &Path) -> Result<CassetteReplayer, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read cassette file {}: {e}", path.display()))?;
        let cassette: Cassette = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse cassette file {}: {e}", path.display()))?;
        Ok(CassetteReplayer::new(&cassette))
    }

    /// Loads every configured cassette.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured cassette cannot be read or parsed.
    pub fn load_all(&self) -> Result<PortReplayers, String> {
        Ok(PortReplayers {
            http: self.http.as_deref().map(Self::load_cassette).transpose()?,
            fs: self.fs.as_deref().map(Self::load_cassette).transpose()?,
            clock: self.clock.as_deref().map(Self::load_cassette).transpose()?,
            id_gen: self.id_gen.as_deref().map(Self::load_cassette).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_cassette(path: &Path, port: &str, method: &str, output: serde_json::Value) {
        let cassette = Cassette::from_interactions(
            "test",
            vec![(port.to_string(), method.to_string(), json!({}), output)],
        );
        std::fs::write(path, serde_yaml::to_string(&cassette).unwrap()).unwrap();
    }

    #[test]
    fn session_dir_picks_up_only_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        write_cassette(
            &dir.path().join("http.cassette.yaml"),
            "http",
            "send",
            json!({"ok": {}}),
        );

        let config = CassetteConfig::from_session_dir(dir.path());
        assert!(config.http.is_some());
        assert!(config.fs.is_none());
        assert!(config.clock.is_none());
    }

    #[test]
    fn load_all_builds_one_replayer_per_configured_port() {
        let dir = tempfile::tempdir().unwrap();
        let clock = dir.path().join("clock.cassette.yaml");
        write_cassette(&clock, "clock", "now", json!("2024-01-01T00:00:00Z"));

        let config = CassetteConfig {
            clock: Some(clock),
            ..CassetteConfig::default()
        };
        let mut replayers = config.load_all().unwrap();

        let clock = replayers.clock.as_mut().unwrap();
        let output = clock.next_output("clock", "now");
        assert_eq!(output, json!("2024-01-01T00:00:00Z"));
        assert!(replayers.http.is_none());
        assert!(replayers.id_gen.is_none());
    }

    #[test]
    fn unreadable_cassette_is_reported_with_its_path() {
        let config = CassetteConfig {
            http: Some(PathBuf::from("/nonexistent/http.cassette.yaml")),
            ..CassetteConfig::default()
        };
        let Err(err) = config.load_all() else { panic!("load should fail") };
        assert!(err.contains("/nonexistent/http.cassette.yaml"));
    }
}

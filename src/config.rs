//! Runtime configuration for sync runs.
//!
//! Defaults are overridden by `BUGWATCH_*` environment variables; `main`
//! loads a `.env` file first so the same variables can live there.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for one process. Every field has a working default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Directory holding `watches.yaml`.
    pub store_root: PathBuf,
    /// Root of the local debbugs mirror (contains `db-h/` and `archive/`).
    pub debbugs_db: PathBuf,
    /// Above this many remote ids an adapter fetches in one batch.
    pub batch_query_threshold: usize,
    /// Default cap on watches per run for adapters that do not set their own.
    /// `None` means no cap.
    pub batch_size: Option<usize>,
    /// Per-request timeout for remote trackers.
    pub request_timeout: Duration,
    /// Whether the debbugs adapter imports comments.
    pub sync_debbugs_comments: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(".bugwatch"),
            debbugs_db: PathBuf::from(".bugwatch/debbugs"),
            batch_query_threshold: 10,
            batch_size: Some(100),
            request_timeout: Duration::from_secs(30),
            sync_debbugs_comments: true,
        }
    }
}

impl SyncConfig {
    /// Builds a config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable when a value cannot be parsed.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable when a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("BUGWATCH_STORE") {
            config.store_root = PathBuf::from(root);
        }
        if let Some(db) = lookup("BUGWATCH_DEBBUGS_DB") {
            config.debbugs_db = PathBuf::from(db);
        }
        if let Some(raw) = lookup("BUGWATCH_BATCH_QUERY_THRESHOLD") {
            config.batch_query_threshold = parse_number("BUGWATCH_BATCH_QUERY_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("BUGWATCH_BATCH_SIZE") {
            // 0 lifts the cap.
            let size: usize = parse_number("BUGWATCH_BATCH_SIZE", &raw)?;
            config.batch_size = (size > 0).then_some(size);
        }
        if let Some(raw) = lookup("BUGWATCH_REQUEST_TIMEOUT_SECS") {
            let secs = parse_number("BUGWATCH_REQUEST_TIMEOUT_SECS", &raw)?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("BUGWATCH_SYNC_DEBBUGS_COMMENTS") {
            config.sync_debbugs_comments = parse_flag("BUGWATCH_SYNC_DEBBUGS_COMMENTS", &raw)?;
        }

        Ok(config)
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("Invalid value for {key} ({raw:?}): {e}"))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("Invalid value for {key} ({raw:?}): expected true or false")),
    }
}

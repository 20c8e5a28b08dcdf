//! SourceForge.
//!
//! The hosted tracker has no export at all, so every bug is one scraped page.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::fetch::{self, Session};
use super::{is_unknown_sentinel, numeric_id, numeric_ids, unrecognized, ExternalBugTracker};
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, LocalStatus};
use crate::ports::{HttpClient, HttpRequest};

static ERROR_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)class\s*=\s*"error"[^>]*>.*?<p[^>]*>(.*?)</p>"#).expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct Artifact {
    status: String,
    resolution: Option<String>,
}

/// Adapter for SourceForge's hosted tracker.
pub struct SourceForge<'a> {
    base_url: String,
    session: Session<'a>,
    artifacts: HashMap<u64, Result<Artifact, BugWatchError>>,
}

impl<'a> SourceForge<'a> {
    /// Creates the adapter; nothing is fetched yet.
    #[must_use]
    pub fn new(instance: &BugTrackerInstance, http: &'a dyn HttpClient) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            session: Session::new(http),
            artifacts: HashMap::new(),
        }
    }

    /// Fetches one artifact page. `Ok(None)` when SourceForge has no such page.
    fn scrape(
        &mut self,
        id: u64,
    ) -> Result<Option<Result<Artifact, BugWatchError>>, BugWatchError> {
        let url = fetch::join_url(&self.base_url, &format!("support/tracker.php?aid={id}"));
        let response = self.session.fetch(HttpRequest::get(&url))?;
        if response.status == 404 {
            return Ok(None);
        }
        let page = fetch::ensure_success(&url, response)?.body;
        Ok(Some(read_page(&id.to_string(), &page)))
    }
}

fn read_page(remote_bug: &str, page: &str) -> Result<Artifact, BugWatchError> {
    let Some(status) = fetch::cell_after_label(page, "Status:").filter(|s| !s.is_empty()) else {
        let message = ERROR_FRAME
            .captures(page)
            .and_then(|c| c.get(1))
            .map(|m| fetch::html_text(m.as_str()));
        return Err(match message {
            Some(message) if message.to_lowercase().contains("private") => {
                BugWatchError::PrivateRemoteBug {
                    remote_bug: remote_bug.to_string(),
                }
            }
            Some(message) => BugWatchError::unparsable(format!("bug {remote_bug}: {message}")),
            None => BugWatchError::unparsable(format!("bug {remote_bug}: page has no status")),
        });
    };
    let resolution = fetch::cell_after_label(page, "Resolution:")
        .filter(|r| !r.is_empty() && !r.eq_ignore_ascii_case("none"));
    Ok(Artifact { status, resolution })
}

impl ExternalBugTracker for SourceForge<'_> {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn batch_size(&self) -> Option<usize> {
        Some(1)
    }

    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
        self.artifacts.clear();
        for id in numeric_ids(remote_ids) {
            if let Some(artifact) = self.scrape(id)? {
                self.artifacts.insert(id, artifact);
            }
        }
        Ok(())
    }

    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
        let id = numeric_id(remote_bug)?;
        let artifact = self
            .artifacts
            .get(&id)
            .ok_or_else(|| BugWatchError::not_found(remote_bug))?
            .as_ref()
            .map_err(Clone::clone)?;
        Ok(match &artifact.resolution {
            Some(resolution) => format!("{} {resolution}", artifact.status),
            None => artifact.status.clone(),
        })
    }

    fn normalize_status(&self, remote_status: &str) -> LocalStatus {
        if is_unknown_sentinel(remote_status) {
            return LocalStatus::Unknown;
        }
        // Statuses are single words; resolutions may have several.
        let raw = remote_status.trim().to_lowercase();
        let (status, resolution) = match raw.split_once(' ') {
            Some((status, resolution)) => (status, Some(resolution.trim())),
            None => (raw.as_str(), None),
        };

        let by_status: fn(Option<&str>) -> Option<LocalStatus> = match status {
            "open" => open,
            "closed" => closed,
            "pending" => pending,
            "deleted" => deleted,
            _ => return unrecognized("sourceforge", &self.base_url, remote_status),
        };
        by_status(resolution)
            .or_else(|| open(resolution))
            .unwrap_or_else(|| unrecognized("sourceforge", &self.base_url, remote_status))
    }
}

fn open(resolution: Option<&str>) -> Option<LocalStatus> {
    Some(match resolution {
        None => LocalStatus::New,
        Some("accepted" | "duplicate" | "later" | "remind") => LocalStatus::Confirmed,
        Some("fixed") => LocalStatus::FixCommitted,
        Some("invalid" | "out of date" | "works for me") => LocalStatus::Invalid,
        Some("postponed" | "rejected" | "won't fix" | "wont fix") => LocalStatus::WontFix,
        Some(_) => return None,
    })
}

fn closed(resolution: Option<&str>) -> Option<LocalStatus> {
    Some(match resolution {
        None | Some("fixed") => LocalStatus::FixReleased,
        Some("accepted") => LocalStatus::FixCommitted,
        Some("postponed") => LocalStatus::WontFix,
        Some("invalid" | "duplicate" | "out of date" | "works for me" | "rejected") => {
            LocalStatus::Invalid
        }
        Some(_) => return None,
    })
}

fn pending(resolution: Option<&str>) -> Option<LocalStatus> {
    match resolution {
        None => Some(LocalStatus::Incomplete),
        Some("postponed") => Some(LocalStatus::WontFix),
        Some(_) => None,
    }
}

fn deleted(resolution: Option<&str>) -> Option<LocalStatus> {
    resolution.is_none().then_some(LocalStatus::Invalid)
}

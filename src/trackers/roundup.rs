//! Roundup.
//!
//! Issues come from Roundup's `export_csv` action. The Python project's
//! tracker adds a resolution column and its own status numbering, so it is
//! recognized by host and handled as a separate flavor.

use std::collections::{HashMap, HashSet};

use url::Url;

use super::fetch::{self, CsvTable, Session};
use super::{is_unknown_sentinel, numeric_id, numeric_ids, unrecognized, ExternalBugTracker};
use crate::config::SyncConfig;
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, LocalStatus};
use crate::ports::HttpClient;

const PYTHON_HOST: &str = "bugs.python.org";

/// Placeholder written into the raw status for a missing resolution.
const NO_RESOLUTION: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Standard,
    Python,
}

impl Flavor {
    fn of(base_url: &str) -> Self {
        let host = Url::parse(base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase));
        if host.as_deref() == Some(PYTHON_HOST) {
            Self::Python
        } else {
            Self::Standard
        }
    }

    fn columns(self) -> &'static str {
        match self {
            Self::Python => "title,id,activity,status,resolution",
            Self::Standard => "title,id,activity,status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Issue {
    status: String,
    resolution: Option<String>,
}

type Snapshot = HashMap<u64, Result<Issue, BugWatchError>>;

/// Adapter for Roundup trackers.
pub struct Roundup<'a> {
    base_url: String,
    flavor: Flavor,
    session: Session<'a>,
    threshold: usize,
    batch_size: Option<usize>,
    issues: Snapshot,
}

impl<'a> Roundup<'a> {
    /// Creates the adapter; nothing is fetched yet.
    #[must_use]
    pub fn new(
        instance: &BugTrackerInstance,
        http: &'a dyn HttpClient,
        config: &SyncConfig,
    ) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            flavor: Flavor::of(&instance.base_url),
            session: Session::new(http),
            threshold: config.batch_query_threshold,
            batch_size: config.batch_size,
            issues: HashMap::new(),
        }
    }

    fn export_url(&self, id: Option<u64>) -> String {
        let mut query = format!(
            "issue?@action=export_csv&@columns={}&@sort=id&@group=priority",
            self.flavor.columns()
        );
        if id.is_some() {
            query.push_str("&@filter=id");
        }
        query.push_str("&@pagesize=50&@startwith=0");
        if let Some(id) = id {
            query.push_str(&format!("&id={id}"));
        }
        fetch::join_url(&self.base_url, &query)
    }

    fn export(&mut self, id: Option<u64>) -> Result<CsvTable, BugWatchError> {
        let url = self.export_url(id);
        let table = fetch::parse_csv(&self.session.get(&url)?.body)?;
        if !table.has_column("id") {
            return Err(BugWatchError::UnparsableBugTracker {
                url: self.base_url.clone(),
                reason: "CSV export has no id column".to_string(),
            });
        }
        Ok(table)
    }

    fn read_issue(&self, row: &HashMap<String, String>) -> Result<Issue, BugWatchError> {
        let status = row
            .get("status")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BugWatchError::unparsable("issue has no status"))?;
        let resolution = match self.flavor {
            Flavor::Python => row
                .get("resolution")
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            Flavor::Standard => None,
        };
        Ok(Issue { status, resolution })
    }

    fn collect(&self, table: &CsvTable, wanted: &HashSet<u64>) -> Snapshot {
        table
            .rows
            .iter()
            .filter_map(|row| {
                let id = row.get("id")?.trim().parse::<u64>().ok()?;
                wanted.contains(&id).then(|| (id, self.read_issue(row)))
            })
            .collect()
    }
}

impl ExternalBugTracker for Roundup<'_> {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
        let ids = numeric_ids(remote_ids);
        let wanted: HashSet<u64> = ids.iter().copied().collect();
        self.issues.clear();
        if ids.is_empty() {
            return Ok(());
        }

        if ids.len() > self.threshold {
            let table = self.export(None)?;
            self.issues = self.collect(&table, &wanted);
        } else {
            for id in ids {
                let table = self.export(Some(id))?;
                let found = self.collect(&table, &HashSet::from([id]));
                self.issues.extend(found);
            }
        }
        Ok(())
    }

    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
        let id = numeric_id(remote_bug)?;
        let issue = self
            .issues
            .get(&id)
            .ok_or_else(|| BugWatchError::not_found(remote_bug))?
            .as_ref()
            .map_err(Clone::clone)?;
        Ok(match self.flavor {
            Flavor::Python => format!(
                "{}:{}",
                issue.status,
                issue.resolution.as_deref().unwrap_or(NO_RESOLUTION)
            ),
            Flavor::Standard => issue.status.clone(),
        })
    }

    fn normalize_status(&self, remote_status: &str) -> LocalStatus {
        if is_unknown_sentinel(remote_status) {
            return LocalStatus::Unknown;
        }
        let normalized = match self.flavor {
            Flavor::Python => python_status(remote_status),
            Flavor::Standard => remote_status.trim().parse().ok().and_then(standard_status),
        };
        normalized.unwrap_or_else(|| unrecognized("roundup", &self.base_url, remote_status))
    }
}

/// Default Roundup schema: `unread` through `resolved`.
fn standard_status(status: u32) -> Option<LocalStatus> {
    Some(match status {
        1 => LocalStatus::New,
        2 => LocalStatus::Confirmed,
        3 | 4 => LocalStatus::Incomplete,
        5 => LocalStatus::InProgress,
        6 => LocalStatus::FixCommitted,
        7 | 8 => LocalStatus::FixReleased,
        _ => return None,
    })
}

/// Parses `"<status>:<resolution>"` and looks the pair up, falling back to
/// the open status's table for resolutions the status itself does not list.
fn python_status(raw: &str) -> Option<LocalStatus> {
    let (status, resolution) = raw.trim().split_once(':')?;
    let status: u32 = status.trim().parse().ok()?;
    let resolution = match resolution.trim() {
        NO_RESOLUTION | "" => None,
        value => Some(value.parse::<u32>().ok()?),
    };

    let by_status: fn(Option<u32>) -> Option<LocalStatus> = match status {
        1 => python_open,
        2 => python_closed,
        3 => python_pending,
        _ => return None,
    };
    by_status(resolution).or_else(|| python_open(resolution))
}

fn python_open(resolution: Option<u32>) -> Option<LocalStatus> {
    Some(match resolution {
        None => LocalStatus::New,
        Some(1 | 5 | 9) => LocalStatus::Confirmed,
        Some(3) => LocalStatus::FixCommitted,
        Some(7 | 8 | 10) => LocalStatus::WontFix,
        Some(2 | 4 | 6 | 11) => LocalStatus::Invalid,
        Some(_) => return None,
    })
}

fn python_closed(resolution: Option<u32>) -> Option<LocalStatus> {
    Some(match resolution {
        None | Some(5 | 7 | 8 | 10) => LocalStatus::WontFix,
        Some(1) => LocalStatus::FixCommitted,
        Some(3) => LocalStatus::FixReleased,
        Some(4 | 6 | 11) => LocalStatus::Invalid,
        Some(_) => return None,
    })
}

fn python_pending(resolution: Option<u32>) -> Option<LocalStatus> {
    Some(match resolution {
        None | Some(1) => LocalStatus::Incomplete,
        Some(7) => LocalStatus::WontFix,
        Some(_) => return None,
    })
}

//! Trac.
//!
//! Trac can export a single ticket or a whole query as CSV. Single exports
//! are only trusted after a test fetch shows the installation really serves
//! `text/csv`; otherwise one query export covers every watched ticket.

use std::collections::{HashMap, HashSet};

use super::fetch::{self, CsvTable, Session};
use super::{is_unknown_sentinel, numeric_id, numeric_ids, unrecognized, ExternalBugTracker};
use crate::config::SyncConfig;
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, LocalStatus};
use crate::ports::{HttpClient, HttpRequest};

/// Resolution Trac shows for tickets that have none.
const NO_RESOLUTION: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ticket {
    status: String,
    resolution: String,
}

type Snapshot = HashMap<u64, Result<Ticket, BugWatchError>>;

/// Adapter for Trac installations.
pub struct Trac<'a> {
    base_url: String,
    session: Session<'a>,
    threshold: usize,
    batch_size: Option<usize>,
    tickets: Snapshot,
}

impl<'a> Trac<'a> {
    /// Creates the adapter; nothing is fetched yet.
    #[must_use]
    pub fn new(
        instance: &BugTrackerInstance,
        http: &'a dyn HttpClient,
        config: &SyncConfig,
    ) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            session: Session::new(http),
            threshold: config.batch_query_threshold,
            batch_size: config.batch_size,
            tickets: HashMap::new(),
        }
    }

    /// Finds a ticket page that answers, last candidate first, and checks
    /// whether its CSV form comes back as `text/csv`.
    ///
    /// # Errors
    ///
    /// Transport failures only; error statuses just mean "not supported".
    pub fn supports_single_exports(&mut self, candidates: &[u64]) -> Result<bool, BugWatchError> {
        for id in candidates.iter().rev() {
            let page = self.ticket_url(*id, false);
            if !self.session.fetch(HttpRequest::get(page))?.is_success() {
                continue;
            }
            let export_url = self.ticket_url(*id, true);
            let export = self.session.fetch(HttpRequest::get(export_url))?;
            let is_csv = export
                .header("content-type")
                .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("text/csv"));
            return Ok(export.is_success() && is_csv);
        }
        Ok(false)
    }

    fn ticket_url(&self, id: u64, csv: bool) -> String {
        let suffix = if csv { "?format=csv" } else { "" };
        fetch::join_url(&self.base_url, &format!("ticket/{id}{suffix}"))
    }

    fn fetch_single(&mut self, ids: &[u64]) -> Result<Snapshot, BugWatchError> {
        let mut tickets = HashMap::new();
        for &id in ids {
            let url = self.ticket_url(id, true);
            let response = self.session.fetch(HttpRequest::get(&url))?;
            if response.status == 404 {
                continue;
            }
            let body = fetch::ensure_success(&url, response)?.body;
            let ticket = fetch::parse_csv(&body).and_then(|table| {
                if !table.has_column("id") {
                    let reason = format!("{url}: export has no id column");
                    return Err(BugWatchError::unparsable(reason));
                }
                table
                    .rows
                    .first()
                    .map(read_ticket)
                    .ok_or_else(|| BugWatchError::unparsable(format!("{url}: empty export")))?
            });
            tickets.insert(id, ticket);
        }
        Ok(tickets)
    }

    fn fetch_batch(&mut self, ids: &[u64]) -> Result<Snapshot, BugWatchError> {
        let query: Vec<String> = ids.iter().map(|id| format!("id={id}")).collect();
        let url = fetch::join_url(
            &self.base_url,
            &format!("query?{}&order=resolution&format=csv", query.join("&")),
        );
        let table = fetch::parse_csv(&self.session.get(&url)?.body)?;
        Ok(tickets_from_query(&table, ids))
    }
}

fn read_ticket(row: &HashMap<String, String>) -> Result<Ticket, BugWatchError> {
    let status = row
        .get("status")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BugWatchError::unparsable("ticket has no status"))?;
    let resolution = row
        .get("resolution")
        .map(|r| r.trim().to_string())
        .unwrap_or_default();
    Ok(Ticket { status, resolution })
}

/// Keeps only the requested tickets; Trac may ignore the id filter.
fn tickets_from_query(table: &CsvTable, wanted: &[u64]) -> Snapshot {
    let wanted: HashSet<u64> = wanted.iter().copied().collect();
    table
        .rows
        .iter()
        .filter_map(|row| {
            let id = row.get("id")?.trim().parse::<u64>().ok()?;
            wanted.contains(&id).then(|| (id, read_ticket(row)))
        })
        .collect()
}

impl ExternalBugTracker for Trac<'_> {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
        let ids = numeric_ids(remote_ids);
        if ids.is_empty() {
            self.tickets.clear();
            return Ok(());
        }

        self.tickets = if ids.len() < self.threshold && self.supports_single_exports(&ids)? {
            self.fetch_single(&ids)?
        } else {
            self.fetch_batch(&ids)?
        };
        Ok(())
    }

    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
        let id = numeric_id(remote_bug)?;
        let ticket = self
            .tickets
            .get(&id)
            .ok_or_else(|| BugWatchError::not_found(remote_bug))?
            .as_ref()
            .map_err(Clone::clone)?;
        if ticket.resolution.is_empty() || ticket.resolution == NO_RESOLUTION {
            Ok(ticket.status.clone())
        } else {
            Ok(ticket.resolution.clone())
        }
    }

    fn normalize_status(&self, remote_status: &str) -> LocalStatus {
        if is_unknown_sentinel(remote_status) {
            return LocalStatus::Unknown;
        }
        match remote_status.trim().to_lowercase().as_str() {
            "accepted" | "assigned" => LocalStatus::Confirmed,
            "closed" | "fixed" => LocalStatus::FixReleased,
            "duplicate" | "invalid" | "worksforme" => LocalStatus::Invalid,
            "new" | "open" | "reopened" => LocalStatus::New,
            "wontfix" => LocalStatus::WontFix,
            _ => unrecognized("trac", &self.base_url, remote_status),
        }
    }
}

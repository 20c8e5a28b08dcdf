//! Debbugs, read from a local mirror of the spool.
//!
//! Each bug is a `.summary` header block next to a `.log` of every mail the
//! bug received. Live bugs live under `db-h/`, archived ones under
//! `archive/`, both bucketed by the last two digits of the bug number.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mailparse::{MailHeaderMap, MailParseError};

use super::{is_unknown_sentinel, numeric_id, numeric_ids, unrecognized, ExternalBugTracker};
use crate::config::SyncConfig;
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, BugWatch, ImportedComment, LocalStatus};
use crate::ports::{BugRepository, FileSystem};

const LIVE_SET: &str = "db-h";
const ARCHIVE_SET: &str = "archive";

/// One bug as described by its summary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebbugsBug {
    /// Bug number.
    pub id: u64,
    /// `open` or `done`.
    pub status: String,
    /// Severity, `normal` unless stated.
    pub severity: String,
    /// Tags in file order.
    pub tags: Vec<String>,
    /// Subject line, if any.
    pub subject: Option<String>,
    /// Path of the matching `.log`.
    pub log_path: PathBuf,
}

/// Adapter for a debbugs mirror.
pub struct Debbugs<'a> {
    base_url: String,
    db: PathBuf,
    fs: &'a dyn FileSystem,
    import_comments: bool,
    bugs: HashMap<u64, Result<DebbugsBug, BugWatchError>>,
}

impl<'a> Debbugs<'a> {
    /// Creates the adapter over the mirror configured in `config`.
    #[must_use]
    pub fn new(instance: &BugTrackerInstance, fs: &'a dyn FileSystem, config: &SyncConfig) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            db: config.debbugs_db.clone(),
            fs,
            import_comments: config.sync_debbugs_comments,
            bugs: HashMap::new(),
        }
    }

    /// Finds the summary for `id`, live set first.
    fn locate(&self, id: u64) -> Option<PathBuf> {
        let bucket = format!("{:02}", id % 100);
        let file = format!("{id}.summary");
        [LIVE_SET, ARCHIVE_SET]
            .iter()
            .map(|set| self.db.join(set).join(&bucket).join(&file))
            .find(|path| self.fs.exists(path))
    }

    fn load(&self, id: u64, summary: &Path) -> Result<DebbugsBug, BugWatchError> {
        let text = self.fs.read_to_string(summary).map_err(|e| BugWatchError::BugTrackerConnect {
            url: summary.display().to_string(),
            reason: e.to_string(),
        })?;
        parse_summary(id, &text, summary.with_extension("log"))
    }
}

/// Parses a `.summary` header block.
///
/// # Errors
///
/// Returns [`BugWatchError::UnparsableBug`] if the headers are malformed or
/// the format version is missing or unsupported.
pub fn parse_summary(id: u64, text: &str, log_path: PathBuf) -> Result<DebbugsBug, BugWatchError> {
    let (headers, _) = mailparse::parse_headers(text.as_bytes())
        .map_err(|e| BugWatchError::unparsable(format!("summary for bug {id}: {e}")))?;

    let version = headers.get_first_value("Format-Version");
    match version.as_deref().map(str::trim) {
        Some("2" | "3") => {}
        Some(other) => {
            return Err(BugWatchError::unparsable(format!(
                "summary for bug {id}: unsupported format version {other}"
            )));
        }
        None => {
            return Err(BugWatchError::unparsable(format!(
                "summary for bug {id}: no format version"
            )));
        }
    }

    let non_empty = |name: &str| {
        headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DebbugsBug {
        id,
        status: if non_empty("Done").is_some() { "done" } else { "open" }.to_string(),
        severity: non_empty("Severity").unwrap_or_else(|| "normal".to_string()),
        tags: non_empty("Tags")
            .map(|tags| tags.split_whitespace().map(ToString::to_string).collect())
            .unwrap_or_default(),
        subject: non_empty("Subject"),
        log_path,
    })
}

/// Kinds of record in a `.log` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    IncomingRecv,
    Recips { in_message: bool },
    Autocheck,
    Other,
}

/// Marks a log line that would otherwise start with a control character.
const ESCAPE: char = '\u{18}';

/// Splits a `.log` into the raw mails it holds.
#[must_use]
pub fn split_log(log: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current: Option<(Record, String)> = None;

    for line in log.split_inclusive('\n') {
        let marker = line.trim_end_matches(['\r', '\n']);
        match marker {
            "\u{2}" => current = Some((Record::IncomingRecv, String::new())),
            "\u{1}" => current = Some((Record::Recips { in_message: false }, String::new())),
            "\u{7}" => current = Some((Record::Autocheck, String::new())),
            "\u{6}" => current = Some((Record::Other, String::new())),
            "\u{5}" => {
                if let Some((Record::Recips { in_message }, _)) = &mut current {
                    *in_message = true;
                }
            }
            "\u{3}" => {
                if let Some((record, body)) = current.take() {
                    let is_mail = matches!(
                        record,
                        Record::IncomingRecv
                            | Record::Autocheck
                            | Record::Recips { in_message: true }
                    );
                    if is_mail && !body.trim().is_empty() {
                        messages.push(body);
                    }
                }
            }
            _ => {
                if let Some((record, body)) = &mut current {
                    if !matches!(record, Record::Recips { in_message: false } | Record::Other) {
                        body.push_str(line.strip_prefix(ESCAPE).unwrap_or(line));
                    }
                }
            }
        }
    }
    messages
}

fn storage(e: &(dyn std::error::Error + Send + Sync)) -> BugWatchError {
    BugWatchError::Storage {
        reason: e.to_string(),
    }
}

/// A usable comment pulled out of one mail.
struct Comment {
    message_id: String,
    email: String,
    display_name: Option<String>,
    subject: Option<String>,
    date: Option<String>,
    body: String,
}

/// Why a mail was not turned into a comment.
enum Skip {
    NoSender,
    NoMessageId,
    Malformed(MailParseError),
}

fn read_comment(raw: &str) -> Result<Comment, Skip> {
    let mail = mailparse::parse_mail(raw.as_bytes()).map_err(Skip::Malformed)?;

    let sender = mail
        .headers
        .get_first_header("From")
        .and_then(|from| mailparse::addrparse_header(from).ok())
        .and_then(|list| list.extract_single_info())
        .filter(|info| info.addr.contains('@'))
        .ok_or(Skip::NoSender)?;

    let message_id = mail
        .headers
        .get_first_value("Message-ID")
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(Skip::NoMessageId)?;

    Ok(Comment {
        message_id,
        email: sender.addr,
        display_name: sender.display_name.filter(|name| !name.trim().is_empty()),
        subject: mail.headers.get_first_value("Subject"),
        date: mail.headers.get_first_value("Date"),
        body: mail.get_body().unwrap_or_default(),
    })
}

impl ExternalBugTracker for Debbugs<'_> {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn batch_size(&self) -> Option<usize> {
        None
    }

    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
        let live = self.db.join(LIVE_SET);
        if !self.fs.exists(&live) {
            return Err(BugWatchError::BugTrackerConnect {
                url: live.display().to_string(),
                reason: "debbugs database not found".to_string(),
            });
        }

        let mut bugs = HashMap::new();
        for id in numeric_ids(remote_ids) {
            if let Some(summary) = self.locate(id) {
                bugs.insert(id, self.load(id, &summary));
            }
        }
        self.bugs = bugs;
        Ok(())
    }

    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
        let id = numeric_id(remote_bug)?;
        let bug = self
            .bugs
            .get(&id)
            .ok_or_else(|| BugWatchError::not_found(remote_bug))?
            .as_ref()
            .map_err(Clone::clone)?;

        let mut parts = vec![bug.status.as_str(), bug.severity.as_str()];
        parts.extend(bug.tags.iter().map(String::as_str));
        Ok(parts.join(" "))
    }

    fn normalize_status(&self, remote_status: &str) -> LocalStatus {
        if is_unknown_sentinel(remote_status) {
            return LocalStatus::Unknown;
        }
        let parts: Vec<&str> = remote_status.split_whitespace().collect();
        if parts.len() < 2 {
            return unrecognized("debbugs", &self.base_url, remote_status);
        }
        let tags = &parts[2..];
        let tagged = |names: &[&str]| tags.iter().any(|tag| names.contains(tag));

        // wontfix wins over any base status, known or not.
        if tagged(&["wontfix"]) {
            return LocalStatus::WontFix;
        }
        match parts[0] {
            "open" if tagged(&["pending", "fixed", "fixed-in-experimental"]) => {
                LocalStatus::FixCommitted
            }
            "open" if tagged(&["help", "confirmed", "upstream", "fixed-upstream"]) => {
                LocalStatus::Confirmed
            }
            "open" if tagged(&["moreinfo"]) => LocalStatus::Incomplete,
            "open" => LocalStatus::New,
            "done" => LocalStatus::FixReleased,
            _ => unrecognized("debbugs", &self.base_url, remote_status),
        }
    }

    fn import_comments(
        &self,
        watch: &BugWatch,
        repository: &dyn BugRepository,
    ) -> Result<usize, BugWatchError> {
        if !self.import_comments {
            return Ok(0);
        }
        let id = numeric_id(&watch.remote_bug)?;
        let Some(Ok(bug)) = self.bugs.get(&id) else {
            return Ok(0);
        };
        if !self.fs.exists(&bug.log_path) {
            return Ok(0);
        }
        let log = self.fs.read_to_string(&bug.log_path).map_err(|e| {
            BugWatchError::BugTrackerConnect {
                url: bug.log_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut imported = 0;
        for raw in split_log(&log) {
            let comment = match read_comment(&raw) {
                Ok(comment) => comment,
                Err(Skip::NoSender) => {
                    tracing::warn!(
                        remote_bug = %watch.remote_bug,
                        "skipping comment without a usable sender"
                    );
                    continue;
                }
                Err(Skip::NoMessageId) => {
                    tracing::warn!(
                        remote_bug = %watch.remote_bug,
                        "skipping comment without a Message-ID"
                    );
                    continue;
                }
                Err(Skip::Malformed(e)) => {
                    tracing::warn!(
                        remote_bug = %watch.remote_bug,
                        error = %e,
                        "skipping malformed comment"
                    );
                    continue;
                }
            };

            let known = repository
                .has_comment(watch.local_bug, &comment.message_id)
                .map_err(|e| storage(&*e))?;
            if known {
                continue;
            }
            let author = repository
                .ensure_person(&comment.email, comment.display_name.as_deref())
                .map_err(|e| storage(&*e))?;
            repository
                .link_comment(ImportedComment {
                    id: repository.new_comment_id(),
                    local_bug: watch.local_bug,
                    watch_id: watch.id,
                    message_id: comment.message_id,
                    author: author.id,
                    subject: comment.subject,
                    body: comment.body,
                    date: comment.date,
                })
                .map_err(|e| storage(&*e))?;
            imported += 1;
        }

        tracing::info!(
            remote_bug = %watch.remote_bug,
            local_bug = watch.local_bug,
            imported,
            "imported debbugs comments"
        );
        Ok(imported)
    }
}

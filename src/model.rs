//! Domain records shared by the tracker adapters, the orchestrator and the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw status recorded when a tracker reports nothing usable for a bug.
pub const UNKNOWN_REMOTE_STATUS: &str = "UNKNOWN";

/// The family of software an external tracker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugTrackerType {
    /// Bugzilla, including the Issuezilla fork.
    Bugzilla,
    /// Debian's debbugs, read from a local mirror of its spool.
    Debbugs,
    /// Mantis.
    Mantis,
    /// Trac.
    Trac,
    /// Roundup.
    Roundup,
    /// SourceForge's hosted tracker.
    SourceForge,
    /// A bare e-mail address; nothing can be polled.
    Email,
}

impl fmt::Display for BugTrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bugzilla => "bugzilla",
            Self::Debbugs => "debbugs",
            Self::Mantis => "mantis",
            Self::Trac => "trac",
            Self::Roundup => "roundup",
            Self::SourceForge => "sourceforge",
            Self::Email => "email",
        };
        f.write_str(name)
    }
}

impl FromStr for BugTrackerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bugzilla" => Ok(Self::Bugzilla),
            "debbugs" => Ok(Self::Debbugs),
            "mantis" => Ok(Self::Mantis),
            "trac" => Ok(Self::Trac),
            "roundup" => Ok(Self::Roundup),
            "sourceforge" => Ok(Self::SourceForge),
            "email" => Ok(Self::Email),
            other => Err(format!(
                "unknown tracker type {other:?} (expected bugzilla, debbugs, mantis, trac, \
                 roundup, sourceforge or email)"
            )),
        }
    }
}

/// One external tracker installation. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugTrackerInstance {
    /// Short name used to refer to the tracker from the CLI and from watches.
    pub name: String,
    /// Base URL of the installation (or of the local mirror, for debbugs).
    pub base_url: String,
    /// Which adapter speaks to this tracker.
    pub tracker_type: BugTrackerType,
    /// Version string, when already known. Bugzilla asks the server otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The local status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocalStatus {
    /// Reported, not yet looked at.
    New,
    /// Reproduced or otherwise acknowledged.
    Confirmed,
    /// Someone is working on it.
    InProgress,
    /// Fixed in a development branch.
    FixCommitted,
    /// Fix shipped.
    FixReleased,
    /// Not a bug.
    Invalid,
    /// Will not be fixed.
    WontFix,
    /// Waiting on more information.
    Incomplete,
    /// The remote status could not be mapped.
    Unknown,
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Confirmed => "CONFIRMED",
            Self::InProgress => "INPROGRESS",
            Self::FixCommitted => "FIXCOMMITTED",
            Self::FixReleased => "FIXRELEASED",
            Self::Invalid => "INVALID",
            Self::WontFix => "WONTFIX",
            Self::Incomplete => "INCOMPLETE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Why the last check of a watch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClassification {
    /// The tracker could not be reached or answered with an HTTP error.
    ConnectionError,
    /// The tracker did not answer in time.
    Timeout,
    /// The remote bug id is syntactically wrong for this tracker.
    InvalidBugId,
    /// The tracker does not know the remote bug.
    BugNotFound,
    /// The data for the remote bug could not be understood.
    UnparsableBug,
    /// The tracker itself (its version, its version document) could not be understood.
    UnparsableBugTracker,
    /// The tracker is of a kind that cannot be synchronized.
    UnsupportedBugTracker,
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InvalidBugId => "INVALID_BUG_ID",
            Self::BugNotFound => "BUG_NOT_FOUND",
            Self::UnparsableBug => "UNPARSABLE_BUG",
            Self::UnparsableBugTracker => "UNPARSABLE_BUG_TRACKER",
            Self::UnsupportedBugTracker => "UNSUPPORTED_BUG_TRACKER",
        };
        f.write_str(name)
    }
}

/// Ties one local bug to one remote bug on one tracker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugWatch {
    /// Identifier of the watch itself.
    pub id: u64,
    /// Name of the [`BugTrackerInstance`] the remote bug lives on.
    pub tracker: String,
    /// The tracker-specific remote bug identifier.
    pub remote_bug: String,
    /// The local bug this watch belongs to.
    pub local_bug: u64,
    /// Last raw status reported by the tracker.
    #[serde(default)]
    pub remote_status: Option<String>,
    /// Last normalized status.
    #[serde(default)]
    pub local_status: Option<LocalStatus>,
    /// When the watch was last checked, successfully or not.
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// When the remote status last changed.
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    /// Classification of the last failure, cleared on success.
    #[serde(default)]
    pub last_error: Option<ErrorClassification>,
}

impl BugWatch {
    /// Creates a watch that has never been checked.
    pub fn new(
        id: u64,
        tracker: impl Into<String>,
        remote_bug: impl Into<String>,
        local_bug: u64,
    ) -> Self {
        Self {
            id,
            tracker: tracker.into(),
            remote_bug: remote_bug.into(),
            local_bug,
            remote_status: None,
            local_status: None,
            last_checked: None,
            last_changed: None,
            last_error: None,
        }
    }

    /// Records a successful check. `last_changed` only moves when the remote
    /// status differs from the one seen before.
    pub fn record_status(
        &mut self,
        remote_status: &str,
        local_status: LocalStatus,
        now: DateTime<Utc>,
    ) {
        if self.remote_status.as_deref() != Some(remote_status) {
            self.last_changed = Some(now);
        }
        self.remote_status = Some(remote_status.to_string());
        self.local_status = Some(local_status);
        self.last_checked = Some(now);
        self.last_error = None;
    }

    /// Records a classified failure. Status fields are left as they were.
    pub fn record_error(&mut self, classification: ErrorClassification, now: DateTime<Utc>) {
        self.last_checked = Some(now);
        self.last_error = Some(classification);
    }
}

/// A local identity, created on demand for the senders of imported comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Identifier of the person.
    pub id: String,
    /// E-mail address, the lookup key.
    pub email: String,
    /// Display name from the first message seen, if any.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A remote comment linked to a local bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedComment {
    /// Identifier of the comment.
    pub id: String,
    /// Local bug the comment is linked to.
    pub local_bug: u64,
    /// Watch through which the comment arrived.
    pub watch_id: u64,
    /// RFC 822 Message-ID; unique per local bug.
    pub message_id: String,
    /// [`Person::id`] of the sender.
    pub author: String,
    /// Subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// Message body.
    pub body: String,
    /// Date header, as sent.
    #[serde(default)]
    pub date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn tracker_types_parse_from_their_display_names() {
        for tracker_type in [
            BugTrackerType::Bugzilla,
            BugTrackerType::Debbugs,
            BugTrackerType::Mantis,
            BugTrackerType::Trac,
            BugTrackerType::Roundup,
            BugTrackerType::SourceForge,
            BugTrackerType::Email,
        ] {
            assert_eq!(
                tracker_type.to_string().parse::<BugTrackerType>(),
                Ok(tracker_type)
            );
        }
        assert_eq!("Trac".parse::<BugTrackerType>(), Ok(BugTrackerType::Trac));
        assert!("jira".parse::<BugTrackerType>().unwrap_err().contains("jira"));
    }

    #[test]
    fn record_status_moves_last_changed_only_on_change() {
        let mut watch = BugWatch::new(1, "gnome", "42", 7);
        watch.record_status("NEW", LocalStatus::Confirmed, at(1));
        assert_eq!(watch.last_changed, Some(at(1)));

        watch.record_status("NEW", LocalStatus::Confirmed, at(2));
        assert_eq!(watch.last_changed, Some(at(1)));
        assert_eq!(watch.last_checked, Some(at(2)));

        watch.record_status("RESOLVED FIXED", LocalStatus::FixReleased, at(3));
        assert_eq!(watch.last_changed, Some(at(3)));
    }

    #[test]
    fn record_error_keeps_status_and_stamps_time() {
        let mut watch = BugWatch::new(1, "gnome", "42", 7);
        watch.record_status("NEW", LocalStatus::Confirmed, at(1));
        watch.record_error(ErrorClassification::Timeout, at(2));

        assert_eq!(watch.remote_status.as_deref(), Some("NEW"));
        assert_eq!(watch.last_error, Some(ErrorClassification::Timeout));
        assert_eq!(watch.last_checked, Some(at(2)));
    }

    #[test]
    fn success_clears_previous_error() {
        let mut watch = BugWatch::new(1, "gnome", "42", 7);
        watch.record_error(ErrorClassification::ConnectionError, at(1));
        watch.record_status("NEW", LocalStatus::Confirmed, at(2));
        assert_eq!(watch.last_error, None);
    }

    #[test]
    fn enums_serialize_to_wire_names() {
        assert_eq!(
            serde_json::to_value(LocalStatus::FixCommitted).unwrap(),
            "FIXCOMMITTED"
        );
        assert_eq!(
            serde_json::to_value(ErrorClassification::UnparsableBugTracker).unwrap(),
            "UNPARSABLE_BUG_TRACKER"
        );
        assert_eq!(
            serde_json::to_value(BugTrackerType::SourceForge).unwrap(),
            "sourceforge"
        );
    }
}

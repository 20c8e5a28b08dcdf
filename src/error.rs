//! Error taxonomy shared by the tracker adapters and the orchestrator.
//!
//! Every failure an adapter can report is a [`BugWatchError`]. The
//! orchestrator turns errors into the persisted [`ErrorClassification`]
//! through [`BugWatchError::classification`]; variants that map to `None` are
//! failures nobody has modeled yet and are only logged.

use crate::model::{BugTrackerType, ErrorClassification};
use crate::ports::HttpError;

/// A failure while synchronizing watches against a remote tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BugWatchError {
    /// The tracker could not be reached, or answered with an HTTP error.
    #[error("could not connect to {url}: {reason}")]
    BugTrackerConnect {
        /// URL (or mirror path) being fetched.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The tracker did not answer in time.
    #[error("timed out fetching {url}")]
    Timeout {
        /// URL being fetched.
        url: String,
    },

    /// The remote bug id has the wrong syntax for this tracker.
    #[error("invalid remote bug id {remote_bug:?}: {reason}")]
    InvalidBugId {
        /// The offending id.
        remote_bug: String,
        /// What the tracker expects instead.
        reason: String,
    },

    /// The remote bug is not in the snapshot.
    #[error("remote bug {remote_bug} not found")]
    BugNotFound {
        /// The missing id.
        remote_bug: String,
    },

    /// Data for a remote bug, or a bug listing, could not be understood.
    #[error("unparsable bug data: {reason}")]
    UnparsableBug {
        /// What could not be parsed.
        reason: String,
    },

    /// The tracker's own metadata could not be understood.
    #[error("unparsable bug tracker {url}: {reason}")]
    UnparsableBugTracker {
        /// Tracker base URL.
        url: String,
        /// What could not be parsed.
        reason: String,
    },

    /// The tracker's version string could not be parsed.
    #[error("failed to parse version {version:?} for {url}")]
    UnparsableBugTrackerVersion {
        /// Tracker base URL.
        url: String,
        /// The version string as found.
        version: String,
    },

    /// No adapter exists for this kind of tracker.
    #[error("unsupported bug tracker type: {tracker_type}")]
    UnsupportedBugTracker {
        /// The rejected type.
        tracker_type: BugTrackerType,
    },

    /// The remote bug exists but cannot be viewed anonymously.
    #[error("remote bug {remote_bug} is private")]
    PrivateRemoteBug {
        /// The private bug.
        remote_bug: String,
    },

    /// The tracker rendered an application error page with a success status.
    #[error("remote application error #{code}: {message}")]
    RemoteApplicationError {
        /// Tracker-specific error code.
        code: String,
        /// Message shown on the page.
        message: String,
    },

    /// The local bug database rejected a write.
    #[error("storage failure: {reason}")]
    Storage {
        /// Underlying error text.
        reason: String,
    },
}

impl BugWatchError {
    /// Maps the error onto the persisted classification, if it has one.
    #[must_use]
    pub fn classification(&self) -> Option<ErrorClassification> {
        match self {
            Self::BugTrackerConnect { .. } => Some(ErrorClassification::ConnectionError),
            Self::Timeout { .. } => Some(ErrorClassification::Timeout),
            Self::InvalidBugId { .. } => Some(ErrorClassification::InvalidBugId),
            Self::BugNotFound { .. } => Some(ErrorClassification::BugNotFound),
            Self::UnparsableBug { .. } => Some(ErrorClassification::UnparsableBug),
            Self::UnparsableBugTracker { .. } | Self::UnparsableBugTrackerVersion { .. } => {
                Some(ErrorClassification::UnparsableBugTracker)
            }
            Self::UnsupportedBugTracker { .. } => Some(ErrorClassification::UnsupportedBugTracker),
            Self::PrivateRemoteBug { .. }
            | Self::RemoteApplicationError { .. }
            | Self::Storage { .. } => None,
        }
    }

    /// Shorthand for [`BugWatchError::InvalidBugId`].
    pub fn invalid_id(remote_bug: &str, reason: impl Into<String>) -> Self {
        Self::InvalidBugId {
            remote_bug: remote_bug.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BugWatchError::BugNotFound`].
    #[must_use]
    pub fn not_found(remote_bug: &str) -> Self {
        Self::BugNotFound {
            remote_bug: remote_bug.to_string(),
        }
    }

    /// Shorthand for [`BugWatchError::UnparsableBug`].
    pub fn unparsable(reason: impl Into<String>) -> Self {
        Self::UnparsableBug {
            reason: reason.into(),
        }
    }
}

impl From<HttpError> for BugWatchError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout { url } => Self::Timeout { url },
            HttpError::Connect { url, reason } => Self::BugTrackerConnect { url, reason },
        }
    }
}

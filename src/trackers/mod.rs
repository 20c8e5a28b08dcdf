//! Adapters for external bug trackers.
//!
//! Each tracker family gets one [`ExternalBugTracker`] implementation. An
//! adapter is built per run by [`for_instance`], fills a private snapshot of
//! remote bugs in [`initialize`](ExternalBugTracker::initialize), and answers
//! status questions from that snapshot without further I/O.

pub mod bugzilla;
pub mod debbugs;
pub mod fetch;
pub mod mantis;
pub mod roundup;
pub mod sourceforge;
pub mod trac;

use crate::config::SyncConfig;
use crate::context::ServiceContext;
use crate::error::BugWatchError;
use crate::model::{
    BugTrackerInstance, BugTrackerType, BugWatch, LocalStatus, UNKNOWN_REMOTE_STATUS,
};
use crate::ports::BugRepository;

pub use bugzilla::Bugzilla;
pub use debbugs::Debbugs;
pub use mantis::Mantis;
pub use roundup::Roundup;
pub use sourceforge::SourceForge;
pub use trac::Trac;

/// The contract every tracker adapter honors.
pub trait ExternalBugTracker {
    /// Where the tracker lives, for log context.
    fn base_url(&self) -> &str;

    /// Most watches one run may process, `None` for no limit.
    fn batch_size(&self) -> Option<usize>;

    /// Fetches whatever is needed to answer for `remote_ids`. Called once per
    /// run, before any status is asked for.
    ///
    /// # Errors
    ///
    /// Any failure here means no remote data was obtained; the orchestrator
    /// attributes it to every watch in the run.
    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError>;

    /// Raw, tracker-specific status of one remote bug.
    ///
    /// # Errors
    ///
    /// [`BugWatchError::InvalidBugId`] for ids this tracker cannot have,
    /// [`BugWatchError::BugNotFound`] for ids missing from the snapshot, and
    /// other variants for data that was fetched but cannot be used.
    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError>;

    /// Maps a raw status onto the local vocabulary. Never fails; anything not
    /// understood becomes [`LocalStatus::Unknown`].
    fn normalize_status(&self, remote_status: &str) -> LocalStatus;

    /// Imports remote comments for one freshly updated watch and returns how
    /// many were added.
    ///
    /// # Errors
    ///
    /// Failures reading remote data or writing to the repository.
    fn import_comments(
        &self,
        _watch: &BugWatch,
        _repository: &dyn BugRepository,
    ) -> Result<usize, BugWatchError> {
        Ok(0)
    }
}

/// Builds the adapter for `instance`.
///
/// # Errors
///
/// Returns [`BugWatchError::UnsupportedBugTracker`] for tracker types that
/// cannot be polled.
pub fn for_instance<'a>(
    instance: &BugTrackerInstance,
    ctx: &'a ServiceContext,
    config: &SyncConfig,
) -> Result<Box<dyn ExternalBugTracker + 'a>, BugWatchError> {
    let adapter: Box<dyn ExternalBugTracker + 'a> = match instance.tracker_type {
        BugTrackerType::Bugzilla => Box::new(Bugzilla::new(instance, ctx.http.as_ref(), config)),
        BugTrackerType::Debbugs => Box::new(Debbugs::new(instance, ctx.fs.as_ref(), config)),
        BugTrackerType::Mantis => Box::new(Mantis::new(instance, ctx.http.as_ref(), config)),
        BugTrackerType::Trac => Box::new(Trac::new(instance, ctx.http.as_ref(), config)),
        BugTrackerType::Roundup => Box::new(Roundup::new(instance, ctx.http.as_ref(), config)),
        BugTrackerType::SourceForge => Box::new(SourceForge::new(instance, ctx.http.as_ref())),
        tracker_type @ BugTrackerType::Email => {
            return Err(BugWatchError::UnsupportedBugTracker { tracker_type });
        }
    };
    Ok(adapter)
}

/// Parses an all-digit remote id.
///
/// # Errors
///
/// Returns [`BugWatchError::InvalidBugId`] for anything else.
pub fn numeric_id(remote_bug: &str) -> Result<u64, BugWatchError> {
    if remote_bug.is_empty() || !remote_bug.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BugWatchError::invalid_id(remote_bug, "expected a decimal bug number"));
    }
    remote_bug
        .parse()
        .map_err(|_| BugWatchError::invalid_id(remote_bug, "bug number out of range"))
}

/// The well-formed ids among `remote_ids`. Malformed ones are reported per
/// watch by [`ExternalBugTracker::remote_status`].
#[must_use]
pub fn numeric_ids(remote_ids: &[String]) -> Vec<u64> {
    remote_ids
        .iter()
        .filter_map(|id| numeric_id(id).ok())
        .collect()
}

/// `true` for raw statuses that mean "nothing usable was reported".
#[must_use]
pub fn is_unknown_sentinel(remote_status: &str) -> bool {
    let trimmed = remote_status.trim();
    trimmed.is_empty() || trimmed == UNKNOWN_REMOTE_STATUS
}

/// Fallback for a raw status no table recognizes.
pub(crate) fn unrecognized(tracker: &str, base_url: &str, remote_status: &str) -> LocalStatus {
    tracing::warn!(tracker, base_url, remote_status, "unknown remote status");
    LocalStatus::Unknown
}

//! Watch synchronization: one pass over one tracker's watches.
//!
//! A pass caps the watch set, groups watches by remote bug, initializes the
//! adapter once for every remote id, then resolves ids one at a time. Only a
//! failed initialization aborts the pass; everything after that is isolated
//! to the watches of the remote id that failed.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;
use crate::context::ServiceContext;
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, BugWatch, ErrorClassification, LocalStatus};
use crate::ports::BugRepository;
use crate::trackers::{self, ExternalBugTracker};

/// What happened to one remote id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The tracker reported a status.
    Resolved {
        /// Raw status as reported.
        remote_status: String,
        /// The raw status in the local vocabulary.
        local_status: LocalStatus,
    },
    /// The tracker cannot have this bug, or does not.
    Rejected {
        /// `InvalidBugId` or `BugNotFound`.
        classification: ErrorClassification,
        /// The adapter's error.
        error: BugWatchError,
    },
    /// Anything else went wrong.
    Failed {
        /// Set when the failure is a modeled one.
        classification: Option<ErrorClassification>,
        /// The adapter's error.
        error: BugWatchError,
    },
}

/// Asks `adapter` about one remote id and sorts the answer into an [`Outcome`].
#[must_use]
pub fn resolve(adapter: &dyn ExternalBugTracker, remote_bug: &str) -> Outcome {
    match adapter.remote_status(remote_bug) {
        Ok(remote_status) => {
            let local_status = adapter.normalize_status(&remote_status);
            Outcome::Resolved {
                remote_status,
                local_status,
            }
        }
        Err(error @ BugWatchError::InvalidBugId { .. }) => Outcome::Rejected {
            classification: ErrorClassification::InvalidBugId,
            error,
        },
        Err(error @ BugWatchError::BugNotFound { .. }) => Outcome::Rejected {
            classification: ErrorClassification::BugNotFound,
            error,
        },
        Err(error) => Outcome::Failed {
            classification: error.classification(),
            error,
        },
    }
}

/// Totals for one completed pass. Counts are per remote id, except
/// `watches` and `comments_imported`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Tracker instance name.
    pub tracker: String,
    /// Watches taken into this pass, after capping.
    pub watches: usize,
    /// Distinct remote ids processed.
    pub remote_ids: usize,
    /// Remote ids that resolved to a status.
    pub updated: usize,
    /// Remote ids rejected as invalid or missing.
    pub rejected: usize,
    /// Remote ids that failed otherwise.
    pub failed: usize,
    /// Comments imported through the adapter's hook.
    pub comments_imported: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} remote bugs ({} watches): ",
            self.tracker, self.remote_ids, self.watches
        )?;
        write!(
            f,
            "{} updated, {} rejected, {} failed, {} comments imported",
            self.updated, self.rejected, self.failed, self.comments_imported
        )
    }
}

/// Runs synchronization passes, writing results through a [`BugRepository`].
pub struct BugWatchUpdater<'a> {
    ctx: &'a ServiceContext,
    repository: &'a dyn BugRepository,
    config: &'a SyncConfig,
}

impl<'a> BugWatchUpdater<'a> {
    /// Creates an updater that reads time and remote data through `ctx`.
    #[must_use]
    pub fn new(
        ctx: &'a ServiceContext,
        repository: &'a dyn BugRepository,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            ctx,
            repository,
            config,
        }
    }

    /// Builds the adapter for `instance` and runs one pass over `watches`.
    ///
    /// # Errors
    ///
    /// Returns the adapter construction or initialization error after
    /// recording it on every watch of the pass.
    pub fn update_tracker(
        &self,
        instance: &BugTrackerInstance,
        watches: Vec<BugWatch>,
    ) -> Result<SyncReport, BugWatchError> {
        match trackers::for_instance(instance, self.ctx, self.config) {
            Ok(mut adapter) => self.update_bug_watches(instance, adapter.as_mut(), watches),
            Err(error) => {
                let span = tracing::info_span!(
                    "sync",
                    tracker = %instance.name,
                    base_url = %instance.base_url
                );
                let _guard = span.enter();
                let mut watches = watches;
                self.broadcast(&error, &mut watches);
                Err(error)
            }
        }
    }

    /// Runs one pass over `watches` with an already built adapter.
    ///
    /// # Errors
    ///
    /// Returns the initialization error after recording it on every watch of
    /// the pass.
    pub fn update_bug_watches(
        &self,
        instance: &BugTrackerInstance,
        adapter: &mut dyn ExternalBugTracker,
        watches: Vec<BugWatch>,
    ) -> Result<SyncReport, BugWatchError> {
        let span = tracing::info_span!(
            "sync",
            tracker = %instance.name,
            base_url = %adapter.base_url()
        );
        let _guard = span.enter();

        let mut watches = cap(watches, adapter.batch_size());
        let (remote_ids, by_remote) = group(&watches);
        let mut report = SyncReport {
            tracker: instance.name.clone(),
            watches: watches.len(),
            remote_ids: remote_ids.len(),
            ..SyncReport::default()
        };

        if let Err(error) = adapter.initialize(&remote_ids) {
            self.broadcast(&error, &mut watches);
            return Err(error);
        }

        for remote_bug in &remote_ids {
            let indices = by_remote.get(remote_bug).map_or(&[][..], Vec::as_slice);
            let now = self.ctx.clock.now();
            match resolve(adapter, remote_bug) {
                Outcome::Resolved {
                    remote_status,
                    local_status,
                } => {
                    report.updated += 1;
                    for &i in indices {
                        let watch = &mut watches[i];
                        watch.record_status(&remote_status, local_status, now);
                        self.save(watch);
                        report.comments_imported += self.import_comments(adapter, watch);
                    }
                }
                Outcome::Rejected {
                    classification,
                    error,
                } => {
                    report.rejected += 1;
                    tracing::info!(remote_bug = %remote_bug, error = %error, "remote bug rejected");
                    self.record_error(&mut watches, indices, classification, now);
                }
                Outcome::Failed {
                    classification,
                    error,
                } => {
                    report.failed += 1;
                    let local_bugs: Vec<u64> =
                        indices.iter().map(|&i| watches[i].local_bug).collect();
                    tracing::error!(
                        base_url = %adapter.base_url(),
                        remote_bug = %remote_bug,
                        ?local_bugs,
                        ?classification,
                        error = %error,
                        "failed to update remote bug"
                    );
                    if let Some(classification) = classification {
                        self.record_error(&mut watches, indices, classification, now);
                    }
                }
            }
        }

        tracing::info!(
            remote_ids = report.remote_ids,
            updated = report.updated,
            rejected = report.rejected,
            failed = report.failed,
            comments = report.comments_imported,
            "sync pass finished"
        );
        Ok(report)
    }

    /// Records a run-level failure on every watch. Unmodeled failures leave
    /// the watches untouched.
    fn broadcast(&self, error: &BugWatchError, watches: &mut [BugWatch]) {
        let classification = error.classification();
        tracing::error!(
            error = %error,
            ?classification,
            watches = watches.len(),
            "sync pass aborted"
        );
        let Some(classification) = classification else {
            return;
        };
        let now = self.ctx.clock.now();
        for watch in watches {
            watch.record_error(classification, now);
            self.save(watch);
        }
    }

    fn record_error(
        &self,
        watches: &mut [BugWatch],
        indices: &[usize],
        classification: ErrorClassification,
        now: DateTime<Utc>,
    ) {
        for &i in indices {
            watches[i].record_error(classification, now);
            self.save(&watches[i]);
        }
    }

    fn save(&self, watch: &BugWatch) {
        if let Err(e) = self.repository.save_watch(watch) {
            tracing::error!(watch = watch.id, error = %e, "failed to save watch");
        }
    }

    fn import_comments(&self, adapter: &dyn ExternalBugTracker, watch: &BugWatch) -> usize {
        adapter
            .import_comments(watch, self.repository)
            .unwrap_or_else(|e| {
                tracing::error!(
                    remote_bug = %watch.remote_bug,
                    local_bug = watch.local_bug,
                    error = %e,
                    "failed to import comments"
                );
                0
            })
    }
}

/// Keeps at most `limit` watches, least recently checked first.
fn cap(mut watches: Vec<BugWatch>, limit: Option<usize>) -> Vec<BugWatch> {
    if let Some(limit) = limit {
        if watches.len() > limit {
            // `None` sorts before any timestamp: never-checked watches go first.
            watches.sort_by_key(|w| (w.last_checked, w.id));
            watches.truncate(limit);
        }
    }
    watches
}

/// Distinct remote ids in processing order, and the watches behind each.
fn group(watches: &[BugWatch]) -> (Vec<String>, HashMap<String, Vec<usize>>) {
    let mut by_remote: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, watch) in watches.iter().enumerate() {
        by_remote
            .entry(watch.remote_bug.clone())
            .or_default()
            .push(i);
    }
    let mut remote_ids: Vec<String> = by_remote.keys().cloned().collect();
    sort_remote_ids(&mut remote_ids);
    (remote_ids, by_remote)
}

/// Numeric order when every id is a number, lexical otherwise.
pub fn sort_remote_ids(ids: &mut [String]) {
    let numeric: Option<Vec<u64>> = ids.iter().map(|id| id.parse().ok()).collect();
    match numeric {
        Some(_) => ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX)),
        None => ids.sort(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::cassette::config::CassetteConfig;
    use crate::model::BugTrackerType;
    use crate::ports::Clock;
    use crate::store::test_support::{MemFs, SeqIds};
    use crate::store::WatchStore;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        }
    }

    /// Answers from a fixed table and remembers what it was initialized with.
    #[derive(Default)]
    struct FakeTracker {
        statuses: HashMap<String, Result<String, BugWatchError>>,
        init_error: Option<BugWatchError>,
        batch_size: Option<usize>,
        initialized: Mutex<Vec<Vec<String>>>,
        hooked: Mutex<Vec<u64>>,
    }

    impl FakeTracker {
        fn with(mut self, remote_bug: &str, status: Result<&str, BugWatchError>) -> Self {
            let status = status.map(ToString::to_string);
            self.statuses.insert(remote_bug.to_string(), status);
            self
        }
    }

    impl ExternalBugTracker for FakeTracker {
        fn base_url(&self) -> &str {
            "http://fake"
        }

        fn batch_size(&self) -> Option<usize> {
            self.batch_size
        }

        fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
            self.initialized.lock().unwrap().push(remote_ids.to_vec());
            self.init_error.clone().map_or(Ok(()), Err)
        }

        fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
            self.statuses
                .get(remote_bug)
                .cloned()
                .unwrap_or_else(|| Err(BugWatchError::not_found(remote_bug)))
        }

        fn normalize_status(&self, remote_status: &str) -> LocalStatus {
            match remote_status {
                "NEW" => LocalStatus::New,
                "FIXED" => LocalStatus::FixReleased,
                _ => LocalStatus::Unknown,
            }
        }

        fn import_comments(
            &self,
            watch: &BugWatch,
            _: &dyn BugRepository,
        ) -> Result<usize, BugWatchError> {
            self.hooked.lock().unwrap().push(watch.id);
            Ok(1)
        }
    }

    fn context() -> ServiceContext {
        let config = CassetteConfig::panic_on_unspecified();
        let mut ctx = ServiceContext::replaying_from(&config).unwrap();
        ctx.clock = Box::new(FixedClock);
        ctx
    }

    fn instance() -> BugTrackerInstance {
        BugTrackerInstance {
            name: "fake".to_string(),
            base_url: "http://fake".to_string(),
            tracker_type: BugTrackerType::Bugzilla,
            version: None,
        }
    }

    fn watches(remote_bugs: &[&str]) -> Vec<BugWatch> {
        remote_bugs
            .iter()
            .zip(1..)
            .map(|(remote_bug, id)| BugWatch::new(id, "fake", *remote_bug, 100 + id))
            .collect()
    }

    fn saved(store: &WatchStore<'_>) -> HashMap<u64, BugWatch> {
        store.watches().into_iter().map(|w| (w.id, w)).collect()
    }

    #[test]
    fn missing_bug_does_not_stop_the_others() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let mut tracker = FakeTracker::default()
            .with("1", Ok("NEW"))
            .with("3", Ok("FIXED"));

        let report = BugWatchUpdater::new(&ctx, &store, &config)
            .update_bug_watches(&instance(), &mut tracker, watches(&["1", "2", "3"]))
            .unwrap();

        assert_eq!(
            (
                report.remote_ids,
                report.updated,
                report.rejected,
                report.failed,
            ),
            (3, 2, 1, 0)
        );
        let saved = saved(&store);
        assert_eq!(saved[&1].local_status, Some(LocalStatus::New));
        assert_eq!(saved[&2].last_error, Some(ErrorClassification::BugNotFound));
        assert_eq!(saved[&2].remote_status, None);
        assert_eq!(saved[&3].remote_status.as_deref(), Some("FIXED"));
        assert_eq!(saved[&3].last_error, None);
    }

    #[test]
    fn initialization_failure_is_recorded_on_every_watch() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let mut tracker = FakeTracker {
            init_error: Some(BugWatchError::Timeout {
                url: "http://fake".into(),
            }),
            ..FakeTracker::default()
        }
        .with("1", Ok("NEW"));

        let err = BugWatchUpdater::new(&ctx, &store, &config)
            .update_bug_watches(&instance(), &mut tracker, watches(&["1", "2"]))
            .unwrap_err();

        assert_eq!(err.classification(), Some(ErrorClassification::Timeout));
        for watch in store.watches() {
            assert_eq!(watch.last_error, Some(ErrorClassification::Timeout));
            assert_eq!(watch.remote_status, None);
        }
    }

    #[test]
    fn unmodeled_initialization_failure_leaves_watches_alone() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let mut tracker = FakeTracker {
            init_error: Some(BugWatchError::RemoteApplicationError {
                code: "1200".into(),
                message: "m".into(),
            }),
            ..FakeTracker::default()
        };

        let updater = BugWatchUpdater::new(&ctx, &store, &config);
        assert!(updater.update_bug_watches(&instance(), &mut tracker, watches(&["1"])).is_err());
        assert!(store.watches().is_empty());
    }

    #[test]
    fn watches_sharing_a_remote_bug_are_resolved_once() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let mut tracker = FakeTracker::default()
            .with("10", Ok("NEW"))
            .with("9", Ok("FIXED"));

        let report = BugWatchUpdater::new(&ctx, &store, &config)
            .update_bug_watches(&instance(), &mut tracker, watches(&["10", "9", "10"]))
            .unwrap();

        assert_eq!(report.remote_ids, 2);
        assert_eq!(report.watches, 3);
        assert_eq!(report.comments_imported, 3);
        assert_eq!(
            tracker.initialized.lock().unwrap().as_slice(),
            [vec!["9".to_string(), "10".to_string()]]
        );
        let saved = saved(&store);
        assert_eq!(saved[&1].remote_status, saved[&3].remote_status);
        assert_eq!(tracker.hooked.lock().unwrap().len(), 3);
    }

    #[test]
    fn unmodeled_per_bug_failure_is_logged_only() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let mut tracker = FakeTracker::default()
            .with(
                "1",
                Err(BugWatchError::PrivateRemoteBug {
                    remote_bug: "1".into(),
                }),
            )
            .with("2", Err(BugWatchError::unparsable("garbage")))
            .with("x", Err(BugWatchError::invalid_id("x", "digits")));

        let report = BugWatchUpdater::new(&ctx, &store, &config)
            .update_bug_watches(&instance(), &mut tracker, watches(&["1", "2", "x"]))
            .unwrap();

        assert_eq!((report.updated, report.rejected, report.failed), (0, 1, 2));
        let saved = saved(&store);
        assert!(!saved.contains_key(&1));
        assert_eq!(
            saved[&2].last_error,
            Some(ErrorClassification::UnparsableBug)
        );
        assert_eq!(
            saved[&3].last_error,
            Some(ErrorClassification::InvalidBugId)
        );
    }

    #[test]
    fn batch_size_caps_the_pass_to_the_stalest_watches() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let mut tracker = FakeTracker {
            batch_size: Some(1),
            ..FakeTracker::default()
        }
            .with("1", Ok("NEW"))
            .with("2", Ok("NEW"));
        let mut input = watches(&["1", "2"]);
        input[0].last_checked = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let report = BugWatchUpdater::new(&ctx, &store, &config)
            .update_bug_watches(&instance(), &mut tracker, input)
            .unwrap();

        assert_eq!(report.watches, 1);
        assert_eq!(
            tracker.initialized.lock().unwrap().as_slice(),
            [vec!["2".to_string()]]
        );
    }

    #[test]
    fn unsupported_trackers_fail_like_initialization() {
        let ctx = context();
        let (fs, ids) = (MemFs::default(), SeqIds::default());
        let store = WatchStore::open(&fs, &ids, std::path::Path::new("/s")).unwrap();
        let config = SyncConfig::default();
        let email = BugTrackerInstance {
            tracker_type: BugTrackerType::Email,
            ..instance()
        };

        let err = BugWatchUpdater::new(&ctx, &store, &config)
            .update_tracker(&email, watches(&["1"]))
            .unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::UnsupportedBugTracker)
        );
        assert_eq!(
            store.watches()[0].last_error,
            Some(ErrorClassification::UnsupportedBugTracker)
        );
    }

    #[test]
    fn remote_ids_sort_numerically_when_possible() {
        let mut ids = vec!["10".to_string(), "9".to_string(), "100".to_string()];
        sort_remote_ids(&mut ids);
        assert_eq!(ids, ["9", "10", "100"]);

        let mut mixed = vec!["b".to_string(), "10".to_string(), "9".to_string()];
        sort_remote_ids(&mut mixed);
        assert_eq!(mixed, ["10", "9", "b"]);
    }
}

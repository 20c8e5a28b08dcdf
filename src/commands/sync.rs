//! `bugwatch sync` command.

use crate::config::SyncConfig;
use crate::context::ServiceContext;
use crate::error::BugWatchError;
use crate::model::BugTrackerInstance;
use crate::store::WatchStore;
use crate::sync::{BugWatchUpdater, SyncReport};

/// Execute the `sync` command for one tracker, or for all of them.
///
/// # Errors
///
/// Returns an error string if the store cannot be opened, the tracker is
/// unknown, or any pass was aborted.
pub fn run(
    ctx: &ServiceContext,
    config: &SyncConfig,
    tracker: Option<&str>,
    all: bool,
) -> Result<(), String> {
    let store = WatchStore::in_context(ctx, &config.store_root)?;

    let targets = if all {
        store.trackers()
    } else {
        let name = tracker.ok_or("Specify a tracker name or --all")?;
        ctx.set_recording_tracker(name);
        vec![store.tracker(name).ok_or_else(|| format!("Unknown tracker: {name}"))?]
    };
    if targets.is_empty() {
        println!("No trackers configured in {}.", store.path().display());
        return Ok(());
    }

    let mut aborted = Vec::new();
    for (name, result) in sync_trackers(ctx, &store, config, &targets) {
        match result {
            Ok(report) => println!("{report}"),
            Err(e) => {
                println!("{name}: aborted: {e}");
                aborted.push(name);
            }
        }
    }

    if aborted.is_empty() {
        Ok(())
    } else {
        Err(format!("Sync aborted for: {}", aborted.join(", ")))
    }
}

/// Runs one pass per tracker, in order. An aborted pass does not stop the
/// ones after it.
pub fn sync_trackers(
    ctx: &ServiceContext,
    store: &WatchStore<'_>,
    config: &SyncConfig,
    targets: &[BugTrackerInstance],
) -> Vec<(String, Result<SyncReport, BugWatchError>)> {
    let updater = BugWatchUpdater::new(ctx, store, config);
    targets
        .iter()
        .map(|instance| {
            let watches = store.watches_for(&instance.name);
            let result = if watches.is_empty() {
                Ok(SyncReport {
                    tracker: instance.name.clone(),
                    ..SyncReport::default()
                })
            } else {
                updater.update_tracker(instance, watches)
            };
            (instance.name.clone(), result)
        })
        .collect()
}

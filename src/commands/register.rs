//! `bugwatch track` and `bugwatch watch` commands.

use crate::config::SyncConfig;
use crate::context::ServiceContext;
use crate::model::BugTrackerInstance;
use crate::store::WatchStore;

/// Execute the `track` command.
///
/// # Errors
///
/// Returns an error string if the store cannot be opened or written.
pub fn track(
    ctx: &ServiceContext,
    config: &SyncConfig,
    instance: BugTrackerInstance,
) -> Result<(), String> {
    let store = WatchStore::in_context(ctx, &config.store_root)?;
    let replacing = store.tracker(&instance.name).is_some();
    let summary = format!(
        "{} ({}, {})",
        instance.name, instance.tracker_type, instance.base_url
    );
    store.add_tracker(instance)?;

    if replacing {
        println!("Updated tracker {summary}.");
    } else {
        println!("Registered tracker {summary}.");
    }
    Ok(())
}

/// Execute the `watch` command.
///
/// # Errors
///
/// Returns an error string if the tracker is unknown or the store cannot be
/// opened or written.
pub fn watch(
    ctx: &ServiceContext,
    config: &SyncConfig,
    tracker: &str,
    remote_bug: &str,
    local_bug: u64,
) -> Result<(), String> {
    if remote_bug.trim().is_empty() {
        return Err("Remote bug must not be empty".to_string());
    }
    let store = WatchStore::in_context(ctx, &config.store_root)?;
    let watch = store.add_watch(tracker, remote_bug, local_bug)?;
    println!(
        "Watch {} links local bug {} to {} bug {}.",
        watch.id, watch.local_bug, watch.tracker, watch.remote_bug
    );
    Ok(())
}

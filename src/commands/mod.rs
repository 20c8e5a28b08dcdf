//! Command dispatch and handlers.

pub mod register;
pub mod status;
pub mod sync;

use std::env;
use std::path::PathBuf;

use crate::cli::{Cli, Command};
use crate::config::SyncConfig;
use crate::context::ServiceContext;
use crate::model::BugTrackerInstance;

/// Dispatch a parsed command line to its handler.
///
/// When `BUGWATCH_RECORD` is set to a directory path, every port interaction
/// is recorded to per-port cassette files in a timestamped directory below it.
///
/// # Errors
///
/// Returns an error string if configuration is invalid or the selected
/// command handler fails.
pub fn dispatch(cli: &Cli) -> Result<(), String> {
    let mut config = SyncConfig::from_env()?;
    if let Some(store) = &cli.store {
        config.store_root.clone_from(store);
    }

    let ctx = match env::var("BUGWATCH_RECORD") {
        Ok(dir) => ServiceContext::recording_at(&PathBuf::from(dir), &config)?,
        Err(_) => ServiceContext::live(&config)?,
    };

    let result = dispatch_with_context(&cli.command, &ctx, &config);

    // Cassettes are written even when the command failed.
    if let Some(dir) = ctx.finish_recording()? {
        eprintln!("Recording saved to: {}", dir.display());
    }

    result
}

/// Dispatch a command with the given service context.
///
/// # Errors
///
/// Returns an error string if the selected command handler fails.
pub fn dispatch_with_context(
    command: &Command,
    ctx: &ServiceContext,
    config: &SyncConfig,
) -> Result<(), String> {
    match command {
        Command::Sync { tracker, all } => sync::run(ctx, config, tracker.as_deref(), *all),
        Command::Track {
            name,
            base_url,
            tracker_type,
            version,
        } => {
            let instance = BugTrackerInstance {
                name: name.clone(),
                base_url: base_url.clone(),
                tracker_type: *tracker_type,
                version: version.clone(),
            };
            register::track(ctx, config, instance)
        }
        Command::Watch {
            tracker,
            remote_bug,
            local_bug,
        } => register::watch(ctx, config, tracker, remote_bug, *local_bug),
        Command::Status { tracker } => status::run(ctx, config, tracker.as_deref()),
    }
}

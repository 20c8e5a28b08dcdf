//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::model::BugTrackerType;

/// Top-level CLI parser for `bugwatch`.
#[derive(Debug, Parser)]
#[command(
    name = "bugwatch",
    version,
    about = "Keep bug watches in step with external bug trackers"
)]
pub struct Cli {
    /// Directory holding `watches.yaml` (overrides `BUGWATCH_STORE`).
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one synchronization pass.
    Sync {
        /// Name of the tracker instance to synchronize.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        tracker: Option<String>,
        /// Synchronize every tracker instance, one after another.
        #[arg(long)]
        all: bool,
    },
    /// Register a tracker instance, replacing one with the same name.
    Track {
        /// Short name used by `sync` and `watch`.
        name: String,
        /// Base URL of the installation.
        base_url: String,
        /// bugzilla, debbugs, mantis, trac, roundup, sourceforge or email.
        #[arg(long = "type", value_name = "TYPE")]
        tracker_type: BugTrackerType,
        /// Known tracker version; Bugzilla asks the server when absent.
        #[arg(long)]
        version: Option<String>,
    },
    /// Watch a remote bug on behalf of a local one.
    Watch {
        /// Name of a registered tracker instance.
        tracker: String,
        /// Bug identifier on the remote tracker.
        remote_bug: String,
        /// Local bug number.
        local_bug: u64,
    },
    /// Show the state of every watch.
    Status {
        /// Only show watches on this tracker instance.
        tracker: Option<String>,
    },
}

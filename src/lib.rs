//! Core library entry for the `bugwatch` CLI.
//!
//! Bug watches tie local bugs to bugs on external trackers. A sync pass asks
//! one tracker about all of its watched bugs, maps each remote status onto
//! the local vocabulary and records the result, or the reason there is none,
//! on every watch.

pub mod adapters;
pub mod cassette;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod ports;
pub mod store;
pub mod sync;
pub mod trackers;

use clap::Parser;

/// Run the CLI with the provided arguments.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
pub fn run<I, T>(args: I) -> Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match cli::Cli::try_parse_from(args) {
        Ok(cli) => cli,
        // --help and --version are not failures.
        Err(err) if !err.use_stderr() => {
            print!("{err}");
            return Ok(());
        }
        Err(err) => return Err(err.to_string()),
    };
    commands::dispatch(&cli)
}

//! Cassettes: recorded port interactions that can be replayed in order.
//!
//! A sync run recorded against a live tracker (`BUGWATCH_RECORD=<dir>`)
//! produces one cassette per port. Replaying those cassettes reproduces the
//! run without network access, which is how tracker quirks become tests.

pub mod config;
pub mod format;
pub mod recorder;
pub mod replayer;
pub mod session;

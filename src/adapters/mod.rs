//! Port implementations.
//!
//! `live` talks to the real world, `recording` wraps a live adapter and
//! writes every call to a cassette, and `replaying` answers from a cassette.

pub mod live;
pub mod recording;
pub mod replaying;

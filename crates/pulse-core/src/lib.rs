//! Pulse Core - Beat synchronization and tempo control for DJ decks
//!
//! This crate is the per-deck tempo core of the Pulse DJ player. It tracks
//! where the playhead sits within a track's beat grid, computes the playback
//! rate that keeps a follower deck phase-locked to a master reference, and
//! handles the user-facing tempo controls (BPM tapping, grid nudging, beat
//! translation).
//!
//! The crate deliberately stops at the rate scalar and the target sample
//! position: audio I/O, resampling, and the sample-producing loop live in the
//! external engine buffer that consumes them.

pub mod beats;
pub mod deck;
pub mod lockfree;
pub mod sync;
pub mod tap;
pub mod types;

pub use types::*;

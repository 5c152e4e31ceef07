//! Peer deck queries
//!
//! When a deck is not following an explicit master it aligns against
//! another deck picked by the external sync arbiter. The arbiter hands the
//! core a view implementing this trait; the core never reaches across deck
//! boundaries by name.

use std::sync::Arc;

use crate::beats::BeatGrid;

/// Read-only view of another deck's engine buffer
pub trait SyncPeer {
    /// Effective playback BPM of the peer deck
    fn bpm(&self) -> f64;

    /// BPM measured around the peer's playhead
    fn local_bpm(&self) -> f64;

    /// Current playback speed ratio; 0.0 means stopped
    fn speed(&self) -> f64;

    /// Playhead position in interleaved stereo samples
    fn play_position(&self) -> f64;

    /// Snapshot of the peer's beat grid, if a gridded track is loaded
    fn beats(&self) -> Option<Arc<BeatGrid>>;
}

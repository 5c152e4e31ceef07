//! Common types for the tempo core
//!
//! Small value types shared across the beat grid, sync loop, and deck
//! controller, plus the sync-loop tuning constants.

use serde::{Deserialize, Serialize};

/// Number of decks in the DJ player
pub const NUM_DECKS: usize = 4;

/// Deck identifier (0-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeckId(pub usize);

impl DeckId {
    /// Create a new deck ID (panics if >= NUM_DECKS)
    pub fn new(id: usize) -> Self {
        assert!(id < NUM_DECKS, "Deck ID must be less than {}", NUM_DECKS);
        Self(id)
    }

    /// Get the deck number (1-4 for display)
    pub fn display_number(&self) -> usize {
        self.0 + 1
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deck{}", self.display_number())
    }
}

/// How a deck participates in cross-deck synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Independent playback, no sync adjustment
    #[default]
    None,
    /// Tracks a master reference (target beat distance + instantaneous BPM)
    Follower,
    /// Is the reference; never adjusts itself
    Master,
}

impl SyncMode {
    pub(crate) fn to_raw(self) -> u8 {
        match self {
            SyncMode::None => 0,
            SyncMode::Follower => 1,
            SyncMode::Master => 2,
        }
    }

    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SyncMode::Follower,
            2 => SyncMode::Master,
            _ => SyncMode::None,
        }
    }
}

/// Per-deck features published for downstream visualizers
///
/// Collected once per callback by [`crate::deck::TempoControl::collect_features`].
/// Fields stay `None` when the deck has no grid or no valid beat context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeckFeatures {
    /// Length of the current beat in seconds at the current playback rate
    pub beat_length_sec: Option<f64>,
    /// Fractional position within the current beat, in [0, 1)
    pub beat_fraction: Option<f64>,
}

/// Tuning constants for the proportional sync control loop
///
/// The defaults are the values the loop was tuned with; they are exposed as a
/// config struct so a settings file can override them for experimentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Phase error below which no adjustment is applied.
    /// Default: 0.01 (1% of a beat)
    pub error_threshold: f64,

    /// Phase error above which sync is so far gone we can't tell ahead from
    /// behind; respond with a fixed-magnitude catch-up instead.
    /// Default: 0.2
    pub train_wreck_threshold: f64,

    /// Maximum magnitude of the rate adjustment, as a deviation from 1.0.
    /// Default: 0.05
    pub adjustment_cap: f64,

    /// Maximum change of the adjustment between consecutive callbacks.
    /// Default: 0.02
    pub delta_cap: f64,

    /// Proportional control gain; higher values chase the master harder.
    /// Default: 0.7
    pub proportional_gain: f64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            error_threshold: 0.01,
            train_wreck_threshold: 0.2,
            adjustment_cap: 0.05,
            delta_cap: 0.02,
            proportional_gain: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_id_display() {
        let deck = DeckId::new(0);
        assert_eq!(deck.display_number(), 1);
        assert_eq!(deck.to_string(), "deck1");
    }

    #[test]
    fn test_sync_mode_raw_roundtrip() {
        for mode in [SyncMode::None, SyncMode::Follower, SyncMode::Master] {
            assert_eq!(SyncMode::from_raw(mode.to_raw()), mode);
        }
        // Unknown values degrade to independent playback
        assert_eq!(SyncMode::from_raw(7), SyncMode::None);
    }

    #[test]
    fn test_sync_tuning_defaults() {
        let tuning = SyncTuning::default();
        assert_eq!(tuning.error_threshold, 0.01);
        assert_eq!(tuning.train_wreck_threshold, 0.2);
        assert_eq!(tuning.adjustment_cap, 0.05);
    }
}

//! Lock-free observable deck state
//!
//! The typed record of every value the tempo core publishes or consumes
//! across threads. Each field is a single atomic word; the audio thread and
//! control threads read and write them without locks and accept
//! last-writer-wins semantics. No cross-field invariants hold between
//! threads; one callback may see a half-updated set of rate parameters and
//! the sync loop converges over the following callbacks.
//!
//! External subscribers (UI meters, the sync arbiter) clone the `Arc` and
//! poll the fields they care about.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::lockfree::{AtomicDouble, AtomicFlag};
use crate::sync::AdjusterState;
use crate::types::SyncMode;

/// Sample offset meaning "no beat here"
const ABSENT_BEAT: f64 = -1.0;

/// Observable values of one deck
pub struct DeckObservables {
    /// BPM tag of the loaded track, or a tapped override
    pub file_bpm: AtomicDouble,
    /// BPM measured around the playhead (falls back to the file BPM)
    pub local_bpm: AtomicDouble,
    /// Effective playback BPM: local BPM times the rate ratio
    pub engine_bpm: AtomicDouble,

    /// Rate slider position
    pub rate_slider: AtomicDouble,
    /// Slider range as a rate fraction (0.08 = +/-8%)
    pub rate_range: AtomicDouble,
    /// Slider direction, +1 or -1
    pub rate_dir: AtomicDouble,

    /// Published beat distance in [0, 1), adjusted by the user offset
    pub beat_distance: AtomicDouble,
    /// Cached beats around the playhead (negative = absent)
    prev_beat: AtomicDouble,
    next_beat: AtomicDouble,

    /// Playhead in interleaved stereo samples, pushed once per callback
    pub current_sample: AtomicDouble,
    pub total_samples: AtomicDouble,

    sync_mode: AtomicU8,
    pub quantize: AtomicFlag,
    pub reverse: AtomicFlag,

    pub loop_enabled: AtomicFlag,
    pub loop_start: AtomicDouble,
    pub loop_end: AtomicDouble,

    /// Master beat fraction pushed by the sync arbiter
    pub target_beat_distance: AtomicDouble,
    /// Master BPM pushed by the sync arbiter
    pub instantaneous_bpm: AtomicDouble,

    /// Sync control-loop state
    pub adjuster: AdjusterState,
}

impl DeckObservables {
    pub fn new() -> Self {
        Self {
            file_bpm: AtomicDouble::new(0.0),
            local_bpm: AtomicDouble::new(0.0),
            engine_bpm: AtomicDouble::new(0.0),
            rate_slider: AtomicDouble::new(0.0),
            rate_range: AtomicDouble::new(0.0),
            rate_dir: AtomicDouble::new(1.0),
            beat_distance: AtomicDouble::new(0.0),
            prev_beat: AtomicDouble::new(ABSENT_BEAT),
            next_beat: AtomicDouble::new(ABSENT_BEAT),
            current_sample: AtomicDouble::new(0.0),
            total_samples: AtomicDouble::new(0.0),
            sync_mode: AtomicU8::new(SyncMode::None.to_raw()),
            quantize: AtomicFlag::new(false),
            reverse: AtomicFlag::new(false),
            loop_enabled: AtomicFlag::new(false),
            loop_start: AtomicDouble::new(0.0),
            loop_end: AtomicDouble::new(0.0),
            target_beat_distance: AtomicDouble::new(0.0),
            instantaneous_bpm: AtomicDouble::new(0.0),
            adjuster: AdjusterState::new(),
        }
    }

    /// Rate ratio: 1 + direction * range * slider
    #[inline]
    pub fn rate_ratio(&self) -> f64 {
        1.0 + self.rate_dir.get() * self.rate_range.get() * self.rate_slider.get()
    }

    #[inline]
    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_raw(self.sync_mode.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.sync_mode.store(mode.to_raw(), Ordering::Release);
    }

    /// Cached previous beat, if any
    #[inline]
    pub fn prev_beat(&self) -> Option<f64> {
        let beat = self.prev_beat.get();
        (beat >= 0.0).then_some(beat)
    }

    /// Cached next beat, if any
    #[inline]
    pub fn next_beat(&self) -> Option<f64> {
        let beat = self.next_beat.get();
        (beat >= 0.0).then_some(beat)
    }

    pub(crate) fn set_cached_beats(&self, beats: Option<(f64, f64)>) {
        match beats {
            Some((prev, next)) => {
                self.prev_beat.set(prev);
                self.next_beat.set(next);
            }
            None => {
                self.prev_beat.set(ABSENT_BEAT);
                self.next_beat.set(ABSENT_BEAT);
            }
        }
    }
}

impl Default for DeckObservables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_ratio_identity() {
        let obs = DeckObservables::new();
        assert_eq!(obs.rate_ratio(), 1.0);

        obs.rate_range.set(0.08);
        obs.rate_slider.set(0.5);
        assert!((obs.rate_ratio() - 1.04).abs() < 1e-12);

        obs.rate_dir.set(-1.0);
        assert!((obs.rate_ratio() - 0.96).abs() < 1e-12);
    }

    #[test]
    fn test_cached_beats_sentinel() {
        let obs = DeckObservables::new();
        assert!(obs.prev_beat().is_none());
        assert!(obs.next_beat().is_none());

        obs.set_cached_beats(Some((0.0, 44100.0)));
        assert_eq!(obs.prev_beat(), Some(0.0));
        assert_eq!(obs.next_beat(), Some(44100.0));

        obs.set_cached_beats(None);
        assert!(obs.prev_beat().is_none());
    }

    #[test]
    fn test_sync_mode_roundtrip() {
        let obs = DeckObservables::new();
        assert_eq!(obs.sync_mode(), SyncMode::None);
        obs.set_sync_mode(SyncMode::Follower);
        assert_eq!(obs.sync_mode(), SyncMode::Follower);
    }
}

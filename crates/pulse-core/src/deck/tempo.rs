//! Per-deck tempo control
//!
//! `TempoControl` is the facade the engine buffer and the control surface
//! talk to. It owns the beat-grid snapshot, the deck's observable record,
//! and the tap estimator, and wires the beat context, sync adjuster, and
//! phase aligner together.
//!
//! Threading: every audio-path entry point takes `&self` and touches only
//! atomics and the grid snapshot, so the audio callback never blocks.
//! Control-path operations (buttons, track loads, grid edits) run on
//! control threads and publish whole new grids atomically.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwapOption;

use crate::beats::BeatGrid;
use crate::deck::DeckObservables;
use crate::sync::{beat_context, calc_sync_adjustment, PhaseParams, SyncPeer};
use crate::tap::{TapEstimator, TapSummary};
use crate::types::{DeckFeatures, DeckId, SyncMode, SyncTuning};

/// Beats on each side of the playhead in the local BPM window
pub const LOCAL_BPM_SPAN: usize = 4;

/// Grid BPM clamp for the fine-adjust buttons
pub const MIN_GRID_BPM: f64 = 10.0;
pub const MAX_GRID_BPM: f64 = 200.0;

/// Fine-adjust step in BPM
pub const GRID_BPM_STEP: f64 = 0.01;

/// Grid nudge step in seconds
pub const GRID_TRANSLATE_STEP_SECONDS: f64 = 0.01;

/// Per-deck tempo controller
pub struct TempoControl {
    deck: DeckId,
    /// Immutable grid snapshot, replaced atomically on load and edit
    beats: ArcSwapOption<BeatGrid>,
    observables: Arc<DeckObservables>,
    tuning: SyncTuning,
    /// Control thread only; never touched from the audio path
    tap: Mutex<TapEstimator>,
}

impl TempoControl {
    pub fn new(deck: DeckId) -> Self {
        Self::with_tuning(deck, SyncTuning::default())
    }

    pub fn with_tuning(deck: DeckId, tuning: SyncTuning) -> Self {
        Self {
            deck,
            beats: ArcSwapOption::empty(),
            observables: Arc::new(DeckObservables::new()),
            tuning,
            tap: Mutex::new(TapEstimator::new()),
        }
    }

    pub fn deck(&self) -> DeckId {
        self.deck
    }

    /// Lock-free observable state for this deck
    ///
    /// UI meters and the sync arbiter clone this and poll the fields they
    /// need without taking any lock.
    pub fn observables(&self) -> Arc<DeckObservables> {
        Arc::clone(&self.observables)
    }

    /// Current beat-grid snapshot
    pub fn beats(&self) -> Option<Arc<BeatGrid>> {
        self.beats.load_full()
    }

    // ─────────────────────────────────────────────────────────────
    // Track lifecycle (control thread)
    // ─────────────────────────────────────────────────────────────

    /// Bind a newly loaded track's grid
    pub fn track_loaded(&self, grid: Option<Arc<BeatGrid>>, total_samples: f64) {
        self.reset_sync_adjustment();
        let has_grid = grid.is_some();
        self.observables.total_samples.set(total_samples);
        self.beats.store(grid);
        self.observables.set_cached_beats(None);
        log::debug!("{}: track loaded (grid: {has_grid})", self.deck);
    }

    /// Replace the grid after an external beat edit
    pub fn beats_updated(&self, grid: Arc<BeatGrid>) {
        self.reset_sync_adjustment();
        self.beats.store(Some(grid));
        self.observables.set_cached_beats(None);
    }

    /// Drop the grid on track eject
    pub fn eject(&self) {
        self.reset_sync_adjustment();
        self.beats.store(None);
        self.observables.set_cached_beats(None);
        self.observables.total_samples.set(0.0);
        log::debug!("{}: track ejected", self.deck);
    }

    /// Publish an edited grid and let the sync loop start over
    fn publish_grid(&self, grid: BeatGrid) {
        self.beats_updated(Arc::new(grid));
    }

    // ─────────────────────────────────────────────────────────────
    // Audio path (one callback: position -> local bpm -> distance -> rate)
    // ─────────────────────────────────────────────────────────────

    /// Push the playhead position for this callback
    pub fn set_current_position(&self, sample: f64, total_samples: f64) {
        self.observables.current_sample.set(sample);
        self.observables.total_samples.set(total_samples);
        self.refresh_cached_beats(sample);
    }

    /// Re-query the grid only when the position left the cached beats
    fn refresh_cached_beats(&self, position: f64) {
        let grid = self.beats.load();
        let Some(grid) = grid.as_ref() else {
            self.observables.set_cached_beats(None);
            return;
        };
        let fresh = match (self.observables.prev_beat(), self.observables.next_beat()) {
            (Some(prev), Some(next)) => position >= prev && position <= next,
            _ => false,
        };
        if !fresh {
            self.observables
                .set_cached_beats(grid.find_prev_next_beats(position));
        }
    }

    /// Refresh the local BPM from the grid window around the playhead
    pub fn update_local_bpm(&self) -> f64 {
        let obs = &self.observables;
        let previous = obs.local_bpm.get();
        let grid = self.beats.load();
        let local_bpm = match grid.as_ref() {
            Some(grid) => grid
                .bpm_around_position(obs.current_sample.get(), LOCAL_BPM_SPAN)
                .unwrap_or_else(|| obs.file_bpm.get()),
            None => obs.file_bpm.get(),
        };
        if local_bpm != previous {
            obs.local_bpm.set(local_bpm);
            self.update_engine_bpm();
        }
        local_bpm
    }

    /// Publish this deck's beat distance
    pub fn update_beat_distance(&self) -> f64 {
        let obs = &self.observables;
        let distance = self.beat_distance(obs.current_sample.get());
        obs.beat_distance.set(distance);
        // Unsynced decks carry no phase offset
        if obs.sync_mode() == SyncMode::None {
            obs.adjuster.user_offset.set(0.0);
        }
        distance
    }

    /// Beat distance at a position, adjusted by the user offset
    ///
    /// The offset is subtracted from the report so the arbiter's clock
    /// comparisons don't chase manual nudges.
    pub fn beat_distance(&self, position: f64) -> f64 {
        let obs = &self.observables;
        let user_offset = obs.adjuster.user_offset.get();
        match beat_context(position, obs.prev_beat(), obs.next_beat()) {
            Some(context) => context.beat_fraction - user_offset,
            None => 0.0 - user_offset,
        }
    }

    /// Playback rate that tracks the master, as a ratio
    ///
    /// `user_tweak` is a rate offset from the operator (jog, pitch bend);
    /// while it is nonzero the phase loop stands down and absorbs the
    /// offset instead of fighting it.
    pub fn calc_synced_rate(&self, user_tweak: f64) -> f64 {
        let obs = &self.observables;
        let local_bpm = obs.local_bpm.get();
        let mut rate = 1.0;
        if local_bpm != 0.0 {
            rate = obs.instantaneous_bpm.get() / local_bpm;
        }

        // Unquantized, master, gridless, or reversed decks take the rate
        // as-is; phase is meaningless for them
        let has_grid = self.beats.load().is_some();
        if !obs.quantize.get()
            || obs.sync_mode() == SyncMode::Master
            || !has_grid
            || obs.reverse.get()
        {
            obs.adjuster.reset_pending.set(true);
            return rate + user_tweak;
        }

        let Some(context) = beat_context(obs.current_sample.get(), obs.prev_beat(), obs.next_beat())
        else {
            obs.adjuster.reset_pending.set(true);
            return rate + user_tweak;
        };

        // Inside a loop shorter than one beat the beat offset is meaningless
        if obs.loop_enabled.get() {
            let loop_size = (obs.loop_end.get() - obs.loop_start.get()) / context.beat_length;
            if loop_size < 1.0 && loop_size > 0.0 {
                obs.adjuster.reset_pending.set(true);
                return rate + user_tweak;
            }
        }

        let adjustment = calc_sync_adjustment(
            &obs.adjuster,
            &self.tuning,
            context.beat_fraction,
            obs.target_beat_distance.get(),
            user_tweak != 0.0,
        );
        (rate + user_tweak) * adjustment
    }

    /// Publish beat features for downstream visualizers
    pub fn collect_features(&self, features: &mut DeckFeatures) {
        let grid = self.beats.load();
        let Some(grid) = grid.as_ref() else {
            return;
        };
        let obs = &self.observables;
        if let Some(context) = beat_context(obs.current_sample.get(), obs.prev_beat(), obs.next_beat())
        {
            // Beat length counts interleaved stereo samples; halve for frames
            features.beat_length_sec =
                Some(context.beat_length / grid.sample_rate() as f64 / 2.0 * obs.rate_ratio());
            features.beat_fraction = Some(context.beat_fraction);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Sync arbiter inputs
    // ─────────────────────────────────────────────────────────────

    /// Master beat fraction for this deck to track
    pub fn set_target_beat_distance(&self, distance: f64) {
        self.observables.target_beat_distance.set(distance);
    }

    /// Master BPM for this deck to track
    pub fn set_instantaneous_bpm(&self, bpm: f64) {
        self.observables.instantaneous_bpm.set(bpm);
    }

    /// Fold the user offset into the published distance and restart the loop
    pub fn reset_sync_adjustment(&self) {
        let obs = &self.observables;
        let user_offset = obs.adjuster.user_offset.swap(0.0);
        obs.beat_distance.set(obs.beat_distance.get() + user_offset);
        obs.adjuster.reset_pending.set(true);
    }

    // ─────────────────────────────────────────────────────────────
    // Rate and BPM controls (control thread)
    // ─────────────────────────────────────────────────────────────

    /// Effective playback BPM
    pub fn bpm(&self) -> f64 {
        self.observables.engine_bpm.get()
    }

    /// The loaded track's BPM tag changed (load or re-analysis)
    pub fn on_file_bpm_changed(&self, bpm: f64) {
        let obs = &self.observables;
        obs.file_bpm.set(bpm);
        let grid = self.beats.load();
        let local_bpm = match grid.as_ref() {
            Some(grid) => grid
                .bpm_around_position(obs.current_sample.get(), LOCAL_BPM_SPAN)
                .unwrap_or(bpm),
            None => bpm,
        };
        obs.local_bpm.set(local_bpm);
        // The sync arbiter drives the BPM of synced decks itself
        if obs.sync_mode() == SyncMode::None {
            self.update_engine_bpm();
        }
        self.reset_sync_adjustment();
    }

    pub fn on_rate_slider_changed(&self, value: f64) {
        self.observables.rate_slider.set(value);
        self.update_engine_bpm();
    }

    pub fn on_rate_range_changed(&self, value: f64) {
        self.observables.rate_range.set(value);
        self.update_rate_slider();
    }

    pub fn on_rate_dir_changed(&self, value: f64) {
        self.observables.rate_dir.set(value);
        self.update_engine_bpm();
    }

    /// Engine BPM set directly (BPM pot, soft-takeover MIDI knob)
    ///
    /// Published range is 1-200 BPM but out-of-range sets are accepted.
    pub fn on_engine_bpm_changed(&self, bpm: f64) {
        self.observables.engine_bpm.set(bpm);
        self.update_rate_slider();
    }

    fn update_engine_bpm(&self) {
        let obs = &self.observables;
        obs.engine_bpm.set(obs.local_bpm.get() * obs.rate_ratio());
    }

    fn update_rate_slider(&self) {
        let obs = &self.observables;
        let local_bpm = obs.local_bpm.get();
        let rate_scale = obs.rate_dir.get() * obs.rate_range.get();
        if local_bpm == 0.0 || rate_scale == 0.0 {
            return;
        }
        obs.rate_slider
            .set((obs.engine_bpm.get() / local_bpm - 1.0) / rate_scale);
    }

    // ─────────────────────────────────────────────────────────────
    // Grid edit buttons (control thread, positive edge)
    // ─────────────────────────────────────────────────────────────

    pub fn adjust_beats_faster(&self, value: f64) {
        self.adjust_grid_bpm(value, GRID_BPM_STEP);
    }

    pub fn adjust_beats_slower(&self, value: f64) {
        self.adjust_grid_bpm(value, -GRID_BPM_STEP);
    }

    fn adjust_grid_bpm(&self, value: f64, step: f64) {
        if value <= 0.0 {
            return;
        }
        let Some(grid) = self.beats.load_full() else {
            return;
        };
        if !grid.can_set_bpm() {
            return;
        }
        let new_bpm = (grid.bpm() + step).clamp(MIN_GRID_BPM, MAX_GRID_BPM);
        match grid.with_bpm(new_bpm) {
            Ok(edited) => self.publish_grid(edited),
            Err(err) => log::warn!("{}: grid BPM edit rejected: {err}", self.deck),
        }
    }

    pub fn translate_beats_earlier(&self, value: f64) {
        self.nudge_grid(value, -1.0);
    }

    pub fn translate_beats_later(&self, value: f64) {
        self.nudge_grid(value, 1.0);
    }

    fn nudge_grid(&self, value: f64, direction: f64) {
        if value <= 0.0 {
            return;
        }
        let Some(grid) = self.beats.load_full() else {
            return;
        };
        if !grid.can_translate() {
            return;
        }
        let delta = direction * GRID_TRANSLATE_STEP_SECONDS * grid.sample_rate() as f64;
        match grid.translated(delta) {
            Ok(edited) => self.publish_grid(edited),
            Err(err) => log::warn!("{}: grid nudge rejected: {err}", self.deck),
        }
    }

    /// Snap the nearest grid beat onto the current playhead
    pub fn translate_beats_to_current_pos(&self, value: f64) {
        if value <= 0.0 {
            return;
        }
        let Some(grid) = self.beats.load_full() else {
            return;
        };
        if !grid.can_translate() {
            return;
        }
        let current_sample = self.observables.current_sample.get();
        let Some(closest) = grid.find_closest_beat(current_sample) else {
            return;
        };
        let mut delta = (current_sample - closest) as i64;
        // Keep the delta even so the grid stays on stereo frame boundaries
        if delta % 2 != 0 {
            delta -= 1;
        }
        match grid.translated(delta as f64) {
            Ok(edited) => self.publish_grid(edited),
            Err(err) => log::warn!("{}: grid snap rejected: {err}", self.deck),
        }
    }

    /// Translate the grid so this deck sits in phase with the reference
    pub fn translate_beats_to_match_alignment(&self, value: f64, peer: Option<&dyn SyncPeer>) {
        if value <= 0.0 {
            return;
        }
        let Some(grid) = self.beats.load_full() else {
            return;
        };
        if !grid.can_translate() {
            return;
        }
        // The user offset must go first: with sync active it would make the
        // phase offset read as zero
        self.observables.adjuster.user_offset.set(0.0);
        let offset = self.phase_offset(self.observables.current_sample.get(), peer);
        match grid.translated(-offset) {
            Ok(edited) => self.publish_grid(edited),
            Err(err) => log::warn!("{}: alignment translate rejected: {err}", self.deck),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // BPM tap (control thread)
    // ─────────────────────────────────────────────────────────────

    /// Tap button edge
    pub fn bpm_tap(&self, value: f64) {
        self.bpm_tap_at(value, Instant::now());
    }

    /// Tap with an explicit timestamp
    pub fn bpm_tap_at(&self, value: f64, now: Instant) {
        if value <= 0.0 {
            return;
        }
        let summary = match self.tap.lock() {
            Ok(mut tap) => tap.tap_at(now),
            Err(_) => return,
        };
        if let Some(summary) = summary {
            self.apply_tap(summary);
        }
    }

    fn apply_tap(&self, summary: TapSummary) {
        if !summary.is_stable() {
            return;
        }
        let rate_ratio = self.observables.rate_ratio();
        if rate_ratio == 0.0 {
            return;
        }
        // The tapped tempo includes the current rate; store the underlying
        // file BPM so the rate chain reproduces the tapped value
        let file_bpm = summary.bpm() / rate_ratio;
        log::debug!(
            "{}: tapped {:.2} BPM over {} taps",
            self.deck,
            summary.bpm(),
            summary.tap_count
        );
        self.on_file_bpm_changed(file_bpm);
    }

    // ─────────────────────────────────────────────────────────────
    // Beat sync (control thread)
    // ─────────────────────────────────────────────────────────────

    /// Match this deck's tempo to a peer's
    ///
    /// Applies half/double BPM disambiguation and keeps the resulting speed
    /// between 0.5x and 2x. Returns whether the tempo was applied.
    pub fn sync_tempo(&self, peer: &dyn SyncPeer) -> bool {
        let obs = &self.observables;
        let this_bpm = obs.engine_bpm.get();
        let this_local_bpm = obs.local_bpm.get();
        let other_bpm = peer.bpm();
        let other_local_bpm = peer.local_bpm();

        if other_bpm <= 0.0 || this_bpm <= 0.0 {
            return false;
        }

        // The rate that makes this deck's effective BPM match the peer's
        let mut desired_rate = other_bpm / this_local_bpm;

        // Beat detection sometimes reports half or double the real tempo;
        // prefer the octave that stays closest to the peer
        let bpm_delta = (this_local_bpm - other_local_bpm).abs();
        if (this_local_bpm * 2.0 - other_local_bpm).abs() < bpm_delta {
            desired_rate /= 2.0;
        } else if (this_local_bpm - 2.0 * other_local_bpm).abs() < bpm_delta {
            desired_rate *= 2.0;
        }

        // Keep the resulting speed between 0.5x and 2x
        let desired_rate_shift = desired_rate - 1.0;
        if desired_rate_shift < 1.0 && desired_rate_shift > -0.5 {
            obs.engine_bpm.set(this_local_bpm * desired_rate);
            self.update_rate_slider();
            return true;
        }
        false
    }

    /// Beat sync button: match tempo, then phase when playing
    ///
    /// Returns the position the engine buffer should seek to, if any.
    pub fn beat_sync(&self, value: f64, playing: bool, peer: &dyn SyncPeer) -> Option<f64> {
        if value <= 0.0 {
            return None;
        }
        if self.sync_tempo(peer) && playing {
            return Some(self.sync_phase_position(Some(peer)));
        }
        None
    }

    /// Phase-aligned seek target for the engine buffer
    pub fn sync_phase_position(&self, peer: Option<&dyn SyncPeer>) -> f64 {
        self.nearest_position_in_phase(self.observables.current_sample.get(), true, true, peer)
    }

    /// Position whose beat fraction matches the sync reference
    pub fn nearest_position_in_phase(
        &self,
        position: f64,
        respect_loops: bool,
        playing: bool,
        peer: Option<&dyn SyncPeer>,
    ) -> f64 {
        let grid = self.beats.load();
        let Some(grid) = grid.as_ref() else {
            return position;
        };
        let obs = &self.observables;
        let params = PhaseParams {
            grid: grid.as_ref(),
            prev_beat: obs.prev_beat(),
            next_beat: obs.next_beat(),
            sync_mode: obs.sync_mode(),
            target_beat_distance: obs.target_beat_distance.get(),
            user_offset: obs.adjuster.user_offset.get(),
            loop_enabled: obs.loop_enabled.get(),
            loop_start: obs.loop_start.get(),
            loop_end: obs.loop_end.get(),
        };
        crate::sync::nearest_position_in_phase(&params, position, respect_loops, playing, peer)
    }

    /// Phase distance from a position to its aligned position (loop-blind)
    pub fn phase_offset(&self, position: f64, peer: Option<&dyn SyncPeer>) -> f64 {
        self.nearest_position_in_phase(position, false, false, peer) - position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const EPS: f64 = 1e-9;

    /// 120 BPM at 44.1kHz: one beat = 44100 interleaved stereo samples
    fn grid_120() -> Arc<BeatGrid> {
        Arc::new(BeatGrid::fixed(120.0, 0.0, 44100, 44100.0 * 64.0).unwrap())
    }

    fn deck_with_grid() -> TempoControl {
        let control = TempoControl::new(DeckId::new(0));
        control.track_loaded(Some(grid_120()), 44100.0 * 64.0);
        control.on_file_bpm_changed(120.0);
        control
    }

    struct StaticPeer {
        bpm: f64,
        local_bpm: f64,
        speed: f64,
        position: f64,
        beats: Option<Arc<BeatGrid>>,
    }

    impl SyncPeer for StaticPeer {
        fn bpm(&self) -> f64 {
            self.bpm
        }
        fn local_bpm(&self) -> f64 {
            self.local_bpm
        }
        fn speed(&self) -> f64 {
            self.speed
        }
        fn play_position(&self) -> f64 {
            self.position
        }
        fn beats(&self) -> Option<Arc<BeatGrid>> {
            self.beats.clone()
        }
    }

    #[test]
    fn test_engine_bpm_identity() {
        let control = TempoControl::new(DeckId::new(0));
        control.on_file_bpm_changed(120.0);
        let obs = control.observables();
        assert!((control.bpm() - 120.0).abs() < EPS);

        control.on_rate_range_changed(0.08);
        control.on_rate_slider_changed(0.5);
        assert!((control.bpm() - 120.0 * 1.04).abs() < EPS);
        assert!((control.bpm() - obs.local_bpm.get() * obs.rate_ratio()).abs() < EPS);

        control.on_rate_dir_changed(-1.0);
        assert!((control.bpm() - 120.0 * 0.96).abs() < EPS);
        assert!((control.bpm() - obs.local_bpm.get() * obs.rate_ratio()).abs() < EPS);
    }

    #[test]
    fn test_engine_bpm_back_computes_slider() {
        let control = TempoControl::new(DeckId::new(0));
        control.on_file_bpm_changed(120.0);
        control.on_rate_range_changed(0.08);

        control.on_engine_bpm_changed(126.0);
        let obs = control.observables();
        assert!((obs.rate_slider.get() - 0.625).abs() < EPS);
    }

    #[test]
    fn test_slider_untouched_when_range_is_zero() {
        let control = TempoControl::new(DeckId::new(0));
        control.on_file_bpm_changed(120.0);
        control.on_rate_slider_changed(0.3);
        control.on_engine_bpm_changed(126.0);
        assert!((control.observables().rate_slider.get() - 0.3).abs() < EPS);
    }

    #[test]
    fn test_synced_rate_in_phase() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.set_sync_mode(SyncMode::Follower);
        obs.quantize.set(true);
        control.set_instantaneous_bpm(124.0);
        control.set_target_beat_distance(0.5);

        control.set_current_position(22050.0, 44100.0 * 64.0);
        control.update_local_bpm();
        control.update_beat_distance();

        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 124.0 / 120.0).abs() < EPS);
    }

    #[test]
    fn test_synced_rate_small_error() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.set_sync_mode(SyncMode::Follower);
        obs.quantize.set(true);
        control.set_instantaneous_bpm(120.0);
        control.set_target_beat_distance(0.48);

        control.set_current_position(22050.0, 44100.0 * 64.0);
        control.update_local_bpm();
        control.update_beat_distance();

        // Fraction 0.5 against a master at 0.48: this deck is 2% ahead,
        // so the loop slows it by the proportional gain
        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 0.986).abs() < EPS);
    }

    #[test]
    fn test_synced_rate_short_circuits() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.set_sync_mode(SyncMode::Follower);
        control.set_instantaneous_bpm(124.0);
        control.set_current_position(22050.0, 44100.0 * 64.0);
        control.update_local_bpm();

        // Quantize off: rate passes through and the loop is armed to reset
        obs.quantize.set(false);
        let rate = control.calc_synced_rate(0.01);
        assert!((rate - (124.0 / 120.0 + 0.01)).abs() < EPS);
        assert!(obs.adjuster.reset_pending.get());

        // Master mode never adjusts itself
        obs.quantize.set(true);
        obs.set_sync_mode(SyncMode::Master);
        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 124.0 / 120.0).abs() < EPS);

        // Reverse playback has no forward phase to chase
        obs.set_sync_mode(SyncMode::Follower);
        obs.reverse.set(true);
        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 124.0 / 120.0).abs() < EPS);
        obs.reverse.set(false);

        // A loop shorter than one beat disables the offset correction
        obs.loop_enabled.set(true);
        obs.loop_start.set(0.0);
        obs.loop_end.set(22050.0);
        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 124.0 / 120.0).abs() < EPS);
    }

    #[test]
    fn test_synced_rate_without_local_bpm() {
        let control = TempoControl::new(DeckId::new(0));
        control.set_instantaneous_bpm(124.0);
        // No local BPM: base rate falls back to 1.0
        assert!((control.calc_synced_rate(0.0) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_user_tweak_absorbs_offset() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.set_sync_mode(SyncMode::Follower);
        obs.quantize.set(true);
        control.set_instantaneous_bpm(120.0);
        control.set_target_beat_distance(0.4);

        control.set_current_position(22050.0, 44100.0 * 64.0);
        control.update_local_bpm();
        control.update_beat_distance();

        // Tweaking: adjustment is exactly 1.0 and the distance is absorbed
        let rate = control.calc_synced_rate(0.02);
        assert!((rate - 1.02).abs() < EPS);
        assert!((obs.adjuster.user_offset.get() - 0.1).abs() < EPS);

        // After the tweak ends the absorbed offset holds, no correction
        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 1.0).abs() < EPS);
    }

    #[test]
    fn test_update_beat_distance_clears_offset_when_unsynced() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.adjuster.user_offset.set(0.25);
        control.set_current_position(22050.0, 44100.0 * 64.0);
        control.update_beat_distance();
        assert_eq!(obs.adjuster.user_offset.get(), 0.0);
    }

    #[test]
    fn test_reset_folds_offset_into_distance() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.beat_distance.set(0.5);
        obs.adjuster.user_offset.set(0.25);

        control.reset_sync_adjustment();
        assert!((obs.beat_distance.get() - 0.75).abs() < EPS);
        assert_eq!(obs.adjuster.user_offset.get(), 0.0);
        assert!(obs.adjuster.reset_pending.get());
    }

    #[test]
    fn test_local_bpm_falls_back_to_file_bpm() {
        let control = TempoControl::new(DeckId::new(0));
        control.on_file_bpm_changed(98.0);
        assert!((control.update_local_bpm() - 98.0).abs() < EPS);

        control.track_loaded(Some(grid_120()), 44100.0 * 64.0);
        control.on_file_bpm_changed(98.0);
        control.set_current_position(22050.0, 44100.0 * 64.0);
        assert!((control.update_local_bpm() - 120.0).abs() < EPS);
    }

    #[test]
    fn test_tap_sets_file_bpm_through_rate() {
        let control = deck_with_grid();
        let start = Instant::now();
        for i in 0..5 {
            control.bpm_tap_at(1.0, start + Duration::from_millis(500 * i));
        }
        let obs = control.observables();
        assert!((obs.file_bpm.get() - 120.0).abs() < 1e-6);
        assert!((control.bpm() - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_tap_divides_by_rate_ratio() {
        let control = deck_with_grid();
        control.on_rate_range_changed(0.5);
        control.on_rate_slider_changed(0.5);
        // Rate ratio 1.25: 120 BPM tapped means a 96 BPM file
        let start = Instant::now();
        for i in 0..5 {
            control.bpm_tap_at(1.0, start + Duration::from_millis(500 * i));
        }
        assert!((control.observables().file_bpm.get() - 96.0).abs() < 1e-6);
    }

    #[test]
    fn test_adjust_beats_faster_clamped() {
        let control = deck_with_grid();
        control.adjust_beats_faster(1.0);
        let grid = control.beats().unwrap();
        assert!((grid.bpm() - 120.01).abs() < EPS);

        // Button release is ignored
        control.adjust_beats_slower(0.0);
        assert!((control.beats().unwrap().bpm() - 120.01).abs() < EPS);

        control.adjust_beats_slower(1.0);
        assert!((control.beats().unwrap().bpm() - 120.0).abs() < EPS);
    }

    #[test]
    fn test_grid_edits_need_capability() {
        let control = TempoControl::new(DeckId::new(0));
        let mapped = Arc::new(BeatGrid::mapped(vec![0.0, 44100.0, 88200.0], 44100).unwrap());
        control.track_loaded(Some(mapped), 44100.0 * 4.0);

        control.adjust_beats_faster(1.0);
        // Silently ignored: beat maps cannot take a BPM
        assert!(control.beats().unwrap().bpm() < 121.0);
        assert!(!control.beats().unwrap().can_set_bpm());
    }

    #[test]
    fn test_translate_beats_to_current_pos_even_delta() {
        let control = deck_with_grid();
        control.set_current_position(44103.0, 44100.0 * 64.0);
        control.translate_beats_to_current_pos(1.0);

        // Odd delta 3 is reduced to 2 to stay on stereo frame boundaries
        let grid = control.beats().unwrap();
        assert!((grid.find_closest_beat(44103.0).unwrap() - 44102.0).abs() < EPS);
    }

    #[test]
    fn test_nudge_grid_step() {
        let control = deck_with_grid();
        control.translate_beats_later(1.0);
        let grid = control.beats().unwrap();
        // 0.01s at 44.1kHz
        assert!((grid.find_closest_beat(0.0).unwrap() - 441.0).abs() < EPS);
    }

    #[test]
    fn test_sync_tempo_half_bpm_detection() {
        let control = TempoControl::new(DeckId::new(0));
        control.on_rate_range_changed(0.08);
        control.on_file_bpm_changed(60.0);

        let peer = StaticPeer {
            bpm: 120.0,
            local_bpm: 120.0,
            speed: 1.0,
            position: 0.0,
            beats: None,
        };
        assert!(control.sync_tempo(&peer));

        // 120 reads as double of 60: the octave folds back to 1.0x
        let obs = control.observables();
        assert!((obs.engine_bpm.get() - 60.0).abs() < EPS);
        assert!((obs.rate_slider.get() - 0.0).abs() < EPS);
    }

    #[test]
    fn test_sync_tempo_rejects_extreme_rates() {
        let control = TempoControl::new(DeckId::new(0));
        control.on_rate_range_changed(0.08);
        control.on_file_bpm_changed(50.0);

        // 240 against 50 is still a 2.4x rate after octave folding
        let peer = StaticPeer {
            bpm: 240.0,
            local_bpm: 240.0,
            speed: 1.0,
            position: 0.0,
            beats: None,
        };
        assert!(!control.sync_tempo(&peer));
        assert!((control.bpm() - 50.0).abs() < EPS);
    }

    #[test]
    fn test_beat_sync_returns_seek_target() {
        let control = deck_with_grid();
        let obs = control.observables();
        obs.quantize.set(true);
        control.set_current_position(88200.0 + 0.2 * 44100.0, 44100.0 * 64.0);
        control.update_local_bpm();

        let peer = StaticPeer {
            bpm: 120.0,
            local_bpm: 120.0,
            speed: 1.0,
            position: 44100.0 + 0.3 * 44100.0,
            beats: Some(grid_120()),
        };
        let target = control.beat_sync(1.0, true, &peer).unwrap();
        assert!((target - (88200.0 + 0.3 * 44100.0)).abs() < 1e-6);

        // Button release does nothing
        assert!(control.beat_sync(0.0, true, &peer).is_none());
    }

    #[test]
    fn test_collect_features() {
        let control = deck_with_grid();
        control.set_current_position(22050.0, 44100.0 * 64.0);

        let mut features = DeckFeatures::default();
        control.collect_features(&mut features);
        // 44100 stereo samples = 22050 frames = 0.5s at unity rate
        assert!((features.beat_length_sec.unwrap() - 0.5).abs() < EPS);
        assert!((features.beat_fraction.unwrap() - 0.5).abs() < EPS);
    }

    #[test]
    fn test_eject_degrades_gracefully() {
        let control = deck_with_grid();
        control.set_current_position(22050.0, 44100.0 * 64.0);
        control.eject();

        let mut features = DeckFeatures::default();
        control.collect_features(&mut features);
        assert!(features.beat_length_sec.is_none());

        assert_eq!(
            control.nearest_position_in_phase(22050.0, true, true, None),
            22050.0
        );
        // Gridless rate passes straight through
        control.observables().quantize.set(true);
        control.set_instantaneous_bpm(120.0);
        let rate = control.calc_synced_rate(0.0);
        assert!((rate - 1.0).abs() < EPS);
    }
}

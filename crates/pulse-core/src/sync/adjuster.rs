//! Proportional sync-rate control loop
//!
//! Each audio callback compares this deck's beat fraction against the
//! master's and produces a multiplicative rate adjustment that converges on
//! phase lock without oscillating. The loop state lives in atomics shared
//! with the deck's observable record; the adjuster itself is a function.

use crate::lockfree::{AtomicDouble, AtomicFlag};
use crate::sync::shortest_percentage_change;
use crate::types::SyncTuning;

/// Shared control-loop state
///
/// `user_offset` is the operator-applied phase offset between this deck and
/// the master; it is preserved across sync cycles so the loop does not fight
/// manual nudges. `reset_pending` is armed whenever sync context is lost
/// (track load, quantize off, absent beats) and clears the loop on the next
/// callback.
#[derive(Debug)]
pub struct AdjusterState {
    pub user_offset: AtomicDouble,
    pub last_adjustment: AtomicDouble,
    pub reset_pending: AtomicFlag,
}

impl AdjusterState {
    pub fn new() -> Self {
        Self {
            user_offset: AtomicDouble::new(0.0),
            last_adjustment: AtomicDouble::new(1.0),
            reset_pending: AtomicFlag::new(false),
        }
    }
}

impl Default for AdjusterState {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of the proportional control loop
///
/// `my_fraction` and `target_fraction` are beat fractions in [0, 1). While
/// the user is tweaking the rate the loop stands down and absorbs the
/// current phase distance into `user_offset` instead.
///
/// The returned multiplier is bounded by the tuning caps: at most
/// `adjustment_cap` away from 1.0, and (outside the train-wreck response)
/// at most `delta_cap` away from the previous callback's adjustment.
pub fn calc_sync_adjustment(
    state: &AdjusterState,
    tuning: &SyncTuning,
    my_fraction: f64,
    target_fraction: f64,
    user_tweaking: bool,
) -> f64 {
    if state.reset_pending.swap(false) {
        state.last_adjustment.set(1.0);
    }

    // Distance is measured from the master to this deck; the loop drives it
    // toward the preserved user offset.
    let shortest_distance = shortest_percentage_change(target_fraction, my_fraction);

    let adjustment = if user_tweaking {
        state.user_offset.set(shortest_distance);
        1.0
    } else {
        let error = shortest_distance - state.user_offset.get();
        if error.abs() > tuning.train_wreck_threshold {
            // Too far gone to know ahead from behind; speed up to catch the
            // other track (assume a late button push).
            1.0 + tuning.adjustment_cap
        } else if error.abs() > tuning.error_threshold {
            let adjust = 1.0 + (-error * tuning.proportional_gain);
            let last = state.last_adjustment.get();
            let delta = (adjust - last).clamp(-tuning.delta_cap, tuning.delta_cap);
            1.0 + (last - 1.0 + delta).clamp(-tuning.adjustment_cap, tuning.adjustment_cap)
        } else {
            1.0
        }
    };

    state.last_adjustment.set(adjustment);
    adjustment
}

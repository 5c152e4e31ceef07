//! Beat context helpers
//!
//! Pure functions over a position and its surrounding beats: beat length,
//! fractional position within the beat, and the shortest signed distance
//! between two beat fractions.

use crate::beats::BeatGrid;

/// A position's relationship to its enclosing beat interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatContext {
    /// Length of the enclosing beat in interleaved stereo samples
    pub beat_length: f64,
    /// Fractional position within the beat, normalized into [0, 1)
    pub beat_fraction: f64,
}

/// Beat context from pre-fetched previous/next beats
///
/// Grid queries carry a small epsilon, so the previous beat can overshoot
/// the position; the fraction is normalized back into [0, 1). A zero-length
/// beat yields fraction 0.
pub fn beat_context(position: f64, prev_beat: Option<f64>, next_beat: Option<f64>) -> Option<BeatContext> {
    let prev = prev_beat?;
    let next = next_beat?;

    let beat_length = next - prev;
    let mut beat_fraction = if beat_length == 0.0 {
        0.0
    } else {
        (position - prev) / beat_length
    };
    if beat_fraction < 0.0 {
        beat_fraction += 1.0;
    }
    if beat_fraction >= 1.0 {
        beat_fraction -= 1.0;
    }

    Some(BeatContext {
        beat_length,
        beat_fraction,
    })
}

/// Beat context via a grid lookup
///
/// Returns the previous and next beat alongside the context so callers can
/// refresh their cached beats from the same query.
pub fn beat_context_at(grid: &BeatGrid, position: f64) -> Option<(f64, f64, BeatContext)> {
    let (prev, next) = grid.find_prev_next_beats(position)?;
    let context = beat_context(position, Some(prev), Some(next))?;
    Some((prev, next, context))
}

/// Shortest signed distance from one beat fraction to another on the unit
/// circle
///
/// The result is in (-1, 1]; adding it to `current` (mod 1) lands on
/// `target`. When the forward and backward distances tie, forward wins.
pub fn shortest_percentage_change(current: f64, target: f64) -> f64 {
    if current == target {
        0.0
    } else if current < target {
        // Invariant: forward - backward == 1.0
        let forward = target - current;
        let backward = target - current - 1.0;
        if forward.abs() <= backward.abs() {
            forward
        } else {
            backward
        }
    } else {
        // Invariant: forward - backward == 1.0
        let forward = 1.0 - current + target;
        let backward = target - current;
        if forward.abs() <= backward.abs() {
            forward
        } else {
            backward
        }
    }
}

//! Phase alignment
//!
//! Computes the absolute sample position a deck should seek to so that its
//! beat fraction matches a reference: the sync target's published beat
//! distance for followers, or a peer deck's live beat fraction otherwise.
//! Alignment never escapes an active loop; a target past the loop end wraps
//! back inside and is re-aligned once.

use crate::beats::BeatGrid;
use crate::sync::context::{beat_context, beat_context_at};
use crate::sync::peer::SyncPeer;
use crate::types::SyncMode;

/// Snapshot of the deck state phase alignment reads
///
/// Assembled by the deck controller at callback entry so the alignment math
/// runs against one consistent view.
pub struct PhaseParams<'a> {
    pub grid: &'a BeatGrid,
    /// Cached previous/next beats; re-queried when the position left them
    pub prev_beat: Option<f64>,
    pub next_beat: Option<f64>,
    pub sync_mode: SyncMode,
    /// Master beat fraction pushed by the sync arbiter (followers)
    pub target_beat_distance: f64,
    /// Operator phase offset preserved by the sync adjuster
    pub user_offset: f64,
    pub loop_enabled: bool,
    pub loop_start: f64,
    pub loop_end: f64,
}

/// Position whose beat fraction matches the reference
///
/// Returns `position` unchanged whenever alignment is impossible or
/// unnecessary: master decks, missing grids, absent beats, a stopped peer.
pub fn nearest_position_in_phase(
    params: &PhaseParams<'_>,
    position: f64,
    respect_loops: bool,
    playing: bool,
    peer: Option<&dyn SyncPeer>,
) -> f64 {
    // The master is always in phase with itself
    if params.sync_mode == SyncMode::Master {
        return position;
    }

    let (this_prev, this_next, beat_length) = match (params.prev_beat, params.next_beat) {
        (Some(prev), Some(next)) if position >= prev && position <= next => {
            match beat_context(position, Some(prev), Some(next)) {
                Some(ctx) => (prev, next, ctx.beat_length),
                None => return position,
            }
        }
        // Cached beats are stale; take the bounded grid query
        _ => match beat_context_at(params.grid, position) {
            Some((prev, next, ctx)) => (prev, next, ctx.beat_length),
            None => return position,
        },
    };

    let other_fraction = match reference_fraction(params, playing, peer) {
        Some(fraction) => fraction,
        None => return position,
    };

    let this_near_next = this_next - position <= position - this_prev;
    let other_near_next = other_fraction >= 0.5;

    // Matching alignment anchors on the previous beat. A near-next deck
    // against a near-prev reference means the sync press came late: anchor
    // on the next beat instead. The opposite mismatch means an early press:
    // anchor on the beat before the previous one.
    let mut new_position = (other_fraction + params.user_offset) * beat_length;
    if this_near_next == other_near_next {
        new_position += this_prev;
    } else if this_near_next && !other_near_next {
        new_position += this_next;
    } else {
        match params.grid.find_nth_beat(position, -2) {
            Some(beat) => new_position += beat,
            None => return position,
        }
    }

    if respect_loops && params.loop_enabled && position <= params.loop_end {
        let loop_length = params.loop_end - params.loop_start;
        let end_delta = new_position - params.loop_end;
        if end_delta > 0.0 && loop_length > 0.0 {
            let wraps = (end_delta / loop_length).floor();
            new_position = params.loop_start + end_delta - wraps * loop_length;
            // Re-align the wrapped position; with respect_loops off this
            // recursion cannot re-enter
            new_position = nearest_position_in_phase(params, new_position, false, playing, peer);
        }
    }

    new_position
}

/// Phase distance from a position to its aligned position
///
/// Ignores loops; used when translating a grid to match another deck.
pub fn phase_offset(params: &PhaseParams<'_>, position: f64, peer: Option<&dyn SyncPeer>) -> f64 {
    nearest_position_in_phase(params, position, false, false, peer) - position
}

/// Beat fraction of the alignment reference
fn reference_fraction(
    params: &PhaseParams<'_>,
    playing: bool,
    peer: Option<&dyn SyncPeer>,
) -> Option<f64> {
    if params.sync_mode == SyncMode::Follower {
        return Some(params.target_beat_distance);
    }

    let peer = peer?;
    // A playing deck only matches phase against a peer that is also moving
    if playing && peer.speed() == 0.0 {
        return None;
    }
    let peer_beats = peer.beats()?;
    beat_context_at(&peer_beats, peer.play_position()).map(|(_, _, ctx)| ctx.beat_fraction)
}

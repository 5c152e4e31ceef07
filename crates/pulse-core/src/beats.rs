//! Beat grids
//!
//! A beat grid maps sample positions to musical beats. Two representations
//! exist behind one enum: a fixed-interval grid derived from a BPM and an
//! anchor beat (the common case for electronic music), and an explicit beat
//! map for material with a drifting tempo.
//!
//! Grids are immutable snapshots. Edits (`with_bpm`, `translated`) build a
//! new grid which the owning deck publishes atomically, so the audio thread
//! never observes a half-edited grid.
//!
//! Positions are fractional interleaved stereo sample offsets (two samples
//! per frame); sample rates are in frames per second.

use thiserror::Error;

/// Fraction of one beat within which a position is treated as sitting on a
/// beat. Queries may therefore hand back a previous beat slightly *after*
/// the queried position; callers normalize beat fractions into [0, 1).
pub const BEAT_EPSILON: f64 = 0.01;

/// Errors from beat grid construction and edits
#[derive(Debug, Error)]
pub enum GridError {
    /// Grid has no beats at all
    #[error("beat grid has no beats")]
    Empty,

    /// Not enough beats to form a single interval
    #[error("beat grid needs at least two beats, got {0}")]
    TooFewBeats(usize),

    /// Beat offsets must be strictly increasing
    #[error("beat offsets must be strictly increasing (offset index {0})")]
    Unsorted(usize),

    /// BPM outside the representable range
    #[error("BPM must be positive and finite, got {0}")]
    InvalidBpm(f64),

    /// Edit not supported by this grid representation
    #[error("grid representation does not support this edit")]
    Unsupported,
}

/// Result type for grid construction and edits
pub type GridResult<T> = Result<T, GridError>;

/// A track's beat grid
#[derive(Debug, Clone)]
pub enum BeatGrid {
    /// Uniform beat spacing anchored at a first beat
    Fixed(FixedGrid),
    /// Explicit per-beat offsets for variable-tempo material
    Mapped(BeatMap),
}

/// Fixed-interval grid: first beat + constant BPM
#[derive(Debug, Clone)]
pub struct FixedGrid {
    bpm: f64,
    /// Offset of the first beat in interleaved stereo samples
    first_beat: f64,
    sample_rate: u32,
    /// Track length in interleaved stereo samples; bounds the last beat
    track_samples: f64,
}

/// Explicit beat map: strictly increasing beat offsets
#[derive(Debug, Clone)]
pub struct BeatMap {
    beats: Vec<f64>,
    sample_rate: u32,
}

impl BeatGrid {
    /// Create a fixed-interval grid
    pub fn fixed(bpm: f64, first_beat: f64, sample_rate: u32, track_samples: f64) -> GridResult<Self> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(GridError::InvalidBpm(bpm));
        }
        let grid = FixedGrid {
            bpm,
            first_beat,
            sample_rate,
            track_samples,
        };
        if !first_beat.is_finite() || first_beat < 0.0 || sample_rate == 0 {
            return Err(GridError::Empty);
        }
        if grid.num_beats() < 2 {
            return Err(GridError::TooFewBeats(grid.num_beats().max(0) as usize));
        }
        Ok(BeatGrid::Fixed(grid))
    }

    /// Create an explicit beat map
    pub fn mapped(beats: Vec<f64>, sample_rate: u32) -> GridResult<Self> {
        if beats.is_empty() {
            return Err(GridError::Empty);
        }
        if beats.len() < 2 {
            return Err(GridError::TooFewBeats(beats.len()));
        }
        for (i, pair) in beats.windows(2).enumerate() {
            if !(pair[1] > pair[0]) || !pair[0].is_finite() {
                return Err(GridError::Unsorted(i + 1));
            }
        }
        Ok(BeatGrid::Mapped(BeatMap { beats, sample_rate }))
    }

    /// Whether the BPM of this grid can be edited directly
    pub fn can_set_bpm(&self) -> bool {
        matches!(self, BeatGrid::Fixed(_))
    }

    /// Whether this grid can be shifted along the track
    pub fn can_translate(&self) -> bool {
        true
    }

    /// Sample rate of the gridded track, in frames per second
    pub fn sample_rate(&self) -> u32 {
        match self {
            BeatGrid::Fixed(g) => g.sample_rate,
            BeatGrid::Mapped(m) => m.sample_rate,
        }
    }

    /// Global BPM: exact for fixed grids, averaged for beat maps
    pub fn bpm(&self) -> f64 {
        match self {
            BeatGrid::Fixed(g) => g.bpm,
            BeatGrid::Mapped(m) => m.span_bpm(0, m.beats.len() - 1),
        }
    }

    /// Previous and next beat around a position
    ///
    /// `None` before the first beat, on/after the last beat, or on an empty
    /// grid. The previous beat may overshoot the position by up to
    /// [`BEAT_EPSILON`] of a beat.
    pub fn find_prev_next_beats(&self, position: f64) -> Option<(f64, f64)> {
        match self {
            BeatGrid::Fixed(g) => g.find_prev_next(position),
            BeatGrid::Mapped(m) => m.find_prev_next(position),
        }
    }

    /// The Nth beat relative to a position
    ///
    /// n < 0 counts backward, n > 0 forward; a position within epsilon of a
    /// beat counts as that beat in both directions. n = 0 resolves to the
    /// enclosing beat's start.
    pub fn find_nth_beat(&self, position: f64, n: i32) -> Option<f64> {
        match self {
            BeatGrid::Fixed(g) => g.find_nth_beat(position, n),
            BeatGrid::Mapped(m) => m.find_nth_beat(position, n),
        }
    }

    /// The beat minimizing |position - beat|
    pub fn find_closest_beat(&self, position: f64) -> Option<f64> {
        match self {
            BeatGrid::Fixed(g) => g.find_closest_beat(position),
            BeatGrid::Mapped(m) => m.find_closest_beat(position),
        }
    }

    /// BPM over 2·`span_beats` beats centered on a position
    ///
    /// Constant for fixed grids. For beat maps, `None` when the window would
    /// leave the grid.
    pub fn bpm_around_position(&self, position: f64, span_beats: usize) -> Option<f64> {
        match self {
            BeatGrid::Fixed(g) => Some(g.bpm),
            BeatGrid::Mapped(m) => m.bpm_around_position(position, span_beats),
        }
    }

    /// A copy of this grid with a new BPM (fixed grids only)
    pub fn with_bpm(&self, bpm: f64) -> GridResult<Self> {
        match self {
            BeatGrid::Fixed(g) => BeatGrid::fixed(bpm, g.first_beat, g.sample_rate, g.track_samples),
            BeatGrid::Mapped(_) => Err(GridError::Unsupported),
        }
    }

    /// A copy of this grid shifted by `delta` stereo samples
    pub fn translated(&self, delta: f64) -> GridResult<Self> {
        match self {
            BeatGrid::Fixed(g) => {
                let len = g.beat_length();
                let mut first = g.first_beat + delta;
                // Shifting a uniform grid by whole beats leaves it unchanged,
                // so a negative anchor can be wrapped back into the track.
                while first < 0.0 {
                    first += len;
                }
                BeatGrid::fixed(g.bpm, first, g.sample_rate, g.track_samples)
            }
            BeatGrid::Mapped(m) => {
                let beats: Vec<f64> = m
                    .beats
                    .iter()
                    .map(|b| b + delta)
                    .filter(|b| *b >= 0.0)
                    .collect();
                BeatGrid::mapped(beats, m.sample_rate)
            }
        }
    }
}

impl FixedGrid {
    /// Length of one beat in interleaved stereo samples
    fn beat_length(&self) -> f64 {
        60.0 / self.bpm * self.sample_rate as f64 * 2.0
    }

    /// Number of beats that fit between the anchor and the track end
    fn num_beats(&self) -> i64 {
        if self.track_samples <= self.first_beat {
            return 0;
        }
        ((self.track_samples - self.first_beat) / self.beat_length()).floor() as i64 + 1
    }

    fn last_beat_index(&self) -> f64 {
        (self.num_beats() - 1) as f64
    }

    fn find_prev_next(&self, position: f64) -> Option<(f64, f64)> {
        let len = self.beat_length();
        let fraction = (position - self.first_beat) / len;
        let mut prev_idx = fraction.floor();
        let mut next_idx = fraction.ceil();
        if next_idx - fraction < BEAT_EPSILON {
            prev_idx = next_idx;
            next_idx += 1.0;
        }
        if prev_idx < 0.0 || next_idx > self.last_beat_index() {
            return None;
        }
        Some((
            self.first_beat + prev_idx * len,
            self.first_beat + next_idx * len,
        ))
    }

    fn find_nth_beat(&self, position: f64, n: i32) -> Option<f64> {
        let len = self.beat_length();
        let fraction = (position - self.first_beat) / len;
        let mut prev_idx = fraction.floor();
        let mut next_idx = fraction.ceil();
        if next_idx - fraction < BEAT_EPSILON || fraction - prev_idx < BEAT_EPSILON {
            // On a beat: it counts as both the previous and the next beat
            prev_idx = fraction.round();
            next_idx = prev_idx;
        }
        let idx = match n {
            0 => prev_idx,
            n if n > 0 => next_idx + (n - 1) as f64,
            n => prev_idx + (n + 1) as f64,
        };
        if idx < 0.0 || idx > self.last_beat_index() {
            return None;
        }
        Some(self.first_beat + idx * len)
    }

    fn find_closest_beat(&self, position: f64) -> Option<f64> {
        let len = self.beat_length();
        let idx = ((position - self.first_beat) / len)
            .round()
            .clamp(0.0, self.last_beat_index());
        Some(self.first_beat + idx * len)
    }
}

impl BeatMap {
    /// BPM over the beat span [from, to]
    fn span_bpm(&self, from: usize, to: usize) -> f64 {
        let intervals = (to - from) as f64;
        let seconds = (self.beats[to] - self.beats[from]) / (2.0 * self.sample_rate as f64);
        intervals * 60.0 / seconds
    }

    /// On-beat tolerance in samples near beat index `idx`
    fn epsilon_near(&self, idx: usize) -> f64 {
        let n = self.beats.len();
        let (a, b) = if idx == 0 {
            (0, 1)
        } else if idx >= n - 1 {
            (n - 2, n - 1)
        } else {
            (idx - 1, idx)
        };
        (self.beats[b] - self.beats[a]) * BEAT_EPSILON
    }

    /// Indices of the beats at or around a position
    ///
    /// Returns (previous, next); both point at the same beat when the
    /// position sits within epsilon of it.
    fn neighbor_indices(&self, position: f64) -> (Option<usize>, Option<usize>) {
        let n = self.beats.len();
        let upper = self.beats.partition_point(|&b| b <= position);
        let eps = self.epsilon_near(upper.min(n - 1));
        if upper < n && self.beats[upper] - position < eps {
            return (Some(upper), Some(upper));
        }
        if upper > 0 && position - self.beats[upper - 1] < eps {
            return (Some(upper - 1), Some(upper - 1));
        }
        (upper.checked_sub(1), (upper < n).then_some(upper))
    }

    fn find_prev_next(&self, position: f64) -> Option<(f64, f64)> {
        let (prev, next) = self.neighbor_indices(position);
        let prev = prev?;
        let next = next?;
        if prev == next {
            // On a beat: it is the previous beat, its successor the next
            let succ = *self.beats.get(prev + 1)?;
            return Some((self.beats[prev], succ));
        }
        Some((self.beats[prev], self.beats[next]))
    }

    fn find_nth_beat(&self, position: f64, n: i32) -> Option<f64> {
        let (prev, next) = self.neighbor_indices(position);
        let idx = match n {
            0 => prev? as i64,
            n if n > 0 => next? as i64 + n as i64 - 1,
            n => prev? as i64 + n as i64 + 1,
        };
        if idx < 0 || idx as usize >= self.beats.len() {
            return None;
        }
        Some(self.beats[idx as usize])
    }

    fn find_closest_beat(&self, position: f64) -> Option<f64> {
        let (prev, next) = self.neighbor_indices(position);
        match (prev, next) {
            (Some(p), Some(n)) => {
                let (bp, bn) = (self.beats[p], self.beats[n]);
                if position - bp <= bn - position {
                    Some(bp)
                } else {
                    Some(bn)
                }
            }
            (Some(p), None) => Some(self.beats[p]),
            (None, Some(n)) => Some(self.beats[n]),
            (None, None) => None,
        }
    }

    fn bpm_around_position(&self, position: f64, span_beats: usize) -> Option<f64> {
        let n = self.beats.len();
        let upper = self.beats.partition_point(|&b| b <= position);
        if upper == 0 {
            return None;
        }
        let center = upper - 1;
        if center < span_beats || center + span_beats > n - 1 {
            return None;
        }
        Some(self.span_bpm(center - span_beats, center + span_beats))
    }
}

//! BPM tap estimation
//!
//! A sliding-window filter over user tap events. Each tap drops timestamps
//! that fell out of the interval window, then reports the mean inter-tap
//! interval so the deck can derive a file BPM from it.

use std::time::Instant;

/// Number of taps kept in the window
pub const TAP_FILTER_LENGTH: usize = 5;

/// Slowest tappable tempo; taps further apart than one beat at this BPM
/// are treated as the start of a new measurement
pub const MIN_TAP_BPM: f64 = 30.0;

/// Maximum allowed interval between taps (derived from MIN_TAP_BPM)
pub const MAX_TAP_INTERVAL_MS: f64 = 60_000.0 / MIN_TAP_BPM;

/// Minimum tap count before a summary is stable enough to act on
pub const MIN_TAP_COUNT: usize = 4;

/// Mean inter-tap interval over the current window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapSummary {
    /// Average interval between successive taps, in milliseconds
    pub average_interval_ms: f64,
    /// Number of taps contributing to the average
    pub tap_count: usize,
}

impl TapSummary {
    /// Tempo implied by the average interval
    pub fn bpm(&self) -> f64 {
        60_000.0 / self.average_interval_ms
    }

    /// Whether there are enough taps to trust the average
    pub fn is_stable(&self) -> bool {
        self.tap_count >= MIN_TAP_COUNT && self.average_interval_ms > 0.0
    }
}

/// Sliding-window tap filter
///
/// Capacity is fixed at [`TAP_FILTER_LENGTH`]; the backing storage is
/// allocated once at construction and never grows. Taps arrive from the
/// control thread only.
#[derive(Debug)]
pub struct TapEstimator {
    taps: Vec<Instant>,
}

impl TapEstimator {
    pub fn new() -> Self {
        Self {
            taps: Vec::with_capacity(TAP_FILTER_LENGTH),
        }
    }

    /// Record a tap at the current time
    pub fn tap(&mut self) -> Option<TapSummary> {
        self.tap_at(Instant::now())
    }

    /// Record a tap at an explicit timestamp
    ///
    /// Returns the window summary once at least two taps remain in the
    /// window; callers should check [`TapSummary::is_stable`] before acting.
    pub fn tap_at(&mut self, now: Instant) -> Option<TapSummary> {
        self.taps
            .retain(|t| millis_between(*t, now) <= MAX_TAP_INTERVAL_MS);
        if self.taps.len() == TAP_FILTER_LENGTH {
            self.taps.remove(0);
        }
        self.taps.push(now);

        let count = self.taps.len();
        if count < 2 {
            return None;
        }
        let span_ms = millis_between(self.taps[0], now);
        Some(TapSummary {
            average_interval_ms: span_ms / (count - 1) as f64,
            tap_count: count,
        })
    }

    /// Number of taps currently in the window
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

impl Default for TapEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn millis_between(earlier: Instant, later: Instant) -> f64 {
    later.duration_since(earlier).as_secs_f64() * 1000.0
}

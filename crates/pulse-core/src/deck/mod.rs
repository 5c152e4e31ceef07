//! Per-deck tempo control
//!
//! - DeckObservables: lock-free record of the deck's published values
//! - TempoControl: the per-deck facade wiring grid, tap, and sync together

mod observables;
mod tempo;

pub use observables::*;
pub use tempo::*;

//! Beat-phase synchronization
//!
//! The pieces of the per-callback sync loop: beat context queries,
//! the proportional rate adjuster, phase alignment, and the peer-deck
//! query interface.

mod adjuster;
mod context;
mod peer;
mod phase;

pub use adjuster::*;
pub use context::*;
pub use peer::*;
pub use phase::*;

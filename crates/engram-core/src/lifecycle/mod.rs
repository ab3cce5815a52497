//! Temporal lifecycle
//!
//! Decay erodes item energy and edge weights over elapsed time;
//! consolidation expires TTLs, clusters old co-activated events, and
//! replaces them with reflection summaries.

pub mod consolidate;
pub mod decay;

pub use consolidate::{build_summary, consolidate, ConsolidateOutcome};
pub use decay::{decay, DecayOutcome};

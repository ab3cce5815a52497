//! Memory data model
//!
//! Core types of the memory graph:
//! - Items with energy, importance, feedback counters, and optional TTL
//! - Directed weighted edges (`co-activated` stores both directions)
//! - The process-wide state with bounded history and session lists

mod edge;
mod item;
mod state;

pub use edge::{MemoryEdge, CO_ACTIVATED, SUMMARIZES};
pub use item::{parse_duration_ms, ItemKind, MemoryItem, RememberInput};
pub use state::{
    EngineStats, HistoryEntry, MemoryState, RecallSession, HISTORY_CAP, SESSION_CAP,
    SNAPSHOT_HISTORY_CAP, VERSION_CAP,
};

/// Clamp into the unit interval; non-finite collapses to 0
pub fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

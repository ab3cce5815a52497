//! # Engram Core
//!
//! Persistent associative memory engine for long-running assistant agents:
//!
//! - **Memory graph**: typed items with energy, importance, and feedback
//!   counters, linked by weighted directed edges
//! - **Spreading activation**: iterative bidirectional propagation with
//!   decay and cutoff (Collins & Loftus, 1975)
//! - **Programmable recall**: ranking, decay, and exploration as sandboxed
//!   symbolic lambdas with content-hashed version tracking
//! - **Co-activation reinforcement**: recalled-together items grow
//!   `co-activated` edges under triadic-closure gating and per-recall caps
//! - **Self-description**: a cached textual manifest with communities,
//!   temporal layers, key nodes, and topology
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{EngineConfig, MemoryEngine, RememberInput};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = MemoryEngine::new(EngineConfig::default())?;
//!
//! let item = engine.remember(RememberInput {
//!     text: "Spreading activation models associative memory".into(),
//!     tags: vec!["memory".into()],
//!     ..Default::default()
//! })?;
//!
//! let results = engine.recall("memory", 5, "", &CancellationToken::new())?;
//! println!("{}", engine.manifest(&CancellationToken::new())?);
//! ```
//!
//! ## Persistence
//!
//! The authoritative serialization is a single symbolic expression (see
//! [`snapshot`]). Back-ends: a single-file snapshot writer (default) and an
//! embedded SQLite row store with FTS5 keyword search, selected by the
//! `ENGRAM_BACKEND` setting.

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod manifest;
pub mod memory;
pub mod policy;
pub mod recall;
pub mod sexpr;
pub mod snapshot;
pub mod store;
pub mod surface;

mod text;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendKind, EngineConfig};
pub use engine::{ConvergentPattern, MemoryEngine, RecallResult};
pub use error::{EngineError, Result};
pub use graph::activation::ActivationParams;
pub use lifecycle::{ConsolidateOutcome, DecayOutcome};
pub use memory::{
    EngineStats, HistoryEntry, ItemKind, MemoryEdge, MemoryItem, MemoryState, RecallSession,
    RememberInput,
};
pub use policy::{EvalLimits, Policy, PolicyVersion};
pub use recall::reinforce::ReinforceStats;
pub use store::{FileStore, SqliteStore, StoreBackend};
pub use surface::{dispatch, dispatch_with_cancel};

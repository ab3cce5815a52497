//! Engine error taxonomy
//!
//! One crate-wide error enum. Validation and not-found errors are returned
//! to callers without mutating state; evaluator errors are recovered locally
//! by the ranker/decay/exploration fallbacks.

use thiserror::Error;

/// Errors produced by the memory engine
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input outside its domain, range, or format
    #[error("Validation error: {0}")]
    Validation(String),
    /// Unknown item, edge endpoint, or policy slot
    #[error("Not found: {0}")]
    NotFound(String),
    /// Id collision on insert
    #[error("Duplicate id: {0}")]
    Duplicate(String),
    /// Load/save failure or corrupt snapshot
    #[error("Storage error: {0}")]
    Storage(String),
    /// Database error from the sqlite backend
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed activation seeds
    #[error("Activation error: {0}")]
    Activation(String),
    /// Canonical form producer failure
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Parse/type/timeout failure inside a policy lambda
    #[error("Evaluator error: {0}")]
    Evaluator(String),
    /// Operation cancelled via its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

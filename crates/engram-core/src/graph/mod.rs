//! Graph core
//!
//! Mutation and read primitives over the memory state: remember, associate,
//! get-item, trace. Inputs outside their domain produce validation errors
//! and leave the state untouched.

pub mod activation;

use chrono::{DateTime, Utc};

use crate::clock::{is_valid_id, mint_id, Clock};
use crate::error::{EngineError, Result};
use crate::memory::{clamp01, MemoryEdge, MemoryItem, MemoryState, RememberInput};

/// Accesses at or past this count attribute one implicit success each
const IMPLICIT_SUCCESS_ACCESS_COUNT: u32 = 3;

/// Energy lift applied when an item is created or read
const ACCESS_ENERGY_BOOST: f64 = 0.1;

/// Maximum trace depth
pub const MAX_TRACE_DEPTH: usize = 6;

/// Outcome of an `associate` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociateOutcome {
    /// Whether the edge was created (vs. reinforced)
    pub created: bool,
    /// Weight after the upsert
    pub weight: f64,
}

/// Validate, mint an id, insert the item, and touch process energy
pub fn remember(
    state: &mut MemoryState,
    input: RememberInput,
    clock: &dyn Clock,
) -> Result<MemoryItem> {
    input.validate()?;
    let now = clock.now();
    let id = mint_id(clock);
    let item = input.into_item(id, now);
    state.insert_item(item.clone())?;
    state.recompute_energy();
    Ok(item)
}

/// Upsert a directed edge
///
/// Creating uses the clamped weight as-is; reinforcing treats the weight
/// argument as a delta on the existing edge.
pub fn associate(
    state: &mut MemoryState,
    from: &str,
    to: &str,
    relation: &str,
    weight: f64,
    now: DateTime<Utc>,
) -> Result<AssociateOutcome> {
    if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
        return Err(EngineError::Validation(format!(
            "weight {} outside [0, 1]",
            weight
        )));
    }
    if relation.trim().is_empty() {
        return Err(EngineError::Validation("empty relation".to_string()));
    }
    if from == to {
        return Err(EngineError::Validation("self-edge".to_string()));
    }
    if !state.items.contains_key(from) {
        return Err(EngineError::NotFound(format!("item {}", from)));
    }
    if !state.items.contains_key(to) {
        return Err(EngineError::NotFound(format!("item {}", to)));
    }

    if let Some(edge) = state.find_edge_mut(from, to, relation) {
        edge.weight = clamp01(edge.weight + weight);
        edge.last_reinforced_at = now;
        return Ok(AssociateOutcome {
            created: false,
            weight: edge.weight,
        });
    }
    let edge = MemoryEdge::new(from, to, relation, weight, now);
    let out = AssociateOutcome {
        created: true,
        weight: edge.weight,
    };
    state.edges.push(edge);
    Ok(out)
}

/// Read an item, updating its access bookkeeping
///
/// Each read bumps `accessCount`, refreshes `lastAccessedAt`, and lifts
/// energy. Once an item has been read three times, further reads count one
/// implicit success each.
pub fn get_item(state: &mut MemoryState, id: &str, now: DateTime<Utc>) -> Result<MemoryItem> {
    if !is_valid_id(id) {
        return Err(EngineError::Validation(format!("malformed id '{}'", id)));
    }
    let item = state
        .items
        .get_mut(id)
        .ok_or_else(|| EngineError::NotFound(format!("item {}", id)))?;
    touch_access(item, now);
    let snapshot = item.clone();
    state.recompute_energy();
    Ok(snapshot)
}

/// Access bookkeeping shared by get-item and recall
pub fn touch_access(item: &mut MemoryItem, now: DateTime<Utc>) {
    item.access_count = item.access_count.saturating_add(1);
    item.last_accessed_at = Some(now);
    item.energy = clamp01(item.energy + ACCESS_ENERGY_BOOST);
    if item.access_count >= IMPLICIT_SUCCESS_ACCESS_COUNT {
        item.success = item.success.saturating_add(1);
    }
}

/// Bounded DFS over directed edges returning the terminal simple paths
/// from `start`. Paths never revisit a node, and depth is capped at 6.
pub fn trace(state: &MemoryState, start: &str, depth: usize) -> Result<Vec<Vec<String>>> {
    if !state.items.contains_key(start) {
        return Err(EngineError::NotFound(format!("item {}", start)));
    }
    let depth = depth.min(MAX_TRACE_DEPTH);

    // Successor map rebuilt on demand; edges are records, not pointers
    let mut successors: std::collections::HashMap<&str, Vec<&str>> =
        std::collections::HashMap::new();
    for edge in &state.edges {
        successors
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut paths = Vec::new();
    let mut current = vec![start.to_string()];
    walk(&successors, &mut current, depth, &mut paths);
    Ok(paths)
}

fn walk<'a>(
    successors: &std::collections::HashMap<&'a str, Vec<&'a str>>,
    current: &mut Vec<String>,
    remaining: usize,
    paths: &mut Vec<Vec<String>>,
) {
    let here = current.last().expect("path never empty").clone();
    let nexts: Vec<&str> = successors
        .get(here.as_str())
        .map(|ns| {
            ns.iter()
                .copied()
                .filter(|n| !current.iter().any(|seen| seen == n))
                .collect()
        })
        .unwrap_or_default();

    if remaining == 0 || nexts.is_empty() {
        paths.push(current.clone());
        return;
    }
    for next in nexts {
        current.push(next.to_string());
        walk(successors, current, remaining - 1, paths);
        current.pop();
    }
}

// ============================================================================
// TESTS
// ============================================================================

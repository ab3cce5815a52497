//! Spreading activation engine
//!
//! Iterative bidirectional propagation over weighted edges with per-step
//! decay and a cutoff threshold. Deterministic for a given input; missing
//! endpoints are skipped; cancellation is checked every step.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::memory::MemoryState;

/// Parameters for one activation run
#[derive(Debug, Clone, Copy)]
pub struct ActivationParams {
    /// Number of propagation steps
    pub steps: u32,
    /// Per-step decay factor
    pub decay: f64,
    /// Entries below this after a step are dropped
    pub threshold: f64,
}

/// Spread activation from `seeds` over the state's edges
///
/// Each step scans every edge in both directions and accumulates
/// `A[v] += A[u] * w * decay`; entries below the threshold are then
/// dropped. Seeds act as lower bounds on the first step, so a seed is never
/// thresholded away before it has had a chance to propagate.
pub fn spread(
    state: &MemoryState,
    seeds: &HashMap<String, f64>,
    params: ActivationParams,
    cancel: &CancellationToken,
) -> Result<HashMap<String, f64>> {
    for (id, a0) in seeds {
        if !a0.is_finite() || *a0 < 0.0 {
            return Err(EngineError::Activation(format!(
                "seed {} has activation {}",
                id, a0
            )));
        }
    }
    if !params.decay.is_finite() || !params.threshold.is_finite() {
        return Err(EngineError::Activation("non-finite parameters".to_string()));
    }

    let mut activation: HashMap<String, f64> = seeds.clone();

    for step in 0..params.steps {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut next = activation.clone();
        for edge in &state.edges {
            // Skip edges whose endpoints have left the graph
            if !state.items.contains_key(&edge.from) || !state.items.contains_key(&edge.to) {
                continue;
            }
            // Undirected semantics: scan both directions
            if let Some(a) = activation.get(&edge.from) {
                *next.entry(edge.to.clone()).or_insert(0.0) += a * edge.weight * params.decay;
            }
            if let Some(a) = activation.get(&edge.to) {
                *next.entry(edge.from.clone()).or_insert(0.0) += a * edge.weight * params.decay;
            }
        }
        if step == 0 {
            for (id, a0) in seeds {
                let entry = next.entry(id.clone()).or_insert(0.0);
                if *entry < *a0 {
                    *entry = *a0;
                }
            }
        }
        next.retain(|_, a| *a >= params.threshold);
        activation = next;
    }

    Ok(activation)
}

// ============================================================================
// TESTS
// ============================================================================

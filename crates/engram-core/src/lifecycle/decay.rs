//! Temporal decay
//!
//! Exponential half-life decay on item energy, modulated per item by the
//! decay policy lambda (or its fallback), plus edge decay with floor
//! pruning. Each pass measures elapsed time from the previous touch, so a
//! zero-interval pass changes nothing.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::memory::{clamp01, MemoryState};
use crate::policy::EvalLimits;

/// Clamp range for the policy-supplied decay scale
const SCALE_MIN: f64 = 0.1;
const SCALE_MAX: f64 = 10.0;

/// Outcome of one decay pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecayOutcome {
    /// Items the pass processed
    pub decayed_items: usize,
    /// Edges pruned below the weight floor
    pub pruned_edges: usize,
}

/// Fallback scale when no decay lambda is installed or it fails:
/// successful items decay slower, failing items faster
fn fallback_scale(success: u32, fail: u32) -> f64 {
    0.5 + 1.5 * success as f64 / (success as f64 + fail as f64 + 1.0)
}

/// Run one decay pass
///
/// `half_life_days` overrides the configured base half-life when given.
pub fn decay(
    state: &mut MemoryState,
    config: &EngineConfig,
    half_life_days: Option<f64>,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<DecayOutcome> {
    let base_days = half_life_days.unwrap_or(config.half_life_days);
    if !(base_days > 0.0) {
        return Err(EngineError::Validation(format!(
            "half-life {} must be positive",
            base_days
        )));
    }
    let base_ms = base_days * 86_400_000.0;
    let limits = EvalLimits::with_timeout_ms(config.evaluator_timeout_ms);
    let mut outcome = DecayOutcome::default();

    for item in state.items.values_mut() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        outcome.decayed_items += 1;
        let dt = (now.timestamp_millis() - item.updated_at.timestamp_millis()).max(0) as f64;
        if dt == 0.0 {
            continue;
        }
        let scale = state
            .policy
            .decay_scale(
                item.success,
                item.fail,
                item.energy,
                item.importance,
                item.recency_ms(now) as f64,
                base_ms,
                &limits,
            )
            .unwrap_or_else(|| fallback_scale(item.success, item.fail))
            .clamp(SCALE_MIN, SCALE_MAX);
        let half_life_ms = base_ms * scale;
        item.energy = clamp01(item.energy * (-(std::f64::consts::LN_2) * dt / half_life_ms).exp());
        // The pass measures from the previous touch
        item.updated_at = now;
    }

    for edge in state.edges.iter_mut() {
        let dt = (now.timestamp_millis() - edge.last_reinforced_at.timestamp_millis()).max(0) as f64;
        if dt == 0.0 {
            continue;
        }
        edge.weight = clamp01(edge.weight * (-(std::f64::consts::LN_2) * dt / base_ms).exp());
        edge.last_reinforced_at = now;
    }
    outcome.pruned_edges = state.prune_edges(config.edge_weight_floor);

    state.recompute_energy();
    Ok(outcome)
}

// ============================================================================
// TESTS
// ============================================================================

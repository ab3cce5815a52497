//! Policy subsystem
//!
//! Ranking, decay, and exploration are user-replaceable symbolic lambdas.
//! Policies are data: sources are content-hashed into versions, every call
//! site has a deterministic fallback, and evaluator failures never escape.

pub mod eval;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EngineError, Result};
pub use eval::{eval_lambda, EvalError, EvalLimits, Value};

/// Short content hash of a lambda source (first 8 bytes of SHA-256, hex)
pub fn short_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..8])
}

// ============================================================================
// POLICY VERSIONS
// ============================================================================

/// A stored policy version with feedback attribution counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVersion {
    /// Content hash of the source
    pub id: String,
    /// Slot name (`decay`, `recall-score`, ...)
    pub name: String,
    /// The lambda source
    pub source: String,
    /// When the version was installed
    pub created_at: DateTime<Utc>,
    /// Sessions under this version judged successful
    pub success: u32,
    /// Sessions under this version judged failed
    pub fail: u32,
}

impl PolicyVersion {
    /// Create a version for a freshly installed source
    pub fn new(name: impl Into<String>, source: impl Into<String>, now: DateTime<Utc>) -> Self {
        let source = source.into();
        Self {
            id: short_hash(&source),
            name: name.into(),
            source,
            created_at: now,
            success: 0,
            fail: 0,
        }
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// Slot names accepted by `set-policy-fn`
pub const POLICY_SLOTS: &[&str] = &[
    "decay",
    "recall-score",
    "recall-combiner",
    "exploration",
    "policy-generator",
];

/// The active policy: one optional lambda source per slot, plus the
/// composable recall scorer list grown by `adapt-policy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub decay_fn: Option<String>,
    pub recall_score_fn: Option<String>,
    pub recall_score_fns: Vec<String>,
    pub recall_combiner_fn: Option<String>,
    pub exploration_fn: Option<String>,
    pub policy_generator_fn: Option<String>,
}

impl Policy {
    /// Read a slot by name
    pub fn get_slot(&self, name: &str) -> Result<Option<&str>> {
        match name {
            "decay" => Ok(self.decay_fn.as_deref()),
            "recall-score" => Ok(self.recall_score_fn.as_deref()),
            "recall-combiner" => Ok(self.recall_combiner_fn.as_deref()),
            "exploration" => Ok(self.exploration_fn.as_deref()),
            "policy-generator" => Ok(self.policy_generator_fn.as_deref()),
            _ => Err(EngineError::NotFound(format!("policy slot '{}'", name))),
        }
    }

    /// Install a slot source, returning the previous source
    pub fn set_slot(&mut self, name: &str, source: String) -> Result<Option<String>> {
        let slot = match name {
            "decay" => &mut self.decay_fn,
            "recall-score" => &mut self.recall_score_fn,
            "recall-combiner" => &mut self.recall_combiner_fn,
            "exploration" => &mut self.exploration_fn,
            "policy-generator" => &mut self.policy_generator_fn,
            _ => return Err(EngineError::NotFound(format!("policy slot '{}'", name))),
        };
        Ok(slot.replace(source))
    }

    /// Version ids of the sources that govern ranking right now
    ///
    /// Recorded into each recall session so feedback can be attributed to
    /// the policy that produced the ordering.
    pub fn active_ranking_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(src) = &self.recall_score_fn {
            ids.push(short_hash(src));
        }
        for src in &self.recall_score_fns {
            ids.push(short_hash(src));
        }
        if let Some(src) = &self.recall_combiner_fn {
            ids.push(short_hash(src));
        }
        ids
    }

    // ------------------------------------------------------------------
    // Call sites. Each returns None on any evaluator failure and lets the
    // caller apply its documented fallback.
    // ------------------------------------------------------------------

    /// decay: `(success fail energy importance recency_ms base_half_life_ms) -> scale`
    pub fn decay_scale(
        &self,
        success: u32,
        fail: u32,
        energy: f64,
        importance: f64,
        recency_ms: f64,
        base_half_life_ms: f64,
        limits: &EvalLimits,
    ) -> Option<f64> {
        let src = self.decay_fn.as_deref()?;
        let args = [
            Value::Num(success as f64),
            Value::Num(fail as f64),
            Value::Num(energy),
            Value::Num(importance),
            Value::Num(recency_ms),
            Value::Num(base_half_life_ms),
        ];
        eval_scalar(src, &args, limits)
    }

    /// recall-score: `(activation recency importance access success fail hour_norm day_norm) -> score`
    pub fn recall_score(
        &self,
        source: &str,
        features: &[f64; 8],
        limits: &EvalLimits,
    ) -> Option<f64> {
        let args: Vec<Value> = features.iter().map(|f| Value::Num(*f)).collect();
        eval_scalar(source, &args, limits)
    }

    /// recall-combiner: `(scores_list) -> score`
    pub fn combine_scores(&self, scores: &[f64], limits: &EvalLimits) -> Option<f64> {
        let src = self.recall_combiner_fn.as_deref()?;
        eval_scalar(src, &[Value::num_list(scores)], limits)
    }

    /// exploration: ten positional inputs, returns a tail index (-1 declines)
    #[allow(clippy::too_many_arguments)]
    pub fn explore(
        &self,
        limit: usize,
        tail_n: usize,
        acts: &[f64],
        recs: &[f64],
        imps: &[f64],
        accs: &[f64],
        succ: &[f64],
        fails: &[f64],
        hours: &[f64],
        days: &[f64],
        limits: &EvalLimits,
    ) -> Option<i64> {
        let src = self.exploration_fn.as_deref()?;
        let args = [
            Value::Num(limit as f64),
            Value::Num(tail_n as f64),
            Value::num_list(acts),
            Value::num_list(recs),
            Value::num_list(imps),
            Value::num_list(accs),
            Value::num_list(succ),
            Value::num_list(fails),
            Value::num_list(hours),
            Value::num_list(days),
        ];
        let n = eval_scalar(src, &args, limits)?;
        if n.is_finite() && n.fract() == 0.0 {
            Some(n as i64)
        } else {
            None
        }
    }

    /// policy-generator: ten histogram lists, returns a new scorer source
    pub fn generate_scorer(&self, histograms: &[Vec<f64>; 10], limits: &EvalLimits) -> Option<String> {
        let src = self.policy_generator_fn.as_deref()?;
        let args: Vec<Value> = histograms.iter().map(|h| Value::num_list(h)).collect();
        match eval_lambda(src, &args, limits) {
            Ok(Value::Str(code)) if !code.trim().is_empty() => Some(code),
            Ok(other) => {
                debug!(?other, "policy generator returned a non-string");
                None
            }
            Err(e) => {
                debug!(error = %e, "policy generator failed");
                None
            }
        }
    }
}

/// Evaluate a source expecting a scalar number
fn eval_scalar(source: &str, args: &[Value], limits: &EvalLimits) -> Option<f64> {
    match eval_lambda(source, args, limits) {
        Ok(value) => match value.as_num() {
            Some(n) => Some(n),
            None => {
                debug!(source, "policy lambda returned a non-number");
                None
            }
        },
        Err(e) => {
            debug!(source, error = %e, "policy lambda failed");
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_stable_and_distinct() {
        let a = short_hash("(lambda (x) x)");
        let b = short_hash("(lambda (x) x)");
        let c = short_hash("(lambda (y) y)");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_slot_roundtrip() {
        let mut policy = Policy::default();
        let prev = policy
            .set_slot("decay", "(lambda (s f e i r b) 1)".to_string())
            .unwrap();
        assert!(prev.is_none());
        let prev = policy
            .set_slot("decay", "(lambda (s f e i r b) 2)".to_string())
            .unwrap();
        assert_eq!(prev.as_deref(), Some("(lambda (s f e i r b) 1)"));
        assert!(policy.get_slot("nope").is_err());
    }

    #[test]
    fn test_decay_scale_happy_path() {
        let mut policy = Policy::default();
        policy.decay_fn = Some("(lambda (s f e i r b) (+ 1 (* 0.5 s)))".to_string());
        let scale = policy
            .decay_scale(2, 0, 1.0, 0.5, 0.0, 1.0, &EvalLimits::default())
            .unwrap();
        assert_eq!(scale, 2.0);
    }

    #[test]
    fn test_broken_lambda_yields_none() {
        let mut policy = Policy::default();
        policy.decay_fn = Some("(lambda (s f) (+ s unknown))".to_string());
        assert!(policy
            .decay_scale(1, 0, 1.0, 0.5, 0.0, 1.0, &EvalLimits::default())
            .is_none());
    }

    #[test]
    fn test_exploration_index() {
        let mut policy = Policy::default();
        policy.exploration_fn =
            Some("(lambda (limit n acts recs imps accs succ fails hours days) (if (> n 0) 0 -1))".to_string());
        let idx = policy.explore(
            5,
            3,
            &[0.1, 0.2, 0.3],
            &[0.0; 3],
            &[0.0; 3],
            &[0.0; 3],
            &[0.0; 3],
            &[0.0; 3],
            &[0.0; 3],
            &[0.0; 3],
            &EvalLimits::default(),
        );
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn test_combiner_over_components() {
        let mut policy = Policy::default();
        policy.recall_combiner_fn = Some("(lambda (scores) (first scores))".to_string());
        let out = policy.combine_scores(&[0.7, 0.1], &EvalLimits::default());
        assert_eq!(out, Some(0.7));
    }

    #[test]
    fn test_active_ranking_ids_cover_scorers() {
        let mut policy = Policy::default();
        assert!(policy.active_ranking_ids().is_empty());
        policy.recall_score_fn = Some("(lambda (a r i ac s f h d) a)".to_string());
        policy.recall_score_fns.push("(lambda (a r i ac s f h d) r)".to_string());
        assert_eq!(policy.active_ranking_ids().len(), 2);
    }
}

//! Recall ranking
//!
//! Composes policy lambdas with built-in features to score candidates,
//! applies the strong-activation override, and runs the exploration swap.
//! The pipeline is total: every evaluator failure falls back to the
//! built-in blend, every non-finite score collapses to 0, and equal scores
//! preserve insertion order.

pub mod reinforce;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;

use crate::memory::MemoryItem;
use crate::policy::{EvalLimits, Policy};

/// Recency half-life used by the built-in features
const RECENCY_HALF_LIFE_MS: f64 = 7.0 * 86_400_000.0;

/// Activation ceiling that switches the ranker into activation-heavy mode
const STRONG_ACTIVATION_MAX: f64 = 0.1;

/// Per-item activation floor for the activation-heavy override
const STRONG_ACTIVATION_ITEM: f64 = 0.05;

/// Tail window inspected by exploration
const EXPLORATION_TAIL: usize = 10;

/// Feature indexes into the positional feature vector
pub mod feature {
    pub const ACTIVATION: usize = 0;
    pub const RECENCY: usize = 1;
    pub const IMPORTANCE: usize = 2;
    pub const ACCESS: usize = 3;
    pub const SUCCESS: usize = 4;
    pub const FAIL: usize = 5;
    pub const HOUR_NORM: usize = 6;
    pub const DAY_NORM: usize = 7;
}

/// A candidate entering the ranker
#[derive(Debug, Clone)]
pub struct RecallCandidate {
    pub id: String,
    pub features: [f64; 8],
}

/// A scored candidate leaving the ranker
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f64,
    pub activation: f64,
}

/// Built-in feature vector for one item
pub fn features_for(item: &MemoryItem, activation: f64, now: DateTime<Utc>) -> [f64; 8] {
    let recency = (-(std::f64::consts::LN_2) * item.recency_ms(now) as f64
        / RECENCY_HALF_LIFE_MS)
        .exp();
    [
        activation,
        recency,
        item.importance,
        item.access_count as f64,
        item.success as f64,
        item.fail as f64,
        now.hour() as f64 / 23.0,
        now.weekday().num_days_from_sunday() as f64 / 6.0,
    ]
}

/// The built-in blend used when no policy scorer is installed, and as the
/// per-component fallback when one fails
fn builtin_score(f: &[f64; 8]) -> f64 {
    0.6 * f[feature::ACTIVATION] + 0.25 * f[feature::RECENCY] + 0.15 * f[feature::IMPORTANCE]
}

fn finite_or(score: Option<f64>, fallback: f64) -> f64 {
    match score {
        Some(s) if s.is_finite() => s,
        _ => fallback,
    }
}

/// Score one candidate through the configured policy pipeline
fn combined_score(f: &[f64; 8], policy: &Policy, limits: &EvalLimits) -> f64 {
    let fallback = builtin_score(f);

    if !policy.recall_score_fns.is_empty() {
        let components: Vec<f64> = policy
            .recall_score_fns
            .iter()
            .map(|src| finite_or(policy.recall_score(src, f, limits), fallback))
            .collect();
        let combined = match policy.combine_scores(&components, limits) {
            Some(s) if s.is_finite() => s,
            _ => components.iter().sum::<f64>() / components.len() as f64,
        };
        return if combined.is_finite() { combined } else { 0.0 };
    }

    if let Some(src) = &policy.recall_score_fn {
        return finite_or(policy.recall_score(src, f, limits), fallback);
    }

    fallback
}

/// Rank candidates, strongest first
///
/// When the strongest activation reaches 0.1, activation dominates: items
/// with activation above 0.05 are scored `activation * 10`, overriding the
/// combined score. The sort is stable, so equal scores keep insertion
/// order.
pub fn rank(
    candidates: &[RecallCandidate],
    policy: &Policy,
    limits: &EvalLimits,
) -> Vec<ScoredCandidate> {
    let max_activation = candidates
        .iter()
        .map(|c| c.features[feature::ACTIVATION])
        .fold(0.0_f64, f64::max);

    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|c| {
            let activation = c.features[feature::ACTIVATION];
            let mut score =
                if max_activation >= STRONG_ACTIVATION_MAX && activation > STRONG_ACTIVATION_ITEM {
                    activation * 10.0
                } else {
                    combined_score(&c.features, policy, limits)
                };
            if !score.is_finite() {
                score = 0.0;
            }
            ScoredCandidate {
                id: c.id.clone(),
                score,
                activation,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

/// The ε-greedy tail heuristic: prefer rarely-accessed items with a good
/// success record and some freshness
fn exploration_heuristic(f: &[f64; 8]) -> f64 {
    let success_rate = f[feature::SUCCESS] / (f[feature::SUCCESS] + f[feature::FAIL] + 1.0);
    (1.0 / (1.0 + f[feature::ACCESS])) * (0.5 + success_rate) * (0.5 + f[feature::RECENCY])
}

/// Pick the top `limit`, then consider a tail swap
///
/// The exploration lambda sees the tail's feature columns and may return a
/// tail index (−1 declines). Without a lambda decision, an ε draw picks the
/// tail item ranked best by the built-in heuristic. A swap replaces the
/// last chosen item.
pub fn select(
    ranked: &[ScoredCandidate],
    features: impl Fn(&str) -> [f64; 8],
    limit: usize,
    epsilon: f64,
    policy: &Policy,
    limits: &EvalLimits,
    rng: &mut impl Rng,
) -> Vec<ScoredCandidate> {
    let mut chosen: Vec<ScoredCandidate> = ranked.iter().take(limit).cloned().collect();
    if chosen.is_empty() || ranked.len() <= limit {
        return chosen;
    }

    let tail: Vec<&ScoredCandidate> =
        ranked[limit..].iter().take(EXPLORATION_TAIL).collect();
    let tail_features: Vec<[f64; 8]> = tail.iter().map(|c| features(&c.id)).collect();
    let column = |i: usize| -> Vec<f64> { tail_features.iter().map(|f| f[i]).collect() };

    let picked = policy
        .explore(
            limit,
            tail.len(),
            &column(feature::ACTIVATION),
            &column(feature::RECENCY),
            &column(feature::IMPORTANCE),
            &column(feature::ACCESS),
            &column(feature::SUCCESS),
            &column(feature::FAIL),
            &column(feature::HOUR_NORM),
            &column(feature::DAY_NORM),
            limits,
        )
        .filter(|i| (0..tail.len() as i64).contains(i))
        .map(|i| i as usize)
        .or_else(|| {
            if rng.gen::<f64>() < epsilon {
                tail_features
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (i, exploration_heuristic(f)))
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
            } else {
                None
            }
        });

    if let Some(i) = picked {
        let last = chosen.len() - 1;
        chosen[last] = tail[i].clone();
    }
    chosen
}

// ============================================================================
// TESTS
// ============================================================================

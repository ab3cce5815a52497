//! Engine configuration
//!
//! Every recognized option with its default, plus back-end selection from
//! the `ENGRAM_BACKEND` environment setting (unknown values fall back to
//! `file` with a warning).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Storage back-end selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-file snapshot writer
    #[default]
    File,
    /// Embedded row store with FTS5 keyword search
    Sqlite,
}

impl BackendKind {
    /// Parse a back-end name; unknown names fall back to `File` with a warning
    pub fn parse_name(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "file" => BackendKind::File,
            "sqlite" => BackendKind::Sqlite,
            other => {
                warn!(backend = other, "unknown back-end, falling back to file");
                BackendKind::File
            }
        }
    }

    /// Read the back-end from `ENGRAM_BACKEND`
    pub fn from_env() -> Self {
        match std::env::var("ENGRAM_BACKEND") {
            Ok(v) if !v.is_empty() => Self::parse_name(&v),
            _ => BackendKind::File,
        }
    }
}

/// Engine configuration
///
/// Field names mirror the recognized option names (camelCase at the
/// serialization boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Workspace identifier written into snapshots
    pub workspace_id: String,
    /// Base decay half-life in days
    pub half_life_days: f64,
    /// Co-activation reinforcement increment
    pub reinforce_delta: f64,
    /// Spreading activation step count
    pub activation_steps: u32,
    /// Per-step activation decay factor
    pub activation_decay: f64,
    /// Activation cutoff after each step
    pub activation_threshold: f64,
    /// Edges below this weight are pruned on decay
    pub edge_weight_floor: f64,
    /// Minimum co-activation weight for consolidation clustering
    pub cluster_edge_min_weight: f64,
    /// Minimum component size that produces a reflection
    pub cluster_min_size: usize,
    /// Members kept per consolidated cluster
    pub cluster_keep_recent: usize,
    /// Probability of the exploration swap
    pub exploration_epsilon: f64,
    /// Exploration lambda source
    pub exploration_fn: Option<String>,
    /// Keywords per summary
    pub summarize_top_keywords: usize,
    /// Snippets per summary
    pub summarize_max_snippets: usize,
    /// Weight quantile for manifest graph sparsification
    pub cluster_percentile: f64,
    /// Neighbors kept per node during sparsification
    pub neighbor_top_k: usize,
    /// Global cap on reinforced pairs per recall
    pub max_pairs_per_recall: usize,
    /// Per-node cap on reinforced pairs per recall
    pub coact_top_k_per_node: usize,
    /// Decay lambda source
    pub decay_fn: Option<String>,
    /// Single recall scorer source (replaces the built-in blend)
    pub recall_score_fn: Option<String>,
    /// Recall scorer sources evaluated as components
    pub recall_score_fns: Vec<String>,
    /// Combiner lambda over the component list
    pub recall_combiner_fn: Option<String>,
    /// Policy generator lambda source
    pub policy_generator_fn: Option<String>,
    /// Explicit store location; platform data dir when absent
    #[serde(skip)]
    pub data_path: Option<PathBuf>,
    /// Selected back-end
    #[serde(skip)]
    pub backend: BackendKind,
    /// Per-call policy evaluator budget
    pub evaluator_timeout_ms: u64,
    /// Recall wall-clock budget
    pub recall_timeout_ms: u64,
    /// Manifest cache lifetime
    pub manifest_ttl_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            half_life_days: 7.0,
            reinforce_delta: 0.05,
            activation_steps: 3,
            activation_decay: 0.85,
            activation_threshold: 0.2,
            edge_weight_floor: 0.01,
            cluster_edge_min_weight: 0.2,
            cluster_min_size: 10,
            cluster_keep_recent: 5,
            exploration_epsilon: 0.05,
            exploration_fn: None,
            summarize_top_keywords: 8,
            summarize_max_snippets: 5,
            cluster_percentile: 0.6,
            neighbor_top_k: 3,
            max_pairs_per_recall: 12,
            coact_top_k_per_node: 3,
            decay_fn: None,
            recall_score_fn: None,
            recall_score_fns: Vec::new(),
            recall_combiner_fn: None,
            policy_generator_fn: None,
            data_path: None,
            backend: BackendKind::default(),
            evaluator_timeout_ms: 100,
            recall_timeout_ms: 2_000,
            manifest_ttl_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Defaults with the back-end taken from `ENGRAM_BACKEND`
    pub fn from_env() -> Self {
        Self {
            backend: BackendKind::from_env(),
            ..Self::default()
        }
    }
}

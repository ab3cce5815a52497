//! Process-wide memory state
//!
//! One store per process: items, edges, bounded history/session lists, the
//! active policy with its versions, and the process-level energy/threshold
//! scalars. All list caps are enforced on every push.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::memory::{clamp01, MemoryEdge, MemoryItem};
use crate::policy::{Policy, PolicyVersion};

/// Operational history cap
pub const HISTORY_CAP: usize = 1_000;
/// Recent recall session cap
pub const SESSION_CAP: usize = 100;
/// Stored policy version cap
pub const VERSION_CAP: usize = 200;
/// History entries written into a snapshot
pub const SNAPSHOT_HISTORY_CAP: usize = 50;

// ============================================================================
// RECORDS
// ============================================================================

/// One operational history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// When the operation ran
    pub t: DateTime<Utc>,
    /// Operation name (`remember`, `recall`, `decay`, ...)
    pub op: String,
    /// Structured one-line detail, e.g. `created=2 reinforced=3`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One recall session, kept for feedback attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallSession {
    /// When the recall ran
    pub t: DateTime<Utc>,
    /// Item ids returned, in rank order
    pub items: Vec<String>,
    /// Policy version ids active during the recall
    pub policy_ids: Vec<String>,
    /// The query text
    pub query: String,
    /// Process energy at recall time
    pub energy: f64,
    /// Local hour of day (0..=23)
    pub hour: u32,
}

/// Store-wide statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub items: usize,
    pub edges: usize,
    pub average_degree: f64,
    pub energy: f64,
    pub threshold: f64,
    pub kinds: BTreeMap<String, usize>,
    pub sessions: usize,
    pub policy_versions: usize,
    pub history: usize,
}

// ============================================================================
// STATE
// ============================================================================

/// The process-wide memory store
///
/// Items live in a `BTreeMap` keyed by id. Minted ids lead with a base-36
/// timestamp, so iteration order is creation order, which keeps candidate
/// enumeration deterministic.
#[derive(Debug, Clone)]
pub struct MemoryState {
    /// Workspace identifier
    pub workspace_id: String,
    /// When this store was first created
    pub born: DateTime<Utc>,
    /// Process-level energy, the mean of item energies
    pub energy: f64,
    /// Process-level threshold scalar
    pub threshold: f64,
    /// Items by id
    pub items: BTreeMap<String, MemoryItem>,
    /// Ordered edge list
    pub edges: Vec<MemoryEdge>,
    /// Bounded operational history, oldest first
    pub history: Vec<HistoryEntry>,
    /// Bounded recent recall sessions, oldest first
    pub sessions: Vec<RecallSession>,
    /// Active policy lambda sources
    pub policy: Policy,
    /// Stored policy versions, oldest first
    pub policy_versions: Vec<PolicyVersion>,
    /// Bumped on every mutation; manifest cache key (not persisted)
    pub revision: u64,
}

impl MemoryState {
    /// Fresh empty state
    pub fn new(workspace_id: impl Into<String>, born: DateTime<Utc>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            born,
            energy: 0.5,
            threshold: 0.2,
            items: BTreeMap::new(),
            edges: Vec::new(),
            history: Vec::new(),
            sessions: Vec::new(),
            policy: Policy::default(),
            policy_versions: Vec::new(),
            revision: 0,
        }
    }

    /// Insert a new item; colliding ids are a `Duplicate` error
    pub fn insert_item(&mut self, item: MemoryItem) -> Result<()> {
        if self.items.contains_key(&item.id) {
            return Err(EngineError::Duplicate(item.id));
        }
        self.items.insert(item.id.clone(), item);
        Ok(())
    }

    /// Remove an item and drag its incident edges with it
    pub fn remove_item(&mut self, id: &str) -> Option<MemoryItem> {
        let removed = self.items.remove(id)?;
        self.edges.retain(|e| e.from != id && e.to != id);
        Some(removed)
    }

    /// Find a directed edge by endpoints and relation
    pub fn find_edge_mut(
        &mut self,
        from: &str,
        to: &str,
        relation: &str,
    ) -> Option<&mut MemoryEdge> {
        self.edges
            .iter_mut()
            .find(|e| e.from == from && e.to == to && e.relation == relation)
    }

    /// Drop edges whose weight fell below the floor, or whose endpoints left
    pub fn prune_edges(&mut self, weight_floor: f64) -> usize {
        let before = self.edges.len();
        let items = &self.items;
        self.edges.retain(|e| {
            e.weight >= weight_floor && items.contains_key(&e.from) && items.contains_key(&e.to)
        });
        before - self.edges.len()
    }

    /// Append a history entry, truncating to the cap
    pub fn push_history(&mut self, t: DateTime<Utc>, op: impl Into<String>, detail: Option<String>) {
        self.history.push(HistoryEntry {
            t,
            op: op.into(),
            detail,
        });
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
        self.revision = self.revision.wrapping_add(1);
    }

    /// Append a recall session, truncating to the cap
    pub fn push_session(&mut self, session: RecallSession) {
        self.sessions.push(session);
        if self.sessions.len() > SESSION_CAP {
            let excess = self.sessions.len() - SESSION_CAP;
            self.sessions.drain(..excess);
        }
    }

    /// Record a policy version, de-duplicating by id and truncating to the cap
    pub fn push_version(&mut self, version: PolicyVersion) {
        if self.policy_versions.iter().any(|v| v.id == version.id) {
            return;
        }
        self.policy_versions.push(version);
        if self.policy_versions.len() > VERSION_CAP {
            let excess = self.policy_versions.len() - VERSION_CAP;
            self.policy_versions.drain(..excess);
        }
    }

    /// Recompute process energy as the mean of item energies
    pub fn recompute_energy(&mut self) {
        if self.items.is_empty() {
            self.energy = 0.0;
            return;
        }
        let sum: f64 = self.items.values().map(|i| i.energy).sum();
        self.energy = clamp01(sum / self.items.len() as f64);
    }

    /// Neighbor map over co-activation edges at or above `min_weight`
    ///
    /// Both directions are stored for co-activation, so a single directed
    /// scan yields the undirected neighborhood.
    pub fn coactivation_neighbors(&self, min_weight: f64) -> HashMap<&str, HashSet<&str>> {
        let mut neighbors: HashMap<&str, HashSet<&str>> = HashMap::new();
        for edge in &self.edges {
            if edge.is_coactivation() && edge.weight >= min_weight {
                neighbors
                    .entry(edge.from.as_str())
                    .or_default()
                    .insert(edge.to.as_str());
            }
        }
        neighbors
    }

    /// Count of undirected unique edges (endpoint pair, any relation)
    pub fn undirected_edge_count(&self) -> usize {
        let mut seen = HashSet::new();
        for edge in &self.edges {
            let (a, b) = if edge.from <= edge.to {
                (edge.from.as_str(), edge.to.as_str())
            } else {
                (edge.to.as_str(), edge.from.as_str())
            };
            seen.insert((a, b));
        }
        seen.len()
    }

    /// Store-wide statistics
    pub fn stats(&self) -> EngineStats {
        let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
        for item in self.items.values() {
            *kinds.entry(item.kind.as_str().to_string()).or_default() += 1;
        }
        let unique = self.undirected_edge_count();
        let average_degree = if self.items.is_empty() {
            0.0
        } else {
            2.0 * unique as f64 / self.items.len() as f64
        };
        EngineStats {
            items: self.items.len(),
            edges: self.edges.len(),
            average_degree,
            energy: self.energy,
            threshold: self.threshold,
            kinds,
            sessions: self.sessions.len(),
            policy_versions: self.policy_versions.len(),
            history: self.history.len(),
        }
    }

    /// Check the universal invariants; used by tests after every scenario
    pub fn validate_invariants(&self) -> Result<()> {
        for edge in &self.edges {
            if !self.items.contains_key(&edge.from) || !self.items.contains_key(&edge.to) {
                return Err(EngineError::Validation(format!(
                    "dangling edge {} -> {}",
                    edge.from, edge.to
                )));
            }
            if !(0.0..=1.0).contains(&edge.weight) {
                return Err(EngineError::Validation(format!(
                    "edge weight {} outside [0, 1]",
                    edge.weight
                )));
            }
        }
        for item in self.items.values() {
            if !(0.0..=1.0).contains(&item.importance) || !(0.0..=1.0).contains(&item.energy) {
                return Err(EngineError::Validation(format!(
                    "item {} scalars outside [0, 1]",
                    item.id
                )));
            }
            if item.updated_at < item.created_at {
                return Err(EngineError::Validation(format!(
                    "item {} updatedAt precedes createdAt",
                    item.id
                )));
            }
        }
        if self.history.len() > HISTORY_CAP
            || self.sessions.len() > SESSION_CAP
            || self.policy_versions.len() > VERSION_CAP
        {
            return Err(EngineError::Validation("list cap exceeded".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

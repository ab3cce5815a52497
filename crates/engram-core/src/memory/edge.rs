//! Memory edges
//!
//! Directed weighted edges between items. Undirected semantics for
//! co-activation are realized by storing both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relation maintained by the co-activation reinforcer
pub const CO_ACTIVATED: &str = "co-activated";

/// Relation from a reflection to the items it summarizes
pub const SUMMARIZES: &str = "summarizes";

/// A directed edge in the memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEdge {
    /// Source item id
    pub from: String,
    /// Target item id
    pub to: String,
    /// Opaque relation name (`co-activated`, `summarizes`, user-defined)
    pub relation: String,
    /// Strength in [0, 1]
    pub weight: f64,
    /// When the edge was created or last reinforced
    pub last_reinforced_at: DateTime<Utc>,
}

impl MemoryEdge {
    /// Create an edge with a clamped weight
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation: impl Into<String>,
        weight: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation: relation.into(),
            weight: super::clamp01(weight),
            last_reinforced_at: now,
        }
    }

    /// Whether this edge carries co-activation semantics
    pub fn is_coactivation(&self) -> bool {
        self.relation == CO_ACTIVATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_edge_clamps_weight() {
        let now = Utc::now();
        let edge = MemoryEdge::new("a", "b", "supports", 1.7, now);
        assert_eq!(edge.weight, 1.0);
        let edge = MemoryEdge::new("a", "b", CO_ACTIVATED, -0.2, now);
        assert_eq!(edge.weight, 0.0);
        assert!(edge.is_coactivation());
    }
}

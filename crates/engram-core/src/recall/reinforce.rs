//! Co-activation reinforcement
//!
//! During each recall, pairs over the returned top set are gated, ranked,
//! and capped, then written back as bidirectional `co-activated` edges.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::memory::{clamp01, MemoryEdge, MemoryState, CO_ACTIVATED};
use crate::text::{jaccard, tokenize};

/// Outcome counters for one reinforcement pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReinforceStats {
    /// Pairs whose edges were created
    pub created: usize,
    /// Pairs whose edges already existed and were strengthened
    pub reinforced: usize,
    /// Mean undirected weight across touched pairs, before
    pub avg_weight_before: f64,
    /// Mean undirected weight across touched pairs, after
    pub avg_weight_after: f64,
}

impl ReinforceStats {
    /// Average weight delta across touched pairs
    pub fn avg_delta(&self) -> f64 {
        self.avg_weight_after - self.avg_weight_before
    }
}

struct PairCandidate {
    a: usize,
    b: usize,
    existing_weight: f64,
    rank: f64,
}

/// Reinforce co-activation among the recalled top set
///
/// Gating: a pair qualifies only if the two items share a neighbor in the
/// existing co-activation subgraph, or their tag Jaccard is positive.
/// Ranking: `0.6·w_existing + 0.3·token_jaccard + 0.1·tag_jaccard`.
/// Caps: `top_k_per_node` selections per item, `max_pairs` total.
pub fn reinforce(
    state: &mut MemoryState,
    top_ids: &[String],
    delta: f64,
    max_pairs: usize,
    top_k_per_node: usize,
    now: DateTime<Utc>,
) -> ReinforceStats {
    let mut stats = ReinforceStats::default();
    if top_ids.len() < 2 || max_pairs == 0 || top_k_per_node == 0 {
        return stats;
    }

    // Token/tag views and the co-activation neighborhood, computed once
    let ids: Vec<&str> = top_ids
        .iter()
        .map(|s| s.as_str())
        .filter(|id| state.items.contains_key(*id))
        .collect();
    let tokens: Vec<Vec<String>> = ids
        .iter()
        .map(|id| tokenize(&state.items[*id].text))
        .collect();
    let tags: Vec<&[String]> = ids.iter().map(|id| state.items[*id].tags.as_slice()).collect();
    let neighbors = state.coactivation_neighbors(0.0);
    let existing = coactivation_weights(state);

    let mut candidates = Vec::new();
    for a in 0..ids.len() {
        for b in (a + 1)..ids.len() {
            let tag_jaccard = jaccard(
                tags[a].iter().map(|t| t.as_str()),
                tags[b].iter().map(|t| t.as_str()),
            );
            let shares_neighbor = match (neighbors.get(ids[a]), neighbors.get(ids[b])) {
                (Some(na), Some(nb)) => !na.is_disjoint(nb),
                _ => false,
            };
            if !shares_neighbor && tag_jaccard <= 0.0 {
                continue;
            }
            let existing_weight = existing
                .get(&ordered(ids[a], ids[b]))
                .copied()
                .unwrap_or(0.0);
            let token_jaccard = jaccard(
                tokens[a].iter().map(|t| t.as_str()),
                tokens[b].iter().map(|t| t.as_str()),
            );
            candidates.push(PairCandidate {
                a,
                b,
                existing_weight,
                rank: 0.6 * existing_weight + 0.3 * token_jaccard + 0.1 * tag_jaccard,
            });
        }
    }

    candidates.sort_by(|x, y| {
        y.rank
            .partial_cmp(&x.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut per_node: HashMap<usize, usize> = HashMap::new();
    let mut selected = Vec::new();
    for pair in candidates {
        if selected.len() >= max_pairs {
            break;
        }
        let ca = per_node.get(&pair.a).copied().unwrap_or(0);
        let cb = per_node.get(&pair.b).copied().unwrap_or(0);
        if ca >= top_k_per_node || cb >= top_k_per_node {
            continue;
        }
        *per_node.entry(pair.a).or_insert(0) += 1;
        *per_node.entry(pair.b).or_insert(0) += 1;
        selected.push(pair);
    }

    if selected.is_empty() {
        return stats;
    }

    let mut sum_before = 0.0;
    let mut sum_after = 0.0;
    for pair in &selected {
        let (from, to) = (ids[pair.a].to_string(), ids[pair.b].to_string());
        let after = clamp01(pair.existing_weight + delta);
        sum_before += pair.existing_weight;
        sum_after += after;
        if pair.existing_weight > 0.0 {
            stats.reinforced += 1;
        } else {
            stats.created += 1;
        }
        upsert_coactivation(state, &from, &to, after, now);
        upsert_coactivation(state, &to, &from, after, now);
    }
    stats.avg_weight_before = sum_before / selected.len() as f64;
    stats.avg_weight_after = sum_after / selected.len() as f64;
    stats
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn coactivation_weights(state: &MemoryState) -> HashMap<(String, String), f64> {
    let mut weights = HashMap::new();
    for edge in &state.edges {
        if edge.is_coactivation() {
            let key = ordered(&edge.from, &edge.to);
            let entry = weights.entry(key).or_insert(0.0);
            if edge.weight > *entry {
                *entry = edge.weight;
            }
        }
    }
    weights
}

fn upsert_coactivation(state: &mut MemoryState, from: &str, to: &str, weight: f64, now: DateTime<Utc>) {
    if let Some(edge) = state.find_edge_mut(from, to, CO_ACTIVATED) {
        edge.weight = weight;
        edge.last_reinforced_at = now;
    } else {
        state
            .edges
            .push(MemoryEdge::new(from, to, CO_ACTIVATED, weight, now));
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::graph::remember;
    use crate::memory::RememberInput;

    fn remember_tagged(state: &mut MemoryState, text: &str, tags: &[&str]) -> String {
        remember(
            state,
            RememberInput {
                text: text.to_string(),
                kind: None,
                importance: None,
                ttl: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                scope: None,
            },
            &SystemClock,
        )
        .unwrap()
        .id
    }

    #[test]
    fn test_caps_respected_with_tag_overlap() {
        // Ten items, all sharing a tag, no pre-existing edges: with a global
        // cap of 3 and one selection per node, exactly 3 pairs (6 directed
        // edges) are created.
        let mut state = MemoryState::new("w", Utc::now());
        let ids: Vec<String> = (0..10)
            .map(|i| remember_tagged(&mut state, &format!("item number {i}"), &["shared"]))
            .collect();
        let stats = reinforce(&mut state, &ids, 0.05, 3, 1, Utc::now());
        assert_eq!(stats.created, 3);
        assert_eq!(stats.reinforced, 0);
        assert_eq!(state.edges.len(), 6);
        state.validate_invariants().unwrap();
    }

    #[test]
    fn test_gating_blocks_unrelated_pairs() {
        let mut state = MemoryState::new("w", Utc::now());
        let a = remember_tagged(&mut state, "alpha topic", &["x"]);
        let b = remember_tagged(&mut state, "beta topic", &["y"]);
        let stats = reinforce(&mut state, &[a, b], 0.05, 12, 3, Utc::now());
        assert_eq!(stats.created + stats.reinforced, 0);
        assert!(state.edges.is_empty());
    }

    #[test]
    fn test_shared_neighbor_gate() {
        let mut state = MemoryState::new("w", Utc::now());
        let a = remember_tagged(&mut state, "alpha", &["x"]);
        let b = remember_tagged(&mut state, "beta", &["y"]);
        let hub = remember_tagged(&mut state, "hub", &["z"]);
        let now = Utc::now();
        for end in [&a, &b] {
            state
                .edges
                .push(MemoryEdge::new(end.clone(), hub.clone(), CO_ACTIVATED, 0.5, now));
        }
        let stats = reinforce(&mut state, &[a.clone(), b.clone()], 0.05, 12, 3, now);
        assert_eq!(stats.created, 1);
        assert!(state
            .edges
            .iter()
            .any(|e| e.from == a && e.to == b && e.is_coactivation()));
    }

    #[test]
    fn test_reinforce_adds_delta_clamped() {
        let mut state = MemoryState::new("w", Utc::now());
        let a = remember_tagged(&mut state, "alpha", &["shared"]);
        let b = remember_tagged(&mut state, "beta", &["shared"]);
        let now = Utc::now();
        state
            .edges
            .push(MemoryEdge::new(a.clone(), b.clone(), CO_ACTIVATED, 0.98, now));
        state
            .edges
            .push(MemoryEdge::new(b.clone(), a.clone(), CO_ACTIVATED, 0.98, now));

        let stats = reinforce(&mut state, &[a.clone(), b.clone()], 0.05, 12, 3, now);
        assert_eq!(stats.reinforced, 1);
        assert_eq!(stats.created, 0);
        let edge = state.find_edge_mut(&a, &b, CO_ACTIVATED).unwrap();
        assert_eq!(edge.weight, 1.0);
        assert!(stats.avg_delta() > 0.0);
    }

    #[test]
    fn test_pair_budget_bounds_writes() {
        let mut state = MemoryState::new("w", Utc::now());
        let ids: Vec<String> = (0..8)
            .map(|i| remember_tagged(&mut state, &format!("thing {i}"), &["t"]))
            .collect();
        let stats = reinforce(&mut state, &ids, 0.05, 5, 3, Utc::now());
        assert!(stats.created + stats.reinforced <= 5);
        assert_eq!(state.edges.len(), (stats.created + stats.reinforced) * 2);
    }
}

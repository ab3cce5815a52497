//! Consolidation
//!
//! Runs in a fixed order: TTL expiry, component discovery over strong
//! co-activation edges among old events, reflection summaries for large
//! components, then trimming each component down to its most recent
//! members.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{mint_id, Clock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::memory::{ItemKind, MemoryEdge, MemoryItem, MemoryState, SUMMARIZES};
use crate::text::top_keywords;

/// TTL expiry only fires below this energy
const EXPIRY_ENERGY_CEILING: f64 = 0.05;

/// Only events older than this take part in clustering
const CLUSTER_MIN_AGE_DAYS: i64 = 30;

/// Weight of the `summarizes` edges written for a reflection
const SUMMARY_EDGE_WEIGHT: f64 = 0.8;

/// Outcome of one consolidation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidateOutcome {
    /// Items removed by TTL expiry
    pub expired: usize,
    /// Components large enough to summarize
    pub clusters: usize,
    /// Ids of the reflection items created
    pub reflections: Vec<String>,
    /// Cluster members removed after summarization
    pub removed: usize,
}

/// Keyword + snippet summary over a set of items
///
/// Term weight follows the manifest convention:
/// `accessCount + 1 + recency + 0.5·importance`.
pub fn build_summary(
    items: &[&MemoryItem],
    top_n: usize,
    max_snippets: usize,
    now: DateTime<Utc>,
) -> String {
    let weighted = items.iter().map(|item| {
        let recency =
            (-(std::f64::consts::LN_2) * item.recency_ms(now) as f64 / (7.0 * 86_400_000.0)).exp();
        (
            item.text.as_str(),
            item.access_count as f64 + 1.0 + recency + 0.5 * item.importance,
        )
    });
    let keywords = top_keywords(weighted, top_n);

    let mut by_recency: Vec<&&MemoryItem> = items.iter().collect();
    by_recency.sort_by_key(|i| std::cmp::Reverse(i.created_at));
    let snippets: Vec<String> = by_recency
        .iter()
        .take(max_snippets)
        .map(|i| snippet(&i.text))
        .collect();

    format!(
        "Consolidated {} memories around: {}. Highlights: {}",
        items.len(),
        keywords.join(", "),
        snippets.join(" | ")
    )
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 80 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(77).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Run one consolidation pass
pub fn consolidate(
    state: &mut MemoryState,
    config: &EngineConfig,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<ConsolidateOutcome> {
    let now = clock.now();
    let mut outcome = ConsolidateOutcome::default();

    // 1. TTL expiry: elapsed lifetime and nearly no energy left
    let expired: Vec<String> = state
        .items
        .values()
        .filter(|i| i.ttl_elapsed(now) && i.energy < EXPIRY_ENERGY_CEILING)
        .map(|i| i.id.clone())
        .collect();
    for id in &expired {
        state.remove_item(id);
    }
    outcome.expired = expired.len();

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    // 2. Components over strong co-activation edges among old events
    let cutoff = now - Duration::days(CLUSTER_MIN_AGE_DAYS);
    let eligible: HashSet<&str> = state
        .items
        .values()
        .filter(|i| i.kind == ItemKind::Event && i.created_at < cutoff)
        .map(|i| i.id.as_str())
        .collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &state.edges {
        if edge.is_coactivation()
            && edge.weight >= config.cluster_edge_min_weight
            && eligible.contains(edge.from.as_str())
            && eligible.contains(edge.to.as_str())
        {
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
    }
    let components = connected_components(&eligible, &adjacency);

    // 3 + 4. Summarize large components and trim them to the freshest members
    let mut to_remove: Vec<String> = Vec::new();
    let mut reflections: Vec<(MemoryItem, Vec<String>)> = Vec::new();
    for component in components {
        if component.len() < config.cluster_min_size {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        outcome.clusters += 1;

        let mut members: Vec<&MemoryItem> =
            component.iter().map(|id| &state.items[*id]).collect();
        members.sort_by_key(|i| std::cmp::Reverse(i.created_at));
        let kept: Vec<String> = members
            .iter()
            .take(config.cluster_keep_recent)
            .map(|i| i.id.clone())
            .collect();
        let dropped: Vec<String> = members
            .iter()
            .skip(config.cluster_keep_recent)
            .map(|i| i.id.clone())
            .collect();

        let text = build_summary(
            &members,
            config.summarize_top_keywords,
            config.summarize_max_snippets,
            now,
        );
        let tags = top_keywords(
            members.iter().map(|i| (i.text.as_str(), 1.0)),
            3,
        );
        let reflection = MemoryItem {
            id: mint_id(clock),
            kind: ItemKind::Reflection,
            text,
            tags,
            importance: 0.6,
            energy: 1.0,
            ttl: None,
            scope: String::new(),
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            access_count: 0,
            success: 0,
            fail: 0,
        };
        reflections.push((reflection, kept));
        to_remove.extend(dropped);
    }

    for (reflection, kept) in reflections {
        let reflection_id = reflection.id.clone();
        state.insert_item(reflection)?;
        for member in &kept {
            state.edges.push(MemoryEdge::new(
                reflection_id.clone(),
                member.clone(),
                SUMMARIZES,
                SUMMARY_EDGE_WEIGHT,
                now,
            ));
            state.edges.push(MemoryEdge::new(
                member.clone(),
                reflection_id.clone(),
                SUMMARIZES,
                SUMMARY_EDGE_WEIGHT,
                now,
            ));
        }
        outcome.reflections.push(reflection_id);
    }
    for id in &to_remove {
        state.remove_item(id);
    }
    outcome.removed = to_remove.len();

    state.recompute_energy();
    if outcome.expired > 0 || outcome.clusters > 0 {
        info!(
            expired = outcome.expired,
            clusters = outcome.clusters,
            removed = outcome.removed,
            "consolidation pass"
        );
    }
    Ok(outcome)
}

fn connected_components<'a>(
    nodes: &HashSet<&'a str>,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
) -> Vec<Vec<&'a str>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut components = Vec::new();
    // BTreeMap-backed iteration keeps discovery order deterministic
    let mut ordered: Vec<&&str> = nodes.iter().collect();
    ordered.sort();
    for start in ordered {
        if visited.contains(*start) {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![*start];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            component.push(node);
            if let Some(nexts) = adjacency.get(node) {
                stack.extend(nexts.iter().copied());
            }
        }
        component.sort();
        components.push(component);
    }
    components
}

// ============================================================================
// TESTS
// ============================================================================

//! Canonical snapshot format
//!
//! The authoritative human-inspectable serialization of the memory state: a
//! single symbolic expression. Round-trips losslessly over the non-derived
//! fields. Beyond the core sections, snapshots carry `(sessions ...)` and
//! `(versions ...)` lists so feedback attribution survives restarts.

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::memory::{
    HistoryEntry, ItemKind, MemoryEdge, MemoryItem, MemoryState, RecallSession,
    SNAPSHOT_HISTORY_CAP,
};
use crate::policy::{Policy, PolicyVersion};
use crate::sexpr::Sexp;

fn ms(t: DateTime<Utc>) -> Sexp {
    Sexp::Num(t.timestamp_millis() as f64)
}

fn str_list(items: &[String]) -> Sexp {
    let mut list = vec![Sexp::sym("list")];
    list.extend(items.iter().map(Sexp::str));
    Sexp::List(list)
}

// ============================================================================
// WRITER
// ============================================================================

/// Render the canonical snapshot text
pub fn write_snapshot(state: &MemoryState) -> String {
    let mut out = String::from("(memory\n");
    out.push_str(&format!("  (id {})\n", Sexp::str(&state.workspace_id)));
    out.push_str(&format!("  (born {})\n", ms(state.born)));
    out.push_str(&format!("  (energy {})\n", Sexp::Num(state.energy)));
    out.push_str(&format!("  (threshold {})\n", Sexp::Num(state.threshold)));

    out.push_str("  (policy");
    for (key, value) in policy_slots(&state.policy) {
        out.push_str(&format!(" ({} {})", key, value));
    }
    out.push_str(")\n");

    out.push_str("  (items (list");
    for item in state.items.values() {
        out.push_str("\n    ");
        out.push_str(&item_map(item).to_string());
    }
    out.push_str("))\n");

    out.push_str("  (edges (list");
    for edge in &state.edges {
        out.push_str("\n    ");
        out.push_str(&edge_map(edge).to_string());
    }
    out.push_str("))\n");

    out.push_str("  (history (list");
    let skip = state.history.len().saturating_sub(SNAPSHOT_HISTORY_CAP);
    for entry in state.history.iter().skip(skip) {
        out.push_str("\n    ");
        out.push_str(&history_map(entry).to_string());
    }
    out.push_str("))\n");

    out.push_str("  (sessions (list");
    for session in &state.sessions {
        out.push_str("\n    ");
        out.push_str(&session_map(session).to_string());
    }
    out.push_str("))\n");

    out.push_str("  (versions (list");
    for version in &state.policy_versions {
        out.push_str("\n    ");
        out.push_str(&version_map(version).to_string());
    }
    out.push_str(")))\n");
    out
}

fn policy_slots(policy: &Policy) -> Vec<(&'static str, Sexp)> {
    let mut slots = Vec::new();
    if let Some(src) = &policy.decay_fn {
        slots.push(("decayFn", Sexp::str(src)));
    }
    if let Some(src) = &policy.recall_score_fn {
        slots.push(("recallScoreFn", Sexp::str(src)));
    }
    if !policy.recall_score_fns.is_empty() {
        slots.push(("recallScoreFns", str_list(&policy.recall_score_fns)));
    }
    if let Some(src) = &policy.recall_combiner_fn {
        slots.push(("recallCombinerFn", Sexp::str(src)));
    }
    if let Some(src) = &policy.exploration_fn {
        slots.push(("explorationFn", Sexp::str(src)));
    }
    if let Some(src) = &policy.policy_generator_fn {
        slots.push(("policyGeneratorFn", Sexp::str(src)));
    }
    slots
}

fn item_map(item: &MemoryItem) -> Sexp {
    let mut entries = vec![
        ("id".to_string(), Sexp::str(&item.id)),
        ("type".to_string(), Sexp::str(item.kind.as_str())),
        ("text".to_string(), Sexp::str(&item.text)),
        ("tags".to_string(), str_list(&item.tags)),
        ("importance".to_string(), Sexp::Num(item.importance)),
        ("energy".to_string(), Sexp::Num(item.energy)),
    ];
    if let Some(ttl) = &item.ttl {
        entries.push(("ttl".to_string(), Sexp::str(ttl)));
    }
    if !item.scope.is_empty() {
        entries.push(("scope".to_string(), Sexp::str(&item.scope)));
    }
    entries.push(("createdAt".to_string(), ms(item.created_at)));
    entries.push(("updatedAt".to_string(), ms(item.updated_at)));
    if let Some(t) = item.last_accessed_at {
        entries.push(("lastAccessedAt".to_string(), ms(t)));
    }
    entries.push(("accessCount".to_string(), Sexp::Num(item.access_count as f64)));
    entries.push(("success".to_string(), Sexp::Num(item.success as f64)));
    entries.push(("fail".to_string(), Sexp::Num(item.fail as f64)));
    Sexp::Map(entries)
}

fn edge_map(edge: &MemoryEdge) -> Sexp {
    Sexp::Map(vec![
        ("from".to_string(), Sexp::str(&edge.from)),
        ("to".to_string(), Sexp::str(&edge.to)),
        ("relation".to_string(), Sexp::str(&edge.relation)),
        ("weight".to_string(), Sexp::Num(edge.weight)),
        ("lastReinforcedAt".to_string(), ms(edge.last_reinforced_at)),
    ])
}

fn history_map(entry: &HistoryEntry) -> Sexp {
    let mut entries = vec![
        ("t".to_string(), ms(entry.t)),
        ("op".to_string(), Sexp::str(&entry.op)),
    ];
    if let Some(detail) = &entry.detail {
        entries.push(("detail".to_string(), Sexp::str(detail)));
    }
    Sexp::Map(entries)
}

fn session_map(session: &RecallSession) -> Sexp {
    Sexp::Map(vec![
        ("t".to_string(), ms(session.t)),
        ("items".to_string(), str_list(&session.items)),
        ("policyIds".to_string(), str_list(&session.policy_ids)),
        ("query".to_string(), Sexp::str(&session.query)),
        ("energy".to_string(), Sexp::Num(session.energy)),
        ("hour".to_string(), Sexp::Num(session.hour as f64)),
    ])
}

fn version_map(version: &PolicyVersion) -> Sexp {
    Sexp::Map(vec![
        ("id".to_string(), Sexp::str(&version.id)),
        ("name".to_string(), Sexp::str(&version.name)),
        ("source".to_string(), Sexp::str(&version.source)),
        ("createdAt".to_string(), ms(version.created_at)),
        ("success".to_string(), Sexp::Num(version.success as f64)),
        ("fail".to_string(), Sexp::Num(version.fail as f64)),
    ])
}

// ============================================================================
// PARSER
// ============================================================================

fn corrupt(message: impl Into<String>) -> EngineError {
    EngineError::Storage(format!("corrupt snapshot: {}", message.into()))
}

fn get_str(map: &Sexp, key: &str) -> Result<String> {
    map.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| corrupt(format!("missing string :{}", key)))
}

fn get_num(map: &Sexp, key: &str) -> Result<f64> {
    map.get(key)
        .and_then(|v| v.as_num())
        .ok_or_else(|| corrupt(format!("missing number :{}", key)))
}

fn get_time(map: &Sexp, key: &str) -> Result<DateTime<Utc>> {
    from_ms(get_num(map, key)?)
}

fn from_ms(n: f64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(n as i64)
        .single()
        .ok_or_else(|| corrupt(format!("bad timestamp {}", n)))
}

fn get_str_list(map: &Sexp, key: &str) -> Result<Vec<String>> {
    let Some(value) = map.get(key) else {
        return Ok(Vec::new());
    };
    parse_str_list(value)
}

fn parse_str_list(value: &Sexp) -> Result<Vec<String>> {
    let items = value
        .as_list()
        .filter(|l| l.first().and_then(|h| h.as_sym()) == Some("list"))
        .ok_or_else(|| corrupt("expected (list ...)"))?;
    items[1..]
        .iter()
        .map(|s| {
            s.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| corrupt("expected string in list"))
        })
        .collect()
}

/// Parse a snapshot back into a state
///
/// Unknown sections and map keys are ignored; dangling edges are dropped
/// with a warning so the endpoint invariant holds after load.
pub fn parse_snapshot(text: &str) -> Result<MemoryState> {
    let root = crate::sexpr::parse(text).map_err(|e| corrupt(e.to_string()))?;
    let sections = root
        .as_list()
        .filter(|l| l.first().and_then(|h| h.as_sym()) == Some("memory"))
        .ok_or_else(|| corrupt("expected (memory ...)"))?;

    let mut state = MemoryState::new("default", Utc::now());

    for section in &sections[1..] {
        let Some(parts) = section.as_list() else {
            return Err(corrupt("expected (section ...)"));
        };
        let Some(name) = parts.first().and_then(|h| h.as_sym()) else {
            return Err(corrupt("section without a name"));
        };
        match name {
            "id" => {
                state.workspace_id = parts
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| corrupt("(id ...) needs a string"))?
                    .to_string();
            }
            "born" => {
                state.born = from_ms(
                    parts
                        .get(1)
                        .and_then(|v| v.as_num())
                        .ok_or_else(|| corrupt("(born ...) needs a number"))?,
                )?;
            }
            "energy" => {
                state.energy = parts
                    .get(1)
                    .and_then(|v| v.as_num())
                    .ok_or_else(|| corrupt("(energy ...) needs a number"))?;
            }
            "threshold" => {
                state.threshold = parts
                    .get(1)
                    .and_then(|v| v.as_num())
                    .ok_or_else(|| corrupt("(threshold ...) needs a number"))?;
            }
            "policy" => state.policy = parse_policy(&parts[1..])?,
            "items" => {
                for map in section_maps(parts)? {
                    let item = parse_item(map)?;
                    state.items.insert(item.id.clone(), item);
                }
            }
            "edges" => {
                for map in section_maps(parts)? {
                    state.edges.push(parse_edge(map)?);
                }
            }
            "history" => {
                for map in section_maps(parts)? {
                    state.history.push(HistoryEntry {
                        t: get_time(map, "t")?,
                        op: get_str(map, "op")?,
                        detail: map.get("detail").and_then(|v| v.as_str()).map(String::from),
                    });
                }
            }
            "sessions" => {
                for map in section_maps(parts)? {
                    state.sessions.push(RecallSession {
                        t: get_time(map, "t")?,
                        items: get_str_list(map, "items")?,
                        policy_ids: get_str_list(map, "policyIds")?,
                        query: get_str(map, "query")?,
                        energy: get_num(map, "energy")?,
                        hour: get_num(map, "hour")? as u32,
                    });
                }
            }
            "versions" => {
                for map in section_maps(parts)? {
                    state.policy_versions.push(PolicyVersion {
                        id: get_str(map, "id")?,
                        name: get_str(map, "name")?,
                        source: get_str(map, "source")?,
                        created_at: get_time(map, "createdAt")?,
                        success: get_num(map, "success")? as u32,
                        fail: get_num(map, "fail")? as u32,
                    });
                }
            }
            _ => {} // forward compatibility
        }
    }

    let dangling = state.edges.len();
    state
        .edges
        .retain(|e| state.items.contains_key(&e.from) && state.items.contains_key(&e.to));
    let dropped = dangling - state.edges.len();
    if dropped > 0 {
        warn!(dropped, "dropped dangling edges while loading snapshot");
    }
    Ok(state)
}

fn section_maps(parts: &[Sexp]) -> Result<impl Iterator<Item = &Sexp>> {
    let list = parts
        .get(1)
        .and_then(|v| v.as_list())
        .filter(|l| l.first().and_then(|h| h.as_sym()) == Some("list"))
        .ok_or_else(|| corrupt("expected (list ...) in section"))?;
    Ok(list[1..].iter())
}

fn parse_policy(parts: &[Sexp]) -> Result<Policy> {
    let mut policy = Policy::default();
    for slot in parts {
        let Some(pair) = slot.as_list() else {
            return Err(corrupt("policy slot must be (name value)"));
        };
        let name = pair
            .first()
            .and_then(|h| h.as_sym())
            .ok_or_else(|| corrupt("policy slot without a name"))?;
        let value = pair.get(1).ok_or_else(|| corrupt("policy slot without a value"))?;
        match name {
            "decayFn" => policy.decay_fn = value.as_str().map(String::from),
            "recallScoreFn" => policy.recall_score_fn = value.as_str().map(String::from),
            "recallScoreFns" => policy.recall_score_fns = parse_str_list(value)?,
            "recallCombinerFn" => policy.recall_combiner_fn = value.as_str().map(String::from),
            "explorationFn" => policy.exploration_fn = value.as_str().map(String::from),
            "policyGeneratorFn" => policy.policy_generator_fn = value.as_str().map(String::from),
            _ => {}
        }
    }
    Ok(policy)
}

fn parse_item(map: &Sexp) -> Result<MemoryItem> {
    Ok(MemoryItem {
        id: get_str(map, "id")?,
        kind: ItemKind::parse_name(&get_str(map, "type")?),
        text: get_str(map, "text")?,
        tags: get_str_list(map, "tags")?,
        importance: get_num(map, "importance")?,
        energy: get_num(map, "energy")?,
        ttl: map.get("ttl").and_then(|v| v.as_str()).map(String::from),
        scope: map
            .get("scope")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        created_at: get_time(map, "createdAt")?,
        updated_at: get_time(map, "updatedAt")?,
        last_accessed_at: match map.get("lastAccessedAt") {
            Some(v) => Some(from_ms(v.as_num().ok_or_else(|| corrupt("bad lastAccessedAt"))?)?),
            None => None,
        },
        access_count: map.get("accessCount").and_then(|v| v.as_num()).unwrap_or(0.0) as u32,
        success: map.get("success").and_then(|v| v.as_num()).unwrap_or(0.0) as u32,
        fail: map.get("fail").and_then(|v| v.as_num()).unwrap_or(0.0) as u32,
    })
}

fn parse_edge(map: &Sexp) -> Result<MemoryEdge> {
    Ok(MemoryEdge {
        from: get_str(map, "from")?,
        to: get_str(map, "to")?,
        relation: get_str(map, "relation")?,
        weight: get_num(map, "weight")?,
        last_reinforced_at: get_time(map, "lastReinforcedAt")?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

//! Query surface
//!
//! The stable named operations consumed by an external dispatcher. Each
//! operation deserializes its arguments into a strict input struct
//! (`deny_unknown_fields`), calls the engine, and returns a JSON value.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::engine::MemoryEngine;
use crate::error::{EngineError, Result};
use crate::memory::RememberInput;
use crate::policy::Policy;

fn parse_args<T: serde::de::DeserializeOwned>(args: Option<Value>) -> Result<T> {
    let value = args.unwrap_or_else(|| json!({}));
    serde_json::from_value(value)
        .map_err(|e| EngineError::Validation(format!("invalid arguments: {}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RecallArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AssociateArgs {
    from: String,
    to: String,
    relation: String,
    weight: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TraceArgs {
    start: String,
    #[serde(default)]
    depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FeedbackArgs {
    id: String,
    outcome: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DecayArgs {
    #[serde(default)]
    half_life_days: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SummarizeArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ActivateArgs {
    seeds: HashMap<String, f64>,
    #[serde(default)]
    steps: Option<u32>,
    #[serde(default)]
    decay: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetPolicyFnArgs {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CodeArgs {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScorersArgs {
    sources: Vec<String>,
}

/// Dispatch one named operation
pub fn dispatch(engine: &MemoryEngine, op: &str, args: Option<Value>) -> Result<Value> {
    dispatch_with_cancel(engine, op, args, &CancellationToken::new())
}

/// Dispatch one named operation under a cancellation token
pub fn dispatch_with_cancel(
    engine: &MemoryEngine,
    op: &str,
    args: Option<Value>,
    cancel: &CancellationToken,
) -> Result<Value> {
    match op {
        "remember" => {
            let input: RememberInput = parse_args(args)?;
            let item = engine.remember(input)?;
            Ok(serde_json::to_value(item).map_err(|e| EngineError::Serialization(e.to_string()))?)
        }
        "get-item" => {
            let args: IdArgs = parse_args(args)?;
            let item = engine.get_item(&args.id)?;
            Ok(serde_json::to_value(item).map_err(|e| EngineError::Serialization(e.to_string()))?)
        }
        "recall" => {
            let args: RecallArgs = parse_args(args)?;
            let results = engine.recall(
                &args.query,
                args.limit.unwrap_or(10).clamp(1, 100),
                args.scope.as_deref().unwrap_or(""),
                cancel,
            )?;
            Ok(json!({
                "query": args.query,
                "total": results.len(),
                "results": results,
            }))
        }
        "search" => {
            let args: RecallArgs = parse_args(args)?;
            let hits = engine.search(
                &args.query,
                args.limit.unwrap_or(10).clamp(1, 100),
                args.scope.as_deref().unwrap_or(""),
            )?;
            Ok(json!(hits
                .into_iter()
                .map(|(id, rank)| json!({"id": id, "rank": rank}))
                .collect::<Vec<_>>()))
        }
        "associate" => {
            let args: AssociateArgs = parse_args(args)?;
            let outcome = engine.associate(&args.from, &args.to, &args.relation, args.weight)?;
            Ok(json!({"created": outcome.created, "weight": outcome.weight}))
        }
        "trace" => {
            let args: TraceArgs = parse_args(args)?;
            let paths = engine.trace(&args.start, args.depth.unwrap_or(3))?;
            Ok(json!({"paths": paths}))
        }
        "feedback" => {
            let args: FeedbackArgs = parse_args(args)?;
            let success = match args.outcome.as_str() {
                "success" => true,
                "fail" | "failure" => false,
                other => {
                    return Err(EngineError::Validation(format!(
                        "outcome '{}' must be success or fail",
                        other
                    )))
                }
            };
            engine.feedback(&args.id, success)?;
            Ok(json!({"ok": true}))
        }
        "decay!" => {
            let args: DecayArgs = parse_args(args)?;
            let outcome = engine.decay(args.half_life_days, cancel)?;
            Ok(json!({
                "decayedItems": outcome.decayed_items,
                "prunedEdges": outcome.pruned_edges,
            }))
        }
        "consolidate" => {
            let _: Value = args.unwrap_or_else(|| json!({}));
            let outcome = engine.consolidate(cancel)?;
            Ok(json!({
                "expired": outcome.expired,
                "clusters": outcome.clusters,
                "reflections": outcome.reflections,
                "removed": outcome.removed,
            }))
        }
        "summarize" => {
            let args: SummarizeArgs = parse_args(args)?;
            let summary =
                engine.summarize(args.query.as_deref(), args.scope.as_deref().unwrap_or(""));
            Ok(json!({"summary": summary}))
        }
        "activate" => {
            let args: ActivateArgs = parse_args(args)?;
            let config = engine.config();
            let map = engine.activate(
                &args.seeds,
                args.steps.unwrap_or(config.activation_steps),
                args.decay.unwrap_or(config.activation_decay),
                args.threshold.unwrap_or(config.activation_threshold),
                cancel,
            )?;
            Ok(json!(map))
        }
        "stats" => Ok(serde_json::to_value(engine.stats())
            .map_err(|e| EngineError::Serialization(e.to_string()))?),
        "snapshot" => Ok(json!({"snapshot": engine.snapshot()?})),
        "get-policy" => Ok(serde_json::to_value(engine.get_policy())
            .map_err(|e| EngineError::Serialization(e.to_string()))?),
        "set-policy" => {
            let policy: Policy = parse_args(args)?;
            engine.set_policy(policy)?;
            Ok(json!({"ok": true}))
        }
        "get-policy-fn" => {
            let args: NameArgs = parse_args(args)?;
            let source = engine.get_policy_fn(&args.name)?;
            Ok(json!({"name": args.name, "source": source}))
        }
        "set-policy-fn" => {
            let args: SetPolicyFnArgs = parse_args(args)?;
            let version = engine.set_policy_fn(&args.name, &args.code)?;
            Ok(serde_json::to_value(version)
                .map_err(|e| EngineError::Serialization(e.to_string()))?)
        }
        "list-policy-versions" => Ok(serde_json::to_value(engine.list_policy_versions())
            .map_err(|e| EngineError::Serialization(e.to_string()))?),
        "set-recall-scorers" => {
            let args: ScorersArgs = parse_args(args)?;
            engine.set_recall_scorers(args.sources)?;
            Ok(json!({"ok": true}))
        }
        "set-policy-fn-generator" => {
            let args: CodeArgs = parse_args(args)?;
            let version = engine.set_policy_generator(&args.code)?;
            Ok(serde_json::to_value(version)
                .map_err(|e| EngineError::Serialization(e.to_string()))?)
        }
        "adapt-policy" => {
            let _: Value = args.unwrap_or_else(|| json!({}));
            let generated = engine.adapt_policy()?;
            Ok(json!({"generated": generated}))
        }
        "find-convergent-patterns" => {
            Ok(serde_json::to_value(engine.find_convergent_patterns())
                .map_err(|e| EngineError::Serialization(e.to_string()))?)
        }
        other => Err(EngineError::NotFound(format!("operation '{}'", other))),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::store::FileStore;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine() -> (MemoryEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Box::new(FileStore::new(dir.path().join("engram.mem")));
        let engine = MemoryEngine::with_parts(
            EngineConfig::default(),
            store,
            Arc::new(ManualClock::new(Utc::now())),
        )
        .unwrap();
        engine.reseed(7);
        (engine, dir)
    }

    #[test]
    fn test_remember_and_recall_ops() {
        let (engine, _dir) = engine();
        let item = dispatch(
            &engine,
            "remember",
            Some(json!({
                "text": "Spreading activation models associative memory",
                "kind": "insight",
                "importance": 0.8,
                "ttl": "30d",
                "tags": ["memory", "cognition"],
            })),
        )
        .unwrap();
        let id = item["id"].as_str().unwrap().to_string();
        assert!(crate::clock::is_valid_id(&id));

        let out = dispatch(&engine, "recall", Some(json!({"query": "memory", "limit": 5})))
            .unwrap();
        assert_eq!(out["total"], 1);
        assert_eq!(out["results"][0]["item"]["id"], json!(id));
    }

    #[test]
    fn test_unknown_operation() {
        let (engine, _dir) = engine();
        assert!(matches!(
            dispatch(&engine, "transmogrify", None),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let (engine, _dir) = engine();
        let err = dispatch(
            &engine,
            "remember",
            Some(json!({"text": "x", "sneaky": true})),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_associate_then_activate_op() {
        let (engine, _dir) = engine();
        let a = dispatch(&engine, "remember", Some(json!({"text": "node alpha"}))).unwrap();
        let b = dispatch(&engine, "remember", Some(json!({"text": "node beta"}))).unwrap();
        let a = a["id"].as_str().unwrap();
        let b = b["id"].as_str().unwrap();

        dispatch(
            &engine,
            "associate",
            Some(json!({"from": a, "to": b, "relation": "supports", "weight": 0.6})),
        )
        .unwrap();

        let seeds = HashMap::from([(a.to_string(), 1.0)]);
        let out = dispatch(
            &engine,
            "activate",
            Some(json!({"seeds": seeds, "steps": 1, "decay": 0.8, "threshold": 0.0})),
        )
        .unwrap();
        let activation = out[b].as_f64().unwrap();
        assert!((activation - 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_feedback_outcome_validation() {
        let (engine, _dir) = engine();
        let item = dispatch(&engine, "remember", Some(json!({"text": "judged"}))).unwrap();
        let id = item["id"].as_str().unwrap();
        assert!(dispatch(
            &engine,
            "feedback",
            Some(json!({"id": id, "outcome": "meh"}))
        )
        .is_err());
        dispatch(
            &engine,
            "feedback",
            Some(json!({"id": id, "outcome": "success"})),
        )
        .unwrap();
    }

    #[test]
    fn test_policy_ops_round_trip() {
        let (engine, _dir) = engine();
        let src = "(lambda (a r i ac s f h d) a)";
        dispatch(
            &engine,
            "set-policy-fn",
            Some(json!({"name": "recall-score", "code": src})),
        )
        .unwrap();
        let out = dispatch(&engine, "get-policy-fn", Some(json!({"name": "recall-score"})))
            .unwrap();
        assert_eq!(out["source"], json!(src));
        let versions = dispatch(&engine, "list-policy-versions", None).unwrap();
        assert_eq!(versions.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_stats_and_snapshot_ops() {
        let (engine, _dir) = engine();
        dispatch(&engine, "remember", Some(json!({"text": "counted"}))).unwrap();
        let stats = dispatch(&engine, "stats", None).unwrap();
        assert_eq!(stats["items"], 1);
        let snapshot = dispatch(&engine, "snapshot", None).unwrap();
        assert!(snapshot["snapshot"].as_str().unwrap().starts_with("(memory"));
    }
}

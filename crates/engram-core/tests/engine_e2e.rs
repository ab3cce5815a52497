//! End-to-end scenarios over the full engine

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use engram_core::{
    dispatch, BackendKind, EngineConfig, FileStore, ItemKind, ManualClock, MemoryEngine,
    RememberInput, SqliteStore,
};

fn engine_with(config: EngineConfig) -> (MemoryEngine, Arc<ManualClock>, TempDir) {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Box::new(FileStore::new(dir.path().join("engram.mem")));
    let engine = MemoryEngine::with_parts(config, store, clock.clone()).unwrap();
    engine.reseed(1234);
    (engine, clock, dir)
}

fn engine() -> (MemoryEngine, Arc<ManualClock>, TempDir) {
    engine_with(EngineConfig::default())
}

fn remember(engine: &MemoryEngine, text: &str, tags: &[&str]) -> String {
    engine
        .remember(RememberInput {
            text: text.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
        .id
}

// ============================================================================
// SCENARIO 1: remember then recall
// ============================================================================

#[test]
fn remember_then_recall() {
    let (engine, _clock, _dir) = engine();
    let item = engine
        .remember(RememberInput {
            text: "Spreading activation models associative memory".to_string(),
            kind: Some("insight".to_string()),
            importance: Some(0.8),
            ttl: Some("30d".to_string()),
            tags: vec!["memory".to_string(), "cognition".to_string()],
            scope: None,
        })
        .unwrap();

    // m_<timestamp36>_<hex8>
    let mut parts = item.id.splitn(3, '_');
    assert_eq!(parts.next(), Some("m"));
    let ts = parts.next().unwrap();
    assert!(!ts.is_empty() && ts.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    let suffix = parts.next().unwrap();
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    let results = engine
        .recall("memory", 5, "", &CancellationToken::new())
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].item.id, item.id);
    assert!(results[0].score >= 0.0);
    assert_eq!(results[0].item.access_count, 1);
}

// ============================================================================
// SCENARIO 2: associate then activate
// ============================================================================

#[test]
fn associate_then_activate() {
    let (engine, _clock, _dir) = engine();
    let a = remember(&engine, "node alpha", &[]);
    let b = remember(&engine, "node beta", &[]);
    engine.associate(&a, &b, "supports", 0.6).unwrap();

    let seeds: HashMap<String, f64> = HashMap::from([(a.clone(), 1.0)]);
    let out = engine
        .activate(&seeds, 1, 0.8, 0.0, &CancellationToken::new())
        .unwrap();
    assert!((out[&b] - 0.48).abs() < 1e-12);
}

// ============================================================================
// SCENARIO 3: decay stability
// ============================================================================

#[test]
fn decay_stability() {
    let (engine, clock, _dir) = engine();
    let id = remember(&engine, "single fading memory", &[]);

    engine.decay(Some(7.0), &CancellationToken::new()).unwrap();
    clock.advance(Duration::days(7));
    engine.decay(Some(7.0), &CancellationToken::new()).unwrap();

    let item = engine.get_item(&id).unwrap();
    // Access bookkeeping lifts energy by 0.1 after the read
    assert!((item.energy - 0.35).abs() < 1e-9);

    let stats = engine.stats();
    assert!(stats.items >= 1);

    let snapshot = engine.snapshot().unwrap();
    let decay_lines: Vec<&str> = snapshot
        .lines()
        .filter(|l| l.contains(":op \"decay\""))
        .collect();
    assert_eq!(decay_lines.len(), 2);
    assert!(decay_lines.iter().all(|l| l.contains("decayedItems=1")));
}

// ============================================================================
// SCENARIO 4: co-activation caps
// ============================================================================

#[test]
fn coactivation_caps() {
    let config = EngineConfig {
        max_pairs_per_recall: 3,
        coact_top_k_per_node: 1,
        exploration_epsilon: 0.0,
        ..EngineConfig::default()
    };
    let (engine, _clock, _dir) = engine_with(config);
    for i in 0..10 {
        remember(&engine, &format!("shared topic note {i}"), &["shared"]);
    }
    let results = engine
        .recall("shared topic", 10, "", &CancellationToken::new())
        .unwrap();
    assert_eq!(results.len(), 10);

    let stats = engine.stats();
    // Exactly 3 pairs, stored as 6 directed edges
    assert_eq!(stats.edges, 6);
}

// ============================================================================
// SCENARIO 5: policy versioning and attribution
// ============================================================================

#[test]
fn policy_versioning_attribution() {
    let (engine, _clock, _dir) = engine();
    let src1 = "(lambda (a r i ac s f h d) (+ (* 0.7 a) (* 0.3 r)))";
    let src2 = "(lambda (a r i ac s f h d) (+ (* 0.5 a) (* 0.5 i)))";

    engine.set_policy_fn("recall-score", src1).unwrap();
    engine.set_policy_fn("recall-score", src2).unwrap();

    let versions = engine.list_policy_versions();
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().any(|v| v.source == src1));
    assert!(versions.iter().any(|v| v.source == src2));

    let id = remember(&engine, "fact under policy two", &["policy"]);
    engine
        .recall("policy fact", 5, "", &CancellationToken::new())
        .unwrap();
    engine.feedback(&id, true).unwrap();
    engine.feedback(&id, false).unwrap();

    let versions = engine.list_policy_versions();
    let v1 = versions.iter().find(|v| v.source == src1).unwrap();
    let v2 = versions.iter().find(|v| v.source == src2).unwrap();
    assert_eq!((v1.success, v1.fail), (0, 0));
    assert_eq!((v2.success, v2.fail), (1, 1));
}

// ============================================================================
// SCENARIO 6: manifest shape
// ============================================================================

#[test]
fn manifest_shape() {
    let (engine, _clock, _dir) = engine_with(EngineConfig {
        cluster_percentile: 0.0,
        ..EngineConfig::default()
    });
    let texts: [(&str, &str); 8] = [
        ("cache eviction policy tuned for hot keys", "storage"),
        ("cache warmup script for the storage tier", "storage"),
        ("storage compaction stalls under heavy cache load", "storage"),
        ("deploy pipeline gained a canary stage", "deploys"),
        ("rollback procedure for a broken deploy", "deploys"),
        ("deploy freeze during the incident review", "deploys"),
        ("onboarding checklist for new teammates", "people"),
        ("onboarding buddy rotation schedule", "people"),
    ];
    let ids: Vec<String> = texts
        .iter()
        .map(|(text, tag)| remember(&engine, text, &[tag]))
        .collect();
    for group in [&ids[0..3], &ids[3..6], &ids[6..8]] {
        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                engine
                    .associate(&group[i], &group[j], "co-activated", 0.6)
                    .unwrap();
                engine
                    .associate(&group[j], &group[i], "co-activated", 0.6)
                    .unwrap();
            }
        }
    }

    let manifest = engine.manifest(&CancellationToken::new()).unwrap();
    assert!(manifest.contains("Themes:"));
    assert!(manifest.contains("Graph:"));
    assert!(manifest.contains("  1. "));
    assert!(manifest.contains("  2. "));
    assert!(manifest.contains("  3. "));
    for forbidden in ["typescript", "javascript", "node.js", "nodejs", "deno", "v8"] {
        assert!(
            !manifest.to_lowercase().contains(forbidden),
            "manifest mentions {forbidden}"
        );
    }
}

// ============================================================================
// UNIVERSAL INVARIANTS ACROSS A MIXED WORKLOAD
// ============================================================================

#[test]
fn invariants_hold_across_workload() {
    let (engine, clock, _dir) = engine();
    let ids: Vec<String> = (0..12)
        .map(|i| remember(&engine, &format!("workload item {i}"), &["load"]))
        .collect();
    for pair in ids.windows(2) {
        engine.associate(&pair[0], &pair[1], "supports", 0.7).unwrap();
    }
    engine
        .recall("workload item", 6, "", &CancellationToken::new())
        .unwrap();
    engine.feedback(&ids[0], true).unwrap();
    engine.feedback(&ids[1], false).unwrap();
    clock.advance(Duration::days(3));
    engine.decay(None, &CancellationToken::new()).unwrap();
    engine.consolidate(&CancellationToken::new()).unwrap();

    // Round-trip idempotence over the snapshot
    let first = engine.snapshot().unwrap();
    let reparsed = engram_core::snapshot::parse_snapshot(&first).unwrap();
    reparsed.validate_invariants().unwrap();
    assert_eq!(engram_core::snapshot::write_snapshot(&reparsed), first);

    let stats = engine.stats();
    assert_eq!(stats.items, 12);
    assert!(stats.energy >= 0.0 && stats.energy <= 1.0);
}

// ============================================================================
// TTL CONSOLIDATION
// ============================================================================

#[test]
fn ttl_expiry_requires_low_energy() {
    let (engine, clock, _dir) = engine();
    let short = engine
        .remember(RememberInput {
            text: "short-lived scratch note".to_string(),
            ttl: Some("1h".to_string()),
            ..Default::default()
        })
        .unwrap();

    clock.advance(Duration::hours(2));
    let out = engine.consolidate(&CancellationToken::new()).unwrap();
    // Energy still high: survives
    assert_eq!(out.expired, 0);

    // Long decay drains energy below the expiry ceiling
    for _ in 0..8 {
        clock.advance(Duration::days(7));
        engine.decay(None, &CancellationToken::new()).unwrap();
    }
    let out = engine.consolidate(&CancellationToken::new()).unwrap();
    assert_eq!(out.expired, 1);
    assert!(engine.get_item(&short.id).is_err());
}

// ============================================================================
// RESTART WITH SQLITE BACKEND
// ============================================================================

#[test]
fn sqlite_backend_round_trip_and_search() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let path = dir.path().join("engram.db");
    {
        let store = Box::new(SqliteStore::open(path.clone()).unwrap());
        let engine =
            MemoryEngine::with_parts(EngineConfig::default(), store, clock.clone()).unwrap();
        remember(&engine, "the deploy pipeline has a canary stage", &["deploy"]);
        remember(&engine, "spreading activation drives recall", &["memory"]);
        engine.snapshot().unwrap();
    }
    let store = Box::new(SqliteStore::open(path).unwrap());
    let engine = MemoryEngine::with_parts(EngineConfig::default(), store, clock).unwrap();
    assert_eq!(engine.stats().items, 2);

    let hits = engine.search("deploy canary", 10, "").unwrap();
    assert_eq!(hits.len(), 1);
    let top = engine.get_item(&hits[0].0).unwrap();
    assert!(top.text.contains("deploy"));
}

// ============================================================================
// DISPATCH SURFACE
// ============================================================================

#[test]
fn dispatch_surface_known_ops() {
    let (engine, _clock, _dir) = engine();
    for op in [
        "stats",
        "list-policy-versions",
        "get-policy",
        "adapt-policy",
        "find-convergent-patterns",
        "consolidate",
        "summarize",
    ] {
        dispatch(&engine, op, None).unwrap_or_else(|e| panic!("{op} failed: {e}"));
    }
    assert!(dispatch(&engine, "no-such-op", None).is_err());
}

// ============================================================================
// CONSOLIDATION REFLECTIONS
// ============================================================================

#[test]
fn consolidation_produces_reflection() {
    let (engine, clock, _dir) = engine_with(EngineConfig {
        cluster_min_size: 5,
        ..EngineConfig::default()
    });
    let ids: Vec<String> = (0..6)
        .map(|i| {
            engine
                .remember(RememberInput {
                    text: format!("incident retro number {i} about the cache"),
                    kind: Some("event".to_string()),
                    tags: vec!["incident".to_string()],
                    ..Default::default()
                })
                .unwrap()
                .id
        })
        .collect();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            engine.associate(&ids[i], &ids[j], "co-activated", 0.5).unwrap();
            engine.associate(&ids[j], &ids[i], "co-activated", 0.5).unwrap();
        }
    }

    clock.advance(Duration::days(40));
    let out = engine.consolidate(&CancellationToken::new()).unwrap();
    assert_eq!(out.clusters, 1);
    assert_eq!(out.reflections.len(), 1);

    let reflection = engine.get_item(&out.reflections[0]).unwrap();
    assert_eq!(reflection.kind, ItemKind::Reflection);
    assert!(reflection.text.contains("Consolidated 6 memories"));
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

#[test]
fn unknown_backend_name_falls_back_to_file() {
    assert_eq!(BackendKind::parse_name("mystery-db"), BackendKind::File);
    assert_eq!(BackendKind::parse_name("sqlite"), BackendKind::Sqlite);
}

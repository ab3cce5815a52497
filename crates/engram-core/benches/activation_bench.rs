//! Spreading activation benchmarks
//!
//! Run with: cargo bench

use std::collections::HashMap;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio_util::sync::CancellationToken;

use engram_core::clock::SystemClock;
use engram_core::graph::activation::{spread, ActivationParams};
use engram_core::graph::{associate, remember};
use engram_core::memory::{MemoryState, RememberInput};

/// Ring-of-cliques graph: `n` items, each linked to its 4 nearest neighbors
fn build_state(n: usize) -> (MemoryState, Vec<String>) {
    let clock = SystemClock;
    let mut state = MemoryState::new("bench", Utc::now());
    let ids: Vec<String> = (0..n)
        .map(|i| {
            remember(
                &mut state,
                RememberInput {
                    text: format!("benchmark item number {i}"),
                    tags: vec![format!("group{}", i / 10)],
                    ..Default::default()
                },
                &clock,
            )
            .unwrap()
            .id
        })
        .collect();
    let now = Utc::now();
    for i in 0..n {
        for hop in 1..=2 {
            let j = (i + hop) % n;
            associate(&mut state, &ids[i], &ids[j], "related", 0.5, now).unwrap();
        }
    }
    (state, ids)
}

fn bench_spread(c: &mut Criterion) {
    let mut group = c.benchmark_group("spreading_activation");
    for n in [100, 1_000, 5_000] {
        let (state, ids) = build_state(n);
        let seeds: HashMap<String, f64> = ids.iter().take(3).map(|id| (id.clone(), 1.0)).collect();
        let cancel = CancellationToken::new();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                spread(
                    black_box(&state),
                    black_box(&seeds),
                    ActivationParams {
                        steps: 3,
                        decay: 0.85,
                        threshold: 0.05,
                    },
                    &cancel,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_spread);
criterion_main!(benches);

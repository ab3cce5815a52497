//! Memory engine
//!
//! The process-wide facade over the memory state. One writer at a time
//! behind a `RwLock`; saves run through a single sequential store path; the
//! manifest regenerates lazily from a revision-keyed cache.
//!
//! Storage failures during routine saves are recorded in history and
//! logged, never rolled back; an explicit `snapshot` call re-attempts and
//! surfaces the error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{Datelike, Timelike};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::{self, activation::ActivationParams, AssociateOutcome};
use crate::lifecycle::{self, build_summary, ConsolidateOutcome, DecayOutcome};
use crate::manifest::ManifestCache;
use crate::memory::{
    clamp01, EngineStats, MemoryItem, MemoryState, RecallSession, RememberInput,
};
use crate::policy::{EvalLimits, Policy, PolicyVersion};
use crate::recall::{self, reinforce::reinforce, RecallCandidate};
use crate::snapshot::write_snapshot;
use crate::store::{open_backend, StoreBackend};
use crate::text::{jaccard, tokenize};

/// Importance nudge applied by explicit feedback
const FEEDBACK_IMPORTANCE_STEP: f64 = 0.02;

/// Energy lift applied by a success
const FEEDBACK_ENERGY_BOOST: f64 = 0.1;

/// Sessions inspected when building adapt-policy histograms
const ADAPT_SESSION_WINDOW: usize = 20;

/// One recalled item with its scores
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    pub item: MemoryItem,
    pub score: f64,
    pub activation: f64,
}

/// A recurring item group across recent sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergentPattern {
    /// The co-occurring items
    pub items: Vec<String>,
    /// Number of distinct sessions the group recurred in
    pub support: usize,
    /// Tags the items share
    pub shared_tags: Vec<String>,
}

/// The memory engine
pub struct MemoryEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<MemoryState>,
    store: Mutex<Box<dyn StoreBackend>>,
    manifest: Mutex<ManifestCache>,
    rng: Mutex<StdRng>,
}

impl MemoryEngine {
    /// Open the configured back-end and load (or initialize) the state
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store = open_backend(&config)?;
        Self::with_parts(config, store, Arc::new(SystemClock))
    }

    /// Assemble an engine from explicit parts (used by tests and embedders)
    pub fn with_parts(
        config: EngineConfig,
        store: Box<dyn StoreBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut state = match store.load()? {
            Some(state) => {
                info!(items = state.items.len(), "loaded prior memory state");
                state
            }
            None => MemoryState::new(config.workspace_id.clone(), clock.now()),
        };
        install_configured_policy(&mut state, &config, &*clock);
        Ok(Self {
            config,
            clock,
            state: RwLock::new(state),
            store: Mutex::new(store),
            manifest: Mutex::new(ManifestCache::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Reseed the exploration RNG (deterministic tests)
    pub fn reseed(&self, seed: u64) {
        *self.rng.lock().expect("rng lock") = StdRng::seed_from_u64(seed);
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn eval_limits(&self) -> EvalLimits {
        EvalLimits::with_timeout_ms(self.config.evaluator_timeout_ms)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().expect("state lock")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().expect("state lock")
    }

    /// Persist the current state; routine-save failures are recorded, not
    /// propagated
    fn persist(&self) {
        if let Err(e) = self.try_persist() {
            warn!(error = %e, "save failed; state kept in memory");
            let now = self.clock.now();
            self.write().push_history(now, "save-error", Some(e.to_string()));
        }
    }

    fn try_persist(&self) -> Result<()> {
        let guard = self.read();
        let text = write_snapshot(&guard);
        let store = self.store.lock().expect("store lock");
        store.save(&guard, &text)
    }

    // ========================================================================
    // GRAPH OPERATIONS
    // ========================================================================

    /// Store a new item
    pub fn remember(&self, input: RememberInput) -> Result<MemoryItem> {
        let now = self.clock.now();
        let item = {
            let mut state = self.write();
            let item = graph::remember(&mut state, input, &*self.clock)?;
            state.push_history(
                now,
                "remember",
                Some(format!("id={} importance={:.2}", item.id, item.importance)),
            );
            item
        };
        self.persist();
        Ok(item)
    }

    /// Read one item, updating its access bookkeeping
    pub fn get_item(&self, id: &str) -> Result<MemoryItem> {
        let now = self.clock.now();
        let item = {
            let mut state = self.write();
            let item = graph::get_item(&mut state, id, now)?;
            state.push_history(now, "get-item", Some(format!("id={}", id)));
            item
        };
        self.persist();
        Ok(item)
    }

    /// Upsert an edge
    pub fn associate(
        &self,
        from: &str,
        to: &str,
        relation: &str,
        weight: f64,
    ) -> Result<AssociateOutcome> {
        let now = self.clock.now();
        let outcome = {
            let mut state = self.write();
            let outcome = graph::associate(&mut state, from, to, relation, weight, now)?;
            state.push_history(
                now,
                "associate",
                Some(format!(
                    "{} {} -> {} w={:.2}",
                    if outcome.created { "created" } else { "reinforced" },
                    from,
                    to,
                    outcome.weight
                )),
            );
            outcome
        };
        self.persist();
        Ok(outcome)
    }

    /// Terminal simple paths from `start` over directed edges
    pub fn trace(&self, start: &str, depth: usize) -> Result<Vec<Vec<String>>> {
        graph::trace(&self.read(), start, depth)
    }

    /// Run spreading activation from explicit seeds
    pub fn activate(
        &self,
        seeds: &HashMap<String, f64>,
        steps: u32,
        decay: f64,
        threshold: f64,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, f64>> {
        graph::activation::spread(
            &self.read(),
            seeds,
            ActivationParams {
                steps,
                decay,
                threshold,
            },
            cancel,
        )
    }

    // ========================================================================
    // RECALL
    // ========================================================================

    /// Recall the best matches for a query
    ///
    /// Seeds come from token overlap with the query, activation spreads over
    /// the graph, the ranker scores every in-scope candidate, exploration may
    /// swap in a tail item, and the returned set is co-activation reinforced.
    pub fn recall(
        &self,
        query: &str,
        limit: usize,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecallResult>> {
        if query.trim().is_empty() {
            return Err(EngineError::Validation("query cannot be empty".to_string()));
        }
        let limit = limit.max(1);
        let started = Instant::now();
        let now = self.clock.now();
        let limits = self.eval_limits();

        let results = {
            let mut state = self.write();

            let seeds = seed_map(&state, query, scope);
            let activation = graph::activation::spread(
                &state,
                &seeds,
                ActivationParams {
                    steps: self.config.activation_steps,
                    decay: self.config.activation_decay,
                    threshold: self.config.activation_threshold,
                },
                cancel,
            )?;

            self.check_budget(started, cancel)?;

            let candidates: Vec<RecallCandidate> = state
                .items
                .values()
                .filter(|i| in_scope(i, scope))
                .map(|i| RecallCandidate {
                    id: i.id.clone(),
                    features: recall::features_for(
                        i,
                        activation.get(&i.id).copied().unwrap_or(0.0),
                        now,
                    ),
                })
                .collect();
            let feature_by_id: HashMap<String, [f64; 8]> = candidates
                .iter()
                .map(|c| (c.id.clone(), c.features))
                .collect();

            let ranked = recall::rank(&candidates, &state.policy, &limits);
            let chosen = {
                let mut rng = self.rng.lock().expect("rng lock");
                recall::select(
                    &ranked,
                    |id| feature_by_id.get(id).copied().unwrap_or([0.0; 8]),
                    limit,
                    self.config.exploration_epsilon,
                    &state.policy,
                    &limits,
                    &mut *rng,
                )
            };

            self.check_budget(started, cancel)?;

            let chosen_ids: Vec<String> = chosen.iter().map(|c| c.id.clone()).collect();
            for id in &chosen_ids {
                if let Some(item) = state.items.get_mut(id) {
                    graph::touch_access(item, now);
                }
            }

            let stats = reinforce(
                &mut state,
                &chosen_ids,
                self.config.reinforce_delta,
                self.config.max_pairs_per_recall,
                self.config.coact_top_k_per_node,
                now,
            );
            debug!(
                created = stats.created,
                reinforced = stats.reinforced,
                "co-activation pass"
            );

            state.recompute_energy();
            let session = RecallSession {
                t: now,
                items: chosen_ids.clone(),
                policy_ids: state.policy.active_ranking_ids(),
                query: query.to_string(),
                energy: state.energy,
                hour: now.hour(),
            };
            state.push_session(session);
            state.push_history(
                now,
                "recall",
                Some(format!(
                    "q=\"{}\" n={} created={} reinforced={} avgW {:.3}->{:.3}",
                    query,
                    chosen_ids.len(),
                    stats.created,
                    stats.reinforced,
                    stats.avg_weight_before,
                    stats.avg_weight_after
                )),
            );

            chosen
                .into_iter()
                .filter_map(|c| {
                    state.items.get(&c.id).map(|item| RecallResult {
                        item: item.clone(),
                        score: c.score,
                        activation: c.activation,
                    })
                })
                .collect::<Vec<_>>()
        };

        self.persist();
        Ok(results)
    }

    fn check_budget(&self, started: Instant, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if started.elapsed().as_millis() as u64 > self.config.recall_timeout_ms {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Ranked keyword search
    ///
    /// Uses the back-end index when one exists, otherwise an in-memory token
    /// overlap scan. Read-only.
    pub fn search(&self, query: &str, limit: usize, scope: &str) -> Result<Vec<(String, f64)>> {
        {
            let store = self.store.lock().expect("store lock");
            if store.supports_search() {
                return store.search(query, limit, scope);
            }
        }
        let state = self.read();
        let mut hits: Vec<(String, f64)> = seed_map(&state, query, scope).into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    // ========================================================================
    // FEEDBACK & POLICY
    // ========================================================================

    /// Attribute an outcome to an item, its most recent session, and the
    /// policy versions that session ran under
    pub fn feedback(&self, id: &str, success: bool) -> Result<()> {
        let now = self.clock.now();
        {
            let mut state = self.write();
            if !state.items.contains_key(id) {
                return Err(EngineError::NotFound(format!("item {}", id)));
            }

            let policy_ids: Vec<String> = state
                .sessions
                .iter()
                .rev()
                .find(|s| s.items.iter().any(|i| i == id))
                .map(|s| s.policy_ids.clone())
                .unwrap_or_default();

            let item = state.items.get_mut(id).expect("checked above");
            if success {
                item.success = item.success.saturating_add(1);
                item.importance = clamp01(item.importance + FEEDBACK_IMPORTANCE_STEP);
                item.energy = clamp01(item.energy + FEEDBACK_ENERGY_BOOST);
            } else {
                item.fail = item.fail.saturating_add(1);
                item.importance = clamp01(item.importance - FEEDBACK_IMPORTANCE_STEP);
            }
            item.updated_at = now;

            for version in state.policy_versions.iter_mut() {
                if policy_ids.iter().any(|p| p == &version.id) {
                    if success {
                        version.success = version.success.saturating_add(1);
                    } else {
                        version.fail = version.fail.saturating_add(1);
                    }
                }
            }

            state.recompute_energy();
            state.push_history(
                now,
                "feedback",
                Some(format!(
                    "id={} outcome={}",
                    id,
                    if success { "success" } else { "fail" }
                )),
            );
        }
        self.persist();
        Ok(())
    }

    /// The active policy
    pub fn get_policy(&self) -> Policy {
        self.read().policy.clone()
    }

    /// Replace the whole policy, versioning every installed source
    pub fn set_policy(&self, policy: Policy) -> Result<()> {
        let now = self.clock.now();
        {
            let mut state = self.write();
            for (name, source) in named_sources(&policy) {
                state.push_version(PolicyVersion::new(name, source, now));
            }
            state.policy = policy;
            state.push_history(now, "set-policy", None);
        }
        self.persist();
        Ok(())
    }

    /// Read one policy slot
    pub fn get_policy_fn(&self, name: &str) -> Result<Option<String>> {
        Ok(self.read().policy.get_slot(name)?.map(String::from))
    }

    /// Install one policy slot, recording a version for the new source
    pub fn set_policy_fn(&self, name: &str, code: &str) -> Result<PolicyVersion> {
        validate_lambda(code)?;
        let now = self.clock.now();
        let version = PolicyVersion::new(name, code, now);
        {
            let mut state = self.write();
            let previous = state.policy.set_slot(name, code.to_string())?;
            if let Some(previous) = previous {
                state.push_version(PolicyVersion::new(name, previous, now));
            }
            state.push_version(version.clone());
            state.push_history(
                now,
                "set-policy-fn",
                Some(format!("name={} id={}", name, version.id)),
            );
        }
        self.persist();
        Ok(version)
    }

    /// Stored policy versions, oldest first
    pub fn list_policy_versions(&self) -> Vec<PolicyVersion> {
        self.read().policy_versions.clone()
    }

    /// Replace the composable recall scorer list
    pub fn set_recall_scorers(&self, sources: Vec<String>) -> Result<()> {
        for source in &sources {
            validate_lambda(source)?;
        }
        let now = self.clock.now();
        {
            let mut state = self.write();
            for source in &sources {
                state.push_version(PolicyVersion::new("recall-score", source.clone(), now));
            }
            state.policy.recall_score_fns = sources;
            state.push_history(now, "set-recall-scorers", None);
        }
        self.persist();
        Ok(())
    }

    /// Install the policy generator lambda
    pub fn set_policy_generator(&self, code: &str) -> Result<PolicyVersion> {
        self.set_policy_fn("policy-generator", code)
    }

    /// Run one adapt cycle: histograms from recent sessions feed the
    /// generator; a produced scorer is appended and versioned
    pub fn adapt_policy(&self) -> Result<Option<String>> {
        let now = self.clock.now();
        let limits = self.eval_limits();
        let generated = {
            let state = self.read();
            let histograms = adapt_histograms(&state);
            state.policy.generate_scorer(&histograms, &limits)
        };

        let Some(code) = generated else {
            let mut state = self.write();
            state.push_history(now, "adapt-policy", Some("no-change".to_string()));
            drop(state);
            self.persist();
            return Ok(None);
        };
        if validate_lambda(&code).is_err() {
            let mut state = self.write();
            state.push_history(now, "adapt-policy", Some("rejected".to_string()));
            drop(state);
            self.persist();
            return Ok(None);
        }

        {
            let mut state = self.write();
            state.push_version(PolicyVersion::new("recall-score", code.clone(), now));
            state.policy.recall_score_fns.push(code.clone());
            let active = state.policy.recall_score_fns.len();
            state.push_history(
                now,
                "adapt-policy",
                Some(format!("appended scorer ({} active)", active)),
            );
        }
        self.persist();
        Ok(Some(code))
    }

    // ========================================================================
    // LIFECYCLE & INTROSPECTION
    // ========================================================================

    /// Run one decay pass
    pub fn decay(
        &self,
        half_life_days: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<DecayOutcome> {
        let now = self.clock.now();
        let outcome = {
            let mut state = self.write();
            let outcome = lifecycle::decay(&mut state, &self.config, half_life_days, now, cancel)?;
            state.push_history(
                now,
                "decay",
                Some(format!(
                    "decayedItems={} prunedEdges={}",
                    outcome.decayed_items, outcome.pruned_edges
                )),
            );
            outcome
        };
        self.persist();
        Ok(outcome)
    }

    /// Run one consolidation pass
    pub fn consolidate(&self, cancel: &CancellationToken) -> Result<ConsolidateOutcome> {
        let now = self.clock.now();
        let outcome = {
            let mut state = self.write();
            let outcome = lifecycle::consolidate(&mut state, &self.config, &*self.clock, cancel)?;
            state.push_history(
                now,
                "consolidate",
                Some(format!(
                    "expired={} clusters={} removed={}",
                    outcome.expired, outcome.clusters, outcome.removed
                )),
            );
            outcome
        };
        self.persist();
        Ok(outcome)
    }

    /// Keyword + snippet summary over a selection (query and scope optional)
    pub fn summarize(&self, query: Option<&str>, scope: &str) -> String {
        let state = self.read();
        let now = self.clock.now();
        let query_tokens: Option<Vec<String>> = query.map(tokenize);
        let items: Vec<&MemoryItem> = state
            .items
            .values()
            .filter(|i| in_scope(i, scope))
            .filter(|i| match &query_tokens {
                Some(tokens) => {
                    let item_tokens = tokenize(&i.text);
                    jaccard(
                        tokens.iter().map(|t| t.as_str()),
                        item_tokens
                            .iter()
                            .map(|t| t.as_str())
                            .chain(i.tags.iter().map(|t| t.as_str())),
                    ) > 0.0
                }
                None => true,
            })
            .collect();
        if items.is_empty() {
            return "Nothing to summarize yet.".to_string();
        }
        build_summary(
            &items,
            self.config.summarize_top_keywords,
            self.config.summarize_max_snippets,
            now,
        )
    }

    /// Store-wide statistics
    pub fn stats(&self) -> EngineStats {
        self.read().stats()
    }

    /// The cached manifest (regenerated lazily)
    ///
    /// Generation runs over a cloned snapshot of the state so writers are
    /// never blocked behind it.
    pub fn manifest(&self, cancel: &CancellationToken) -> Result<String> {
        let now = self.clock.now();
        let state = {
            let state = self.read();
            let mut cache = self.manifest.lock().expect("manifest lock");
            if let Some(text) = cache.get(state.revision, now, self.config.manifest_ttl_ms) {
                return Ok(text);
            }
            state.clone()
        };
        let text = crate::manifest::generate(&state, &self.config, now, cancel)?;
        self.manifest
            .lock()
            .expect("manifest lock")
            .put(state.revision, now, text.clone());
        Ok(text)
    }

    /// Write the canonical snapshot and persist it, surfacing save errors
    pub fn snapshot(&self) -> Result<String> {
        let text = {
            let guard = self.read();
            let text = write_snapshot(&guard);
            let store = self.store.lock().expect("store lock");
            store.save(&guard, &text)?;
            text
        };
        Ok(text)
    }

    /// Item groups recurring across recent recall sessions
    pub fn find_convergent_patterns(&self) -> Vec<ConvergentPattern> {
        let state = self.read();
        let mut support: HashMap<(String, String), usize> = HashMap::new();
        for session in &state.sessions {
            let mut items = session.items.clone();
            items.sort();
            items.dedup();
            for i in 0..items.len() {
                for j in (i + 1)..items.len() {
                    *support
                        .entry((items[i].clone(), items[j].clone()))
                        .or_insert(0) += 1;
                }
            }
        }
        let mut patterns: Vec<ConvergentPattern> = support
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .filter(|((a, b), _)| state.items.contains_key(a) && state.items.contains_key(b))
            .map(|((a, b), support)| {
                let shared_tags = match (state.items.get(&a), state.items.get(&b)) {
                    (Some(ia), Some(ib)) => ia
                        .tags
                        .iter()
                        .filter(|t| ib.tags.contains(t))
                        .cloned()
                        .collect(),
                    _ => Vec::new(),
                };
                ConvergentPattern {
                    items: vec![a, b],
                    support,
                    shared_tags,
                }
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.support
                .cmp(&a.support)
                .then_with(|| a.items.cmp(&b.items))
        });
        patterns
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn in_scope(item: &MemoryItem, scope: &str) -> bool {
    scope.is_empty() || item.scope.is_empty() || item.scope == scope
}

/// Query-token overlap seeds for activation: fraction of query tokens the
/// item's text and tags cover
fn seed_map(state: &MemoryState, query: &str, scope: &str) -> HashMap<String, f64> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return HashMap::new();
    }
    let mut seeds = HashMap::new();
    for item in state.items.values() {
        if !in_scope(item, scope) {
            continue;
        }
        let mut item_tokens = tokenize(&item.text);
        item_tokens.extend(item.tags.iter().map(|t| t.to_lowercase()));
        let matched = query_tokens
            .iter()
            .filter(|q| item_tokens.iter().any(|t| t == *q))
            .count();
        if matched > 0 {
            seeds.insert(item.id.clone(), matched as f64 / query_tokens.len() as f64);
        }
    }
    seeds
}

fn validate_lambda(code: &str) -> Result<()> {
    let parsed = crate::sexpr::parse(code)
        .map_err(|e| EngineError::Validation(format!("policy source: {}", e)))?;
    let is_lambda = parsed
        .as_list()
        .and_then(|l| l.first())
        .and_then(|h| h.as_sym())
        == Some("lambda");
    if !is_lambda {
        return Err(EngineError::Validation(
            "policy source must be a (lambda ...) form".to_string(),
        ));
    }
    Ok(())
}

fn named_sources(policy: &Policy) -> Vec<(&'static str, String)> {
    let mut sources = Vec::new();
    if let Some(s) = &policy.decay_fn {
        sources.push(("decay", s.clone()));
    }
    if let Some(s) = &policy.recall_score_fn {
        sources.push(("recall-score", s.clone()));
    }
    for s in &policy.recall_score_fns {
        sources.push(("recall-score", s.clone()));
    }
    if let Some(s) = &policy.recall_combiner_fn {
        sources.push(("recall-combiner", s.clone()));
    }
    if let Some(s) = &policy.exploration_fn {
        sources.push(("exploration", s.clone()));
    }
    if let Some(s) = &policy.policy_generator_fn {
        sources.push(("policy-generator", s.clone()));
    }
    sources
}

fn install_configured_policy(state: &mut MemoryState, config: &EngineConfig, clock: &dyn Clock) {
    let now = clock.now();
    let policy = &mut state.policy;
    if policy.decay_fn.is_none() {
        policy.decay_fn = config.decay_fn.clone();
    }
    if policy.recall_score_fn.is_none() {
        policy.recall_score_fn = config.recall_score_fn.clone();
    }
    if policy.recall_score_fns.is_empty() {
        policy.recall_score_fns = config.recall_score_fns.clone();
    }
    if policy.recall_combiner_fn.is_none() {
        policy.recall_combiner_fn = config.recall_combiner_fn.clone();
    }
    if policy.exploration_fn.is_none() {
        policy.exploration_fn = config.exploration_fn.clone();
    }
    if policy.policy_generator_fn.is_none() {
        policy.policy_generator_fn = config.policy_generator_fn.clone();
    }
    let named = named_sources(&state.policy);
    for (name, source) in named {
        state.push_version(PolicyVersion::new(name, source, now));
    }
}

/// Success/fail histograms over hours, days, tags, queries, and energies
fn adapt_histograms(state: &MemoryState) -> [Vec<f64>; 10] {
    let mut hours_succ = vec![0.0; 24];
    let mut hours_fail = vec![0.0; 24];
    let mut days_succ = vec![0.0; 7];
    let mut days_fail = vec![0.0; 7];
    let mut tag_totals: std::collections::BTreeMap<String, (f64, f64)> = Default::default();
    let mut queries_succ = Vec::new();
    let mut queries_fail = Vec::new();
    let mut energies_succ = Vec::new();
    let mut energies_fail = Vec::new();

    let skip = state.sessions.len().saturating_sub(ADAPT_SESSION_WINDOW);
    for session in state.sessions.iter().skip(skip) {
        let mut succ = 0.0;
        let mut fail = 0.0;
        for id in &session.items {
            if let Some(item) = state.items.get(id) {
                succ += item.success as f64;
                fail += item.fail as f64;
                for tag in &item.tags {
                    let entry = tag_totals.entry(tag.clone()).or_insert((0.0, 0.0));
                    entry.0 += item.success as f64;
                    entry.1 += item.fail as f64;
                }
            }
        }
        let hour = (session.hour as usize).min(23);
        let day = session.t.weekday().num_days_from_sunday() as usize;
        hours_succ[hour] += succ;
        hours_fail[hour] += fail;
        days_succ[day] += succ;
        days_fail[day] += fail;
        queries_succ.push(succ);
        queries_fail.push(fail);
        if succ >= fail {
            energies_succ.push(session.energy);
        } else {
            energies_fail.push(session.energy);
        }
    }

    let tags_succ: Vec<f64> = tag_totals.values().map(|(s, _)| *s).take(16).collect();
    let tags_fail: Vec<f64> = tag_totals.values().map(|(_, f)| *f).take(16).collect();

    [
        hours_succ,
        hours_fail,
        days_succ,
        days_fail,
        tags_succ,
        tags_fail,
        queries_succ,
        queries_fail,
        energies_succ,
        energies_fail,
    ]
}

// ============================================================================
// TESTS
// ============================================================================

//! Consolidator: merges semantically similar fragments in the background.
//!
//! A run walks `Idle → Scanning → Merging → Done`:
//!
//! 1. Pick the mode once from the activity hint: hot path above the
//!    configured rate (one round over a bounded batch of the oldest
//!    eligible fragments), cold path otherwise (rounds until nothing merges).
//! 2. Drop fragments inside the freshness window.
//! 3. Embed the rest through the injected [`Embedder`] and cluster them
//!    greedily by cosine similarity, round after round on a working copy.
//! 4. Commit every merge to the store in one atomic step.
//!
//! Errors and panics never leave a run: they are logged and reported as
//! [`RunStatus::Failed`] with the store untouched. Runs are serialized, and
//! a run dropped mid-flight has committed nothing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use mnemo_config::{ConsolidationConfig, FreshnessPolicy};
use mnemo_core::error::Error;
use mnemo_core::pulse::ActivityHint;
use mnemo_core::{Embedder, Fragment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::compressor::{content_address, merge_fragments};
use crate::store::{FragmentStore, Merge};
use crate::vector::cosine_similarity;

/// How thorough a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMode {
    HotPath,
    ColdPath,
}

impl ConsolidationMode {
    /// Hot path when the observed rate is strictly above `threshold_bpm`.
    pub fn select(hint: Option<ActivityHint>, threshold_bpm: f64) -> Self {
        match hint {
            Some(h) if h.bpm.is_finite() && h.bpm > threshold_bpm => Self::HotPath,
            _ => Self::ColdPath,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HotPath => "hot_path",
            Self::ColdPath => "cold_path",
        }
    }
}

impl fmt::Display for ConsolidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPhase {
    Idle,
    Scanning,
    Merging,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { reason: String },
}

/// Result of one consolidation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOutcome {
    /// Fragments eliminated by merging
    pub merged_count: usize,
    pub mode: ConsolidationMode,
    /// Rounds that applied at least one merge
    pub rounds: usize,
    #[serde(flatten)]
    pub status: RunStatus,
    /// Served from the idempotency cache
    #[serde(default)]
    pub replayed: bool,
}

impl ConsolidationOutcome {
    fn failed(mode: ConsolidationMode, reason: String) -> Self {
        Self {
            merged_count: 0,
            mode,
            rounds: 0,
            status: RunStatus::Failed { reason },
            replayed: false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed { .. })
    }
}

/// Whether `created_at` falls inside the freshness window at `now`.
///
/// Timestamps in the future are always fresh.
pub fn is_fresh(policy: &FreshnessPolicy, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if created_at > now {
        return true;
    }
    match policy {
        FreshnessPolicy::CalendarDay => created_at.date_naive() == now.date_naive(),
        FreshnessPolicy::Rolling { seconds } => {
            let window = ChronoDuration::seconds(i64::try_from(*seconds).unwrap_or(i64::MAX));
            now.signed_duration_since(created_at) < window
        }
    }
}

struct CachedRun {
    key: String,
    version: u64,
    outcome: ConsolidationOutcome,
}

/// Bounded FIFO of recent idempotency keys.
struct IdempotencyCache {
    capacity: usize,
    entries: VecDeque<CachedRun>,
}

impl IdempotencyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    fn get(&self, key: &str, version: u64) -> Option<ConsolidationOutcome> {
        self.entries
            .iter()
            .find(|e| e.key == key && e.version == version)
            .map(|e| e.outcome.clone())
    }

    fn put(&mut self, key: &str, version: u64, outcome: ConsolidationOutcome) {
        if self.capacity == 0 {
            return;
        }
        self.entries.retain(|e| e.key != key);
        self.entries.push_back(CachedRun {
            key: key.to_string(),
            version,
            outcome,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// What a successful run committed.
#[derive(Default)]
struct Progress {
    merged: usize,
    rounds: usize,
}

pub struct Consolidator {
    store: FragmentStore,
    embedder: Arc<dyn Embedder>,
    config: ConsolidationConfig,
    cache: Mutex<IdempotencyCache>,
    phase: Mutex<ConsolidationPhase>,
    run_lock: tokio::sync::Mutex<()>,
}

impl Consolidator {
    pub fn new(
        store: FragmentStore,
        embedder: Arc<dyn Embedder>,
        config: ConsolidationConfig,
    ) -> Self {
        let cache = IdempotencyCache::new(config.idempotency_cache_size);
        Self {
            store,
            embedder,
            config,
            cache: Mutex::new(cache),
            phase: Mutex::new(ConsolidationPhase::Idle),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Phase of the most recent run.
    pub fn phase(&self) -> ConsolidationPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ConsolidationPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn cache(&self) -> MutexGuard<'_, IdempotencyCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run with the configured similarity threshold.
    pub async fn run(
        &self,
        idempotency_key: Option<&str>,
        activity_hint: Option<ActivityHint>,
    ) -> ConsolidationOutcome {
        self.consolidate(self.config.similarity_threshold, idempotency_key, activity_hint)
            .await
    }

    /// Merge similar, non-fresh fragments. Never fails; see [`RunStatus`].
    ///
    /// A repeated `idempotency_key` against an unchanged store returns the
    /// cached outcome (marked `replayed`) without recomputing. Failed runs
    /// are not cached.
    pub async fn consolidate(
        &self,
        similarity_threshold: f32,
        idempotency_key: Option<&str>,
        activity_hint: Option<ActivityHint>,
    ) -> ConsolidationOutcome {
        let mode = ConsolidationMode::select(activity_hint, self.config.hot_path_threshold_bpm);
        let _serial = self.run_lock.lock().await;

        if let Some(key) = idempotency_key {
            let version = self.store.version().await;
            let cached = self.cache().get(key, version);
            if let Some(mut cached) = cached {
                debug!(key, "Consolidation replayed from idempotency cache");
                cached.replayed = true;
                return cached;
            }
        }

        if !(similarity_threshold > 0.0 && similarity_threshold <= 1.0) {
            let reason = format!("invalid similarity threshold {similarity_threshold}");
            warn!(%reason, "Consolidation rejected");
            return ConsolidationOutcome::failed(mode, reason);
        }

        info!(
            mode = mode.as_str(),
            bpm = activity_hint.map(|h| h.bpm),
            threshold = similarity_threshold,
            "Consolidation started"
        );

        let result = AssertUnwindSafe(self.run_rounds(mode, similarity_threshold))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(progress)) => ConsolidationOutcome {
                merged_count: progress.merged,
                mode,
                rounds: progress.rounds,
                status: RunStatus::Completed,
                replayed: false,
            },
            Ok(Err(e)) => {
                warn!(mode = mode.as_str(), error = %e, "Consolidation failed");
                ConsolidationOutcome::failed(mode, e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(mode = mode.as_str(), %reason, "Consolidation panicked");
                ConsolidationOutcome::failed(mode, format!("panic: {reason}"))
            }
        };
        self.set_phase(ConsolidationPhase::Done);

        if let (Some(key), false) = (idempotency_key, outcome.is_failed()) {
            let version = self.store.version().await;
            self.cache().put(key, version, outcome.clone());
        }

        info!(
            mode = mode.as_str(),
            merged = outcome.merged_count,
            rounds = outcome.rounds,
            failed = outcome.is_failed(),
            "Consolidation finished"
        );
        outcome
    }

    /// Compute every round on a working copy, then commit all merges to
    /// the store in one atomic step.
    async fn run_rounds(
        &self,
        mode: ConsolidationMode,
        threshold: f32,
    ) -> Result<Progress, Error> {
        let max_rounds = match mode {
            ConsolidationMode::HotPath => 1,
            ConsolidationMode::ColdPath => self.config.cold_path_max_rounds.max(1),
        };

        self.set_phase(ConsolidationPhase::Scanning);
        let view = self.store.scan().await;
        let now = Utc::now();

        let mut working: BTreeMap<String, Fragment> = view
            .fragments
            .into_iter()
            .filter(|f| !is_fresh(&self.config.freshness, f.created_at, now))
            .map(|f| (f.id.clone(), f))
            .collect();
        // Working id -> live store ids it replaces
        let mut replaced: HashMap<String, Vec<String>> = HashMap::new();
        let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        let mut progress = Progress::default();

        for round in 1..=max_rounds {
            let mut eligible: Vec<Fragment> = working.values().cloned().collect();
            eligible.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            if mode == ConsolidationMode::HotPath {
                eligible.truncate(self.config.hot_path_batch);
            }
            if eligible.len() < 2 {
                debug!(round, eligible = eligible.len(), "Nothing to consolidate");
                break;
            }

            self.embed_missing(&eligible, &mut embeddings).await?;
            for fragment in &mut eligible {
                if fragment.embedding.is_none() {
                    fragment.embedding = embeddings.get(&fragment.id).cloned();
                }
            }

            let clusters = cluster(&eligible, threshold);
            if clusters.is_empty() {
                debug!(round, "No fragments above the similarity threshold");
                break;
            }

            for indices in clusters {
                let members: Vec<Fragment> = indices.iter().map(|&i| eligible[i].clone()).collect();
                let mut refs: Vec<String> = members.iter().flat_map(|f| f.provenance()).collect();
                refs.sort();
                let id = content_address(&["merge", &refs.join("\n")]);
                let Some(merged) = merge_fragments(id, &members) else {
                    continue;
                };

                let mut live = Vec::new();
                for member in &members {
                    working.remove(&member.id);
                    live.extend(
                        replaced
                            .remove(&member.id)
                            .unwrap_or_else(|| vec![member.id.clone()]),
                    );
                }
                replaced.insert(merged.id.clone(), live);
                working.insert(merged.id.clone(), merged);
            }
            progress.rounds += 1;
            debug!(round, pending = replaced.len(), "Consolidation round computed");
        }

        if replaced.is_empty() {
            return Ok(progress);
        }

        self.set_phase(ConsolidationPhase::Merging);
        let merges: Vec<Merge> = replaced
            .into_iter()
            .filter_map(|(id, replaces)| {
                let merged = working.remove(&id)?;
                Some(Merge { replaces, merged })
            })
            .collect();
        progress.merged = self.store.apply_round(merges).await?;
        Ok(progress)
    }

    async fn embed_missing(
        &self,
        fragments: &[Fragment],
        cache: &mut HashMap<String, Vec<f32>>,
    ) -> Result<(), Error> {
        let missing: Vec<&Fragment> = fragments
            .iter()
            .filter(|f| f.embedding.is_none() && !cache.contains_key(&f.id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = missing.iter().map(|f| f.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        for (fragment, vector) in missing.into_iter().zip(vectors) {
            cache.insert(fragment.id.clone(), vector);
        }
        Ok(())
    }
}

/// Greedy seed clustering: each unassigned fragment, oldest first, claims
/// every later unassigned fragment whose cosine similarity to it meets
/// `threshold`. Only clusters of two or more are returned.
fn cluster(fragments: &[Fragment], threshold: f32) -> Vec<Vec<usize>> {
    let mut assigned = vec![false; fragments.len()];
    let mut clusters = Vec::new();

    for seed in 0..fragments.len() {
        let Some(seed_vec) = fragments[seed].embedding.as_deref() else {
            continue;
        };
        if assigned[seed] {
            continue;
        }

        let mut members = vec![seed];
        for (j, other) in fragments.iter().enumerate().skip(seed + 1) {
            if assigned[j] {
                continue;
            }
            let Some(other_vec) = other.embedding.as_deref() else {
                continue;
            };
            let sim = cosine_similarity(seed_vec, other_vec);
            // Zero vectors score 0 and never merge
            if sim > 0.0 && sim >= threshold {
                members.push(j);
            }
        }

        if members.len() >= 2 {
            for &m in &members {
                assigned[m] = true;
            }
            clusters.push(members);
        }
    }

    clusters
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Fragment store: the single owner of the live fragment set.
//!
//! Readers (context assembly, status) take the read lock; compaction and
//! consolidation rounds take the write lock once and apply completely or
//! not at all. A version counter moves on every mutation so callers can
//! tell whether the set changed under them.

use chrono::Utc;
use mnemo_config::{CompressionMode, MemoryConfig};
use mnemo_core::error::{Error, MemoryError};
use mnemo_core::{Fragment, RawFragment, Span, SpanCategory, concepts};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::compressor::compress_fragments;
use crate::vector::vector_search;

/// One merge inside a consolidation round.
#[derive(Debug, Clone)]
pub struct Merge {
    /// Ids of live fragments being replaced
    pub replaces: Vec<String>,
    pub merged: Fragment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub accepted: Vec<String>,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub before: usize,
    pub after: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub fragments: usize,
    /// Fragments standing for more than themselves
    pub compacted: usize,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_compaction_ratio: Option<f64>,
    pub rejected_total: u64,
}

/// A consistent copy of the store at one version.
#[derive(Debug, Clone)]
pub struct StoreView {
    pub version: u64,
    pub fragments: Vec<Fragment>,
}

#[derive(Default)]
struct StoreState {
    fragments: BTreeMap<String, Fragment>,
    version: u64,
    last_ratio: Option<f64>,
    rejected: u64,
}

/// Shared handle to the fragment set. Cloning shares the same store.
#[derive(Clone)]
pub struct FragmentStore {
    state: Arc<RwLock<StoreState>>,
    mode: CompressionMode,
    max_fragments: usize,
}

impl FragmentStore {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            mode: config.compression_mode,
            max_fragments: config.max_fragments,
        }
    }

    pub fn compression_mode(&self) -> CompressionMode {
        self.mode
    }

    /// Validate and insert one fragment.
    ///
    /// Fragments are immutable, so an id that is already live is a conflict.
    pub async fn ingest(&self, raw: RawFragment) -> Result<Fragment, Error> {
        let mut state = self.state.write().await;
        let fragment = match raw.validate(Utc::now()) {
            Ok(f) => f,
            Err(e) => {
                state.rejected += 1;
                return Err(e.into());
            }
        };
        if state.fragments.contains_key(&fragment.id) {
            return Err(MemoryError::Conflict(format!(
                "fragment '{}' already exists",
                fragment.id
            ))
            .into());
        }

        state.fragments.insert(fragment.id.clone(), fragment.clone());
        state.version += 1;
        debug!(id = %fragment.id, "Fragment ingested");
        Ok(fragment)
    }

    /// Insert many fragments under one lock, skipping malformed or
    /// duplicate ones.
    pub async fn ingest_many(&self, raws: &[RawFragment]) -> IngestReport {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut report = IngestReport::default();

        for (index, raw) in raws.iter().enumerate() {
            match raw.validate(now) {
                Ok(fragment) if !state.fragments.contains_key(&fragment.id) => {
                    report.accepted.push(fragment.id.clone());
                    state.fragments.insert(fragment.id.clone(), fragment);
                }
                Ok(fragment) => {
                    report.rejected += 1;
                    debug!(index, id = %fragment.id, "Skipping duplicate fragment id");
                }
                Err(e) => {
                    report.rejected += 1;
                    debug!(index, error = %e, "Skipping malformed fragment");
                }
            }
        }

        state.rejected += report.rejected as u64;
        if !report.accepted.is_empty() {
            state.version += 1;
        }
        report
    }

    pub async fn get(&self, id: &str) -> Option<Fragment> {
        self.state.read().await.fragments.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.fragments.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.fragments.is_empty()
    }

    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// All fragments, sorted by id.
    pub async fn fragments(&self) -> Vec<Fragment> {
        self.state.read().await.fragments.values().cloned().collect()
    }

    pub async fn scan(&self) -> StoreView {
        let state = self.state.read().await;
        StoreView {
            version: state.version,
            fragments: state.fragments.values().cloned().collect(),
        }
    }

    /// Whether the store has grown past its configured size.
    pub async fn over_capacity(&self) -> bool {
        self.len().await > self.max_fragments
    }

    /// Compress the whole store in place.
    pub async fn compact(&self) -> CompactionReport {
        let mut state = self.state.write().await;
        let before = state.fragments.len();
        let all: Vec<Fragment> = state.fragments.values().cloned().collect();
        let result = compress_fragments(all, self.mode);

        let changed = result.compacted.len() != before
            || result
                .compacted
                .iter()
                .any(|f| state.fragments.get(&f.id) != Some(f));
        if changed {
            state.fragments = result
                .compacted
                .into_iter()
                .map(|f| (f.id.clone(), f))
                .collect();
            state.version += 1;
        }
        state.last_ratio = Some(result.ratio);

        let after = state.fragments.len();
        info!(before, after, ratio = result.ratio, "Store compacted");
        CompactionReport {
            before,
            after,
            ratio: result.ratio,
        }
    }

    /// Apply a consolidation round atomically.
    ///
    /// Every replaced id must be live and replaced at most once, and merged
    /// ids must not collide with fragments that stay. On any violation
    /// nothing is applied. Returns the number of fragments eliminated.
    pub async fn apply_round(&self, merges: Vec<Merge>) -> Result<usize, MemoryError> {
        if merges.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write().await;

        let mut replaced: BTreeSet<&str> = BTreeSet::new();
        for merge in &merges {
            if merge.replaces.is_empty() {
                return Err(MemoryError::Conflict(format!(
                    "merge '{}' replaces nothing",
                    merge.merged.id
                )));
            }
            for id in &merge.replaces {
                if !state.fragments.contains_key(id) {
                    return Err(MemoryError::Conflict(format!(
                        "fragment '{id}' is no longer live"
                    )));
                }
                if !replaced.insert(id) {
                    return Err(MemoryError::Conflict(format!(
                        "fragment '{id}' is merged twice in one round"
                    )));
                }
            }
        }
        let mut merged_ids: BTreeSet<&str> = BTreeSet::new();
        for merge in &merges {
            let id = merge.merged.id.as_str();
            let collides = state.fragments.contains_key(id) && !replaced.contains(id);
            if collides || !merged_ids.insert(id) {
                return Err(MemoryError::Conflict(format!(
                    "merged id '{id}' collides with a live fragment"
                )));
            }
        }

        let removed = replaced.len();
        let replaced: Vec<String> = replaced.into_iter().map(String::from).collect();
        for id in &replaced {
            state.fragments.remove(id);
        }
        let added = merges.len();
        for merge in merges {
            state.fragments.insert(merge.merged.id.clone(), merge.merged);
        }
        state.version += 1;

        Ok(removed - added)
    }

    /// Fragments most similar to `embedding`.
    pub async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Vec<(f32, Fragment)> {
        let fragments = self.fragments().await;
        vector_search(&fragments, embedding, limit, min_score)
    }

    /// Live fragments as allocator candidates.
    ///
    /// Each span keeps the fragment id, is costed by `cost_of` (at least 1)
    /// and takes the concept signature as its topic, so near-duplicates
    /// compete under the diversity penalty.
    pub async fn to_spans(&self, cost_of: impl Fn(&str) -> u64) -> Vec<Span> {
        let state = self.state.read().await;
        state
            .fragments
            .values()
            .map(|f| {
                let span = Span::new(
                    f.id.clone(),
                    f.content.clone(),
                    SpanCategory::Memory,
                    cost_of(&f.content).max(1),
                );
                let topic = concepts::signature(&f.content);
                if topic.is_empty() {
                    span
                } else {
                    span.with_topic(topic)
                }
            })
            .collect()
    }

    /// Replace the whole set (snapshot restore).
    pub async fn replace_all(&self, fragments: Vec<Fragment>) {
        let mut state = self.state.write().await;
        state.fragments = fragments.into_iter().map(|f| (f.id.clone(), f)).collect();
        state.version += 1;
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        StoreStats {
            fragments: state.fragments.len(),
            compacted: state.fragments.values().filter(|f| f.is_compacted()).count(),
            version: state.version,
            last_compaction_ratio: state.last_ratio,
            rejected_total: state.rejected,
        }
    }
}

impl Default for FragmentStore {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

//! The memory engine: one handle that wires store, consolidator, pulse,
//! classifier, allocator and resilience together.
//!
//! ```text
//!   ingest ──▶ FragmentStore ◀── Consolidator ◀── background task (interval)
//!                 │                   │
//!                 ▼                   ▼
//!   assemble_context            ResilientEmbedder (retry, breaker, timeout)
//!     classify → to_spans → allocate
//! ```
//!
//! Every public operation counts as one pulse tick. Context assembly only
//! reads the store, so it never waits for a consolidation run in flight.

use chrono::{DateTime, Utc};
use mnemo_config::AppConfig;
use mnemo_core::{
    Allocation, CategoryMixture, DomainEvent, Embedder, Error, EventBus, Fragment, PulseSnapshot,
    RawFragment, Span, ValueAssessment, concepts,
};
use mnemo_memory::{
    ConsolidationOutcome, ConsolidationPhase, Consolidator, FragmentStore, IngestReport,
    RunStatus, Snapshot, SnapshotFile, StoreStats,
};
use mnemo_providers::{BreakerSnapshot, CircuitBreaker};
use mnemo_telemetry::{MonotonicClock, PulseMonitor, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::classifier::ValueClassifier;
use crate::context::allocator::ContextAllocator;
use crate::context::token;

const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// What the generation step receives for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPlan {
    pub assessment: ValueAssessment,
    pub allocation: Allocation,
}

/// Everything the presentation layer shows about the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub pulse: PulseSnapshot,
    pub store: StoreStats,
    pub breaker: BreakerSnapshot,
    pub phase: ConsolidationPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_consolidation: Option<ConsolidationOutcome>,
}

pub struct MemoryCore {
    config: AppConfig,
    store: FragmentStore,
    consolidator: Consolidator,
    pulse: PulseMonitor,
    breaker: Arc<CircuitBreaker>,
    classifier: ValueClassifier,
    allocator: ContextAllocator,
    events: EventBus,
    last_consolidation: Mutex<Option<ConsolidationOutcome>>,
}

impl MemoryCore {
    /// Build the engine from configuration with the configured embedder.
    pub fn new(config: AppConfig) -> Self {
        let (embedder, breaker) = mnemo_providers::build_from_config(&config);
        Self::with_parts(config, embedder, breaker, Arc::new(SystemClock::new()))
    }

    /// Build the engine around an explicit embedder, breaker and clock.
    ///
    /// `embedder` is used as given; wrap it in a `ResilientEmbedder` sharing
    /// `breaker` to get retries and circuit breaking.
    pub fn with_parts(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        let embedder_name = embedder.name().to_string();
        let store = FragmentStore::new(&config.memory);
        let consolidator = Consolidator::new(store.clone(), embedder, config.consolidation.clone());
        let pulse = PulseMonitor::with_clock(config.pulse.clone(), clock);
        let allocator = ContextAllocator::from_config(&config.allocator);

        info!(
            embedder = %embedder_name,
            compression = config.memory.compression_mode.as_str(),
            "Memory core initialized"
        );

        Self {
            config,
            store,
            consolidator,
            pulse,
            breaker,
            classifier: ValueClassifier::new(),
            allocator,
            events: EventBus::default(),
            last_consolidation: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    pub fn pulse(&self) -> &PulseMonitor {
        &self.pulse
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Ingest one fragment, compacting the store if it grew past capacity.
    pub async fn ingest(&self, raw: RawFragment) -> Result<Fragment, Error> {
        let mut tick = self.pulse.begin_tick();
        let fragment = self.store.ingest(raw).await?;
        tick.mark_active();

        self.events.publish(DomainEvent::FragmentIngested {
            fragment_id: fragment.id.clone(),
            timestamp: Utc::now(),
        });
        self.compact_if_needed().await;
        Ok(fragment)
    }

    /// Ingest a batch; malformed entries are counted, not fatal.
    pub async fn ingest_many(&self, raws: &[RawFragment]) -> IngestReport {
        let mut tick = self.pulse.begin_tick();
        let report = self.store.ingest_many(raws).await;
        tick.set_active(!report.accepted.is_empty());

        for id in &report.accepted {
            self.events.publish(DomainEvent::FragmentIngested {
                fragment_id: id.clone(),
                timestamp: Utc::now(),
            });
        }
        self.compact_if_needed().await;
        report
    }

    async fn compact_if_needed(&self) {
        if !self.store.over_capacity().await {
            return;
        }
        let report = self.store.compact().await;
        self.events.publish(DomainEvent::CompactionCompleted {
            before: report.before,
            after: report.after,
            ratio: report.ratio,
            timestamp: Utc::now(),
        });
        if self.store.over_capacity().await {
            warn!(
                fragments = report.after,
                max = self.config.memory.max_fragments,
                "Store still over capacity after compaction"
            );
        }
    }

    /// Classify `text` and allocate context for it.
    ///
    /// Candidates are `extra` followed by every live fragment; on an id
    /// clash the caller's span wins. Fragment spans gain relevance for each
    /// concept they share with `text`. Without a mixture the configured
    /// default is used.
    pub async fn assemble_context(
        &self,
        text: &str,
        extra: &[Span],
        mixture: Option<&CategoryMixture>,
    ) -> Result<ContextPlan, Error> {
        let mut tick = self.pulse.begin_tick();
        tick.mark_active();

        let assessment = self.classifier.classify(text);
        let query = concepts::extract(text);

        let mut spans = extra.to_vec();
        for span in self.store.to_spans(token::span_cost).await {
            let overlap = if query.is_empty() {
                0.0
            } else {
                let shared = concepts::extract(&span.content)
                    .intersection(&query)
                    .count();
                shared as f64 / query.len() as f64
            };
            spans.push(span.with_relevance(1.0 + overlap));
        }

        let mixture = mixture.unwrap_or(self.allocator.default_mixture());
        let allocation = self
            .allocator
            .allocate(&spans, assessment.max_budget, mixture)?;

        debug!(
            tier = %assessment.tier,
            candidates = spans.len(),
            chosen = allocation.chosen.len(),
            "Context assembled"
        );
        self.events.publish(DomainEvent::ContextAllocated {
            tier: assessment.tier.to_string(),
            spans: allocation.chosen.len(),
            budget_used: allocation.budget_used,
            budget_total: allocation.budget_total,
            timestamp: Utc::now(),
        });

        Ok(ContextPlan {
            assessment,
            allocation,
        })
    }

    /// Run one consolidation pass, choosing hot or cold path from the
    /// current pulse.
    pub async fn run_consolidation(&self, idempotency_key: Option<&str>) -> ConsolidationOutcome {
        let hint = self.pulse.snapshot().activity_hint();
        let outcome = self.consolidator.run(idempotency_key, Some(hint)).await;
        self.record_outcome(&outcome);
        outcome
    }

    /// Like [`run_consolidation`](Self::run_consolidation) with an explicit
    /// similarity threshold.
    pub async fn consolidate_with_threshold(
        &self,
        threshold: f32,
        idempotency_key: Option<&str>,
    ) -> ConsolidationOutcome {
        let hint = self.pulse.snapshot().activity_hint();
        let outcome = self
            .consolidator
            .consolidate(threshold, idempotency_key, Some(hint))
            .await;
        self.record_outcome(&outcome);
        outcome
    }

    fn record_outcome(&self, outcome: &ConsolidationOutcome) {
        let event = match &outcome.status {
            RunStatus::Completed => DomainEvent::ConsolidationFinished {
                merged_count: outcome.merged_count,
                mode: outcome.mode.to_string(),
                replayed: outcome.replayed,
                timestamp: Utc::now(),
            },
            RunStatus::Failed { reason } => DomainEvent::ConsolidationFailed {
                reason: reason.clone(),
                timestamp: Utc::now(),
            },
        };
        self.events.publish(event);
        *self
            .last_consolidation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
    }

    /// Run consolidation every `every` on a background task until the
    /// returned handle is shut down. A run in flight at shutdown is dropped;
    /// the store only ever sees whole rounds.
    pub fn spawn_consolidation(self: &Arc<Self>, every: Duration) -> BackgroundConsolidation {
        let every = every.max(MIN_INTERVAL);
        let core = Arc::clone(self);
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            info!(interval_ms = every.as_millis() as u64, "Background consolidation started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::select! {
                            outcome = core.run_consolidation(None) => {
                                debug!(
                                    merged = outcome.merged_count,
                                    mode = %outcome.mode,
                                    "Background consolidation pass"
                                );
                            }
                            _ = stop.changed() => break,
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            info!("Background consolidation stopped");
        });

        BackgroundConsolidation { shutdown, handle }
    }

    /// Current state for presentation.
    pub async fn status(&self) -> StatusReport {
        StatusReport {
            generated_at: Utc::now(),
            pulse: self.pulse.snapshot(),
            store: self.store.stats().await,
            breaker: self.breaker.snapshot(),
            phase: self.consolidator.phase(),
            last_consolidation: self
                .last_consolidation
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Persist store contents and pulse history.
    pub async fn save_snapshot(&self, file: &SnapshotFile) -> Result<(), Error> {
        let snapshot = Snapshot::new(self.store.fragments().await, self.pulse.record());
        file.save(&snapshot).await?;
        Ok(())
    }

    /// Load a snapshot if one exists. Returns whether anything was restored.
    pub async fn restore_snapshot(&self, file: &SnapshotFile) -> Result<bool, Error> {
        let Some(snapshot) = file.load().await? else {
            return Ok(false);
        };
        info!(
            fragments = snapshot.fragments.len(),
            saved_at = %snapshot.saved_at,
            "Restoring snapshot"
        );
        self.store.replace_all(snapshot.fragments).await;
        self.pulse.restore(&snapshot.pulse);
        Ok(true)
    }
}

/// Handle to the background consolidation task.
pub struct BackgroundConsolidation {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundConsolidation {
    /// Signal the task to stop and wait for it.
    pub async fn shutdown(self) {
        // The task may already be gone
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Background consolidation task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

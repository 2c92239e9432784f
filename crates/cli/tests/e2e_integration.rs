//! End-to-end integration tests for the Mnemo memory engine.
//!
//! These tests drive the full pipeline through `MemoryCore`: ingestion,
//! compaction, consolidation behind the resilience wrapper, context
//! allocation and snapshot persistence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use mnemo_agent::MemoryCore;
use mnemo_config::{AppConfig, ResilienceConfig};
use mnemo_core::{
    CategoryMixture, Embedder, RawFragment, ResilienceError, Span, SpanCategory, ValueTier,
};
use mnemo_memory::{ConsolidationMode, SnapshotFile};
use mnemo_providers::{BreakerStatus, HashingEmbedder, ResilientEmbedder};
use mnemo_telemetry::ManualClock;

// ── Mock Embedder ────────────────────────────────────────────────────────

/// Hashing embedder that can be switched off to simulate an outage.
struct SwitchableEmbedder {
    inner: HashingEmbedder,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableEmbedder {
    fn new(healthy: bool) -> Self {
        Self {
            inner: HashingEmbedder::default(),
            healthy: AtomicBool::new(healthy),
            calls: AtomicUsize::new(0),
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Embedder for SwitchableEmbedder {
    fn name(&self) -> &str {
        "switchable"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ResilienceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(ResilienceError::Failed {
                operation: "embed".into(),
                reason: "service unavailable".into(),
            });
        }
        self.inner.embed(text).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn resilient_core(
    config: AppConfig,
    embedder: Arc<SwitchableEmbedder>,
) -> MemoryCore {
    let resilient = ResilientEmbedder::from_config(embedder, &config.resilience);
    let breaker = resilient.breaker().clone();
    MemoryCore::with_parts(
        config,
        Arc::new(resilient),
        breaker,
        Arc::new(ManualClock::stepping(1.0)),
    )
}

fn old(id: &str, content: &str) -> RawFragment {
    RawFragment::text(content)
        .with_id(id)
        .with_created_at(Utc::now() - chrono::Duration::days(2))
}

async fn seed_duplicates(core: &MemoryCore) {
    core.ingest(old("a", "Kafka consumer lag spiked during the nightly batch"))
        .await
        .unwrap();
    core.ingest(old("b", "kafka consumer LAG spiked during the nightly batch!"))
        .await
        .unwrap();
    core.ingest(old("c", "The customer asked about the refund policy"))
        .await
        .unwrap();
}

// ── Pipeline ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_ingest_compact_and_allocate() {
    let mut config = AppConfig::default();
    config.memory.max_fragments = 4;
    let core = MemoryCore::with_parts(
        config,
        Arc::new(HashingEmbedder::default()),
        Arc::new(mnemo_providers::CircuitBreaker::from_config(
            "embedder",
            &ResilienceConfig::default(),
        )),
        Arc::new(ManualClock::stepping(0.5)),
    );

    let noisy = [
        "um, the deploy pipeline failed on staging",
        "the deploy pipeline failed on staging, you know",
        "Deploy pipeline FAILED on staging",
        "user prefers concise answers",
        "like, user prefers concise answers",
    ];
    for text in noisy {
        core.ingest(RawFragment::text(text)).await.unwrap();
    }

    // Crossing capacity compacts the near-duplicates
    let fragments = core.store().fragments().await;
    assert_eq!(fragments.len(), 2);
    let provenance: usize = fragments.iter().map(|f| f.source_refs.len()).sum();
    assert_eq!(provenance, 5);

    let extra = vec![
        Span::new("turn-1", "why did staging break?", SpanCategory::RecentTurn, 8)
            .with_topic("staging"),
        Span::new("err-1", "earlier answer blamed DNS", SpanCategory::ErrorEpoch, 8)
            .with_topic("dns"),
    ];
    let plan = core
        .assemble_context(
            "Why does the deploy pipeline keep failing on staging, and what should we change?",
            &extra,
            None,
        )
        .await
        .unwrap();

    assert!(plan.assessment.tier >= ValueTier::Low);
    assert!(plan.allocation.budget_used <= plan.assessment.max_budget);
    let topics: BTreeSet<String> = plan.allocation.chosen.iter().map(|s| s.topic_key()).collect();
    assert!(topics.len() >= 2);
}

#[tokio::test]
async fn e2e_trivial_input_gets_tiny_budget() {
    let core = MemoryCore::new(AppConfig::default());
    core.ingest(RawFragment::text("a long remembered fact about the project roadmap"))
        .await
        .unwrap();

    let plan = core.assemble_context("hey", &[], None).await.unwrap();
    assert_eq!(plan.assessment.tier, ValueTier::Trivial);
    assert!(plan.assessment.max_budget <= 15);
    assert!(plan.allocation.budget_used <= plan.assessment.max_budget);
}

#[tokio::test]
async fn e2e_mixture_steers_allocation() {
    let core = MemoryCore::new(AppConfig::default());
    let spans = vec![
        Span::new("err", "the bot misread the question", SpanCategory::ErrorEpoch, 40),
        Span::new("aux", "background on the billing system", SpanCategory::AuxDep, 40),
    ];
    let errors_only = CategoryMixture::new()
        .with("error_epoch", 1.0)
        .with("aux_dep", 0.0)
        .with("memory", 0.0);

    let plan = core
        .assemble_context(
            "Can you explain again why the invoice total was wrong last time?",
            &spans,
            Some(&errors_only),
        )
        .await
        .unwrap();
    assert_eq!(plan.allocation.chosen_ids(), vec!["err"]);
}

// ── Consolidation & Resilience ───────────────────────────────────────────

#[tokio::test]
async fn e2e_consolidation_merges_only_old_fragments() {
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let core = resilient_core(AppConfig::default(), embedder);
    seed_duplicates(&core).await;
    // Fresh copy of an old fragment stays untouched
    core.ingest(RawFragment::text("Kafka consumer lag spiked during the nightly batch").with_id("d"))
        .await
        .unwrap();

    let outcome = core.run_consolidation(Some("run-1")).await;
    assert!(!outcome.is_failed());
    assert_eq!(outcome.merged_count, 1);

    let store = core.store();
    assert_eq!(store.len().await, 3);
    assert!(store.get("d").await.is_some());
    assert!(store.get("c").await.is_some());

    // Unchanged store: the key replays without another embedding call
    let replay = core.run_consolidation(Some("run-1")).await;
    assert!(replay.replayed);
    assert_eq!(replay.merged_count, outcome.merged_count);
}

#[tokio::test(start_paused = true)]
async fn e2e_breaker_opens_then_recovers() {
    let mut config = AppConfig::default();
    config.resilience = ResilienceConfig {
        max_retries: 1,
        breaker_threshold: 2,
        breaker_cooldown_secs: 30,
        ..ResilienceConfig::default()
    };
    let embedder = Arc::new(SwitchableEmbedder::new(false));
    let core = resilient_core(config, embedder.clone());
    seed_duplicates(&core).await;
    let before = core.store().fragments().await;

    for _ in 0..2 {
        assert!(core.run_consolidation(None).await.is_failed());
    }
    assert_eq!(core.status().await.breaker.status, BreakerStatus::Open);
    let calls = embedder.calls();

    // Open breaker short-circuits without touching the embedder
    let outcome = core.run_consolidation(None).await;
    assert!(outcome.is_failed());
    assert_eq!(embedder.calls(), calls);
    assert_eq!(core.store().fragments().await, before);

    embedder.set_healthy(true);
    tokio::time::advance(Duration::from_secs(31)).await;

    let recovered = core.run_consolidation(None).await;
    assert!(!recovered.is_failed());
    assert_eq!(recovered.merged_count, 1);
    let status = core.status().await;
    assert_eq!(status.breaker.status, BreakerStatus::Closed);
    assert_eq!(status.breaker.failure_count, 0);
}

#[tokio::test]
async fn e2e_pulse_selects_consolidation_path() {
    let idle = resilient_core(AppConfig::default(), Arc::new(SwitchableEmbedder::new(true)));
    let outcome = idle.run_consolidation(None).await;
    assert_eq!(outcome.mode, ConsolidationMode::ColdPath);

    let busy = resilient_core(AppConfig::default(), Arc::new(SwitchableEmbedder::new(true)));
    for i in 0..10 {
        busy.ingest(RawFragment::text(format!("event number {i} arrived")))
            .await
            .unwrap();
    }
    assert!(busy.status().await.pulse.bpm > 0.02);
    let outcome = busy.run_consolidation(None).await;
    assert_eq!(outcome.mode, ConsolidationMode::HotPath);
}

// ── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_snapshot_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = SnapshotFile::new(dir.path().join("state").join("snapshot.json"));

    let first = resilient_core(AppConfig::default(), Arc::new(SwitchableEmbedder::new(true)));
    seed_duplicates(&first).await;
    first.run_consolidation(None).await;
    first.save_snapshot(&file).await.unwrap();
    let saved = first.status().await;

    let second = resilient_core(AppConfig::default(), Arc::new(SwitchableEmbedder::new(true)));
    assert!(second.restore_snapshot(&file).await.unwrap());
    let restored = second.status().await;

    assert_eq!(restored.store.fragments, saved.store.fragments);
    assert_eq!(restored.store.compacted, saved.store.compacted);
    assert_eq!(
        second.pulse().record().active_ticks,
        first.pulse().record().active_ticks
    );

    let json = serde_json::to_value(&restored).unwrap();
    assert!(json["pulse"]["tick_counter"].as_u64().is_some());
}

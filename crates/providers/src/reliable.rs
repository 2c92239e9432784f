//! Resilience wrapper: retry, circuit breaker and timeout around
//! cross-boundary calls.
//!
//! Each attempt asks the breaker first, then runs the call under a
//! `tokio::time::timeout`. Success and failure (a timeout counts as one
//! failure) are reported to the breaker. The whole attempt is driven by a
//! [`RetryPolicy`], which never retries a short-circuited call.

use async_trait::async_trait;
use mnemo_config::ResilienceConfig;
use mnemo_core::embedding::Embedder;
use mnemo_core::error::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::retry::RetryPolicy;

/// Retry, breaker and timeout, applied together.
#[derive(Clone)]
pub struct Resilience {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Resilience {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            breaker,
            retry,
            timeout,
        }
    }

    pub fn from_config(name: &str, config: &ResilienceConfig) -> Self {
        Self::new(
            Arc::new(CircuitBreaker::from_config(name, config)),
            RetryPolicy::from_config(config),
            config.call_timeout(),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `call` with the full policy.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.retry
            .run(operation, || self.attempt(operation, call()))
            .await
    }

    async fn attempt<T, Fut>(&self, operation: &str, call: Fut) -> Result<T, ResilienceError>
    where
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.breaker.check()?;

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Call timed out"
                );
                self.breaker.record_failure();
                Err(ResilienceError::Timeout {
                    operation: operation.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// An [`Embedder`] guarded by [`Resilience`].
pub struct ResilientEmbedder<E> {
    inner: E,
    resilience: Resilience,
}

impl<E: Embedder> ResilientEmbedder<E> {
    pub fn new(inner: E, resilience: Resilience) -> Self {
        Self { inner, resilience }
    }

    pub fn from_config(inner: E, config: &ResilienceConfig) -> Self {
        let resilience = Resilience::from_config(inner.name(), config);
        Self::new(inner, resilience)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.resilience.breaker()
    }
}

#[async_trait]
impl<E: Embedder> Embedder for ResilientEmbedder<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ResilienceError> {
        self.resilience
            .run("embed", || self.inner.embed(text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyEmbedder {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyEmbedder {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ResilienceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ResilienceError::Failed {
                    operation: "embed".into(),
                    reason: format!("failure {n}"),
                })
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    /// Never answers.
    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ResilienceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn config(max_retries: u32, threshold: u32) -> ResilienceConfig {
        ResilienceConfig {
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 100,
            breaker_threshold: threshold,
            breaker_cooldown_secs: 30,
            call_timeout_ms: 50,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_transient_failures() {
        let inner = Arc::new(FlakyEmbedder::new(2));
        let embedder = ResilientEmbedder::from_config(inner.clone(), &config(3, 5));

        let v = embedder.embed("text").await.unwrap();
        assert_eq!(v, vec![1.0, 0.0]);
        assert_eq!(inner.calls(), 3);
        assert_eq!(embedder.breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_without_calling() {
        let inner = Arc::new(FlakyEmbedder::new(u32::MAX));
        let embedder = ResilientEmbedder::from_config(inner.clone(), &config(1, 5));

        for _ in 0..5 {
            let err = embedder.embed("text").await.unwrap_err();
            assert!(matches!(err, ResilienceError::Failed { .. }));
        }
        assert_eq!(embedder.breaker().status(), BreakerStatus::Open);
        assert_eq!(inner.calls(), 5);

        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, ResilienceError::BreakerOpen { .. }));
        assert_eq!(inner.calls(), 5);
        assert_eq!(embedder.breaker().failure_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opening_mid_retry_stops_retrying() {
        let inner = Arc::new(FlakyEmbedder::new(u32::MAX));
        let embedder = ResilientEmbedder::from_config(inner.clone(), &config(10, 2));

        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, ResilienceError::BreakerOpen { .. }));
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_distinct_and_counts_once() {
        let embedder = ResilientEmbedder::from_config(HangingEmbedder, &config(1, 5));

        let err = embedder.embed("text").await.unwrap_err();
        match err {
            ResilienceError::Timeout { operation, timeout } => {
                assert_eq!(operation, "embed");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("Expected Timeout, got: {other:?}"),
        }
        assert_eq!(embedder.breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_cooldown_recovers() {
        let inner = Arc::new(FlakyEmbedder::new(2));
        let embedder = ResilientEmbedder::from_config(inner.clone(), &config(1, 2));

        assert!(embedder.embed("a").await.is_err());
        assert!(embedder.embed("b").await.is_err());
        assert_eq!(embedder.breaker().status(), BreakerStatus::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(embedder.embed("c").await.is_ok());
        assert_eq!(embedder.breaker().status(), BreakerStatus::Closed);
        assert_eq!(inner.calls(), 3);
    }
}

//! Configuration loading, validation, and management for Mnemo.
//!
//! Loads configuration from `~/.mnemo/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.mnemo/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fragment store and compaction
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Background consolidation
    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    /// Activity pulse monitor
    #[serde(default)]
    pub pulse: PulseConfig,

    /// Context budget allocation
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Retry, circuit breaker and timeouts for cross-boundary calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Embedding capability
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the compressor groups fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// Group by extracted concept signature (near-duplicates collapse)
    #[default]
    Semantic,
    /// Group by normalized content only
    Exact,
}

impl CompressionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Exact => "exact",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub compression_mode: CompressionMode,

    /// Store size that triggers an in-place compaction on ingest
    #[serde(default = "default_max_fragments")]
    pub max_fragments: usize,

    /// Where snapshots are written (defaults to `~/.mnemo/snapshot.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

fn default_max_fragments() -> usize {
    10_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            compression_mode: CompressionMode::default(),
            max_fragments: default_max_fragments(),
            snapshot_path: None,
        }
    }
}

/// Which fragments are too fresh to be merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FreshnessPolicy {
    /// Anything created on the current UTC day
    CalendarDay,
    /// Anything created within the last `seconds`
    Rolling { seconds: u64 },
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::CalendarDay
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Minimum cosine similarity for two fragments to merge
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Activity rate (events/sec) above which the hot path is taken
    #[serde(default = "default_hot_path_threshold")]
    pub hot_path_threshold_bpm: f64,

    /// Eligible fragments considered per hot-path run
    #[serde(default = "default_hot_path_batch")]
    pub hot_path_batch: usize,

    /// Upper bound on merge rounds per cold-path run
    #[serde(default = "default_cold_path_max_rounds")]
    pub cold_path_max_rounds: usize,

    /// Background consolidation interval
    #[serde(default = "default_consolidation_interval")]
    pub interval_secs: u64,

    /// How many idempotency keys are remembered
    #[serde(default = "default_idempotency_cache_size")]
    pub idempotency_cache_size: usize,

    #[serde(default)]
    pub freshness: FreshnessPolicy,
}

fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_hot_path_threshold() -> f64 {
    0.02
}
fn default_hot_path_batch() -> usize {
    64
}
fn default_cold_path_max_rounds() -> usize {
    8
}
fn default_consolidation_interval() -> u64 {
    300
}
fn default_idempotency_cache_size() -> usize {
    64
}

impl ConsolidationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            hot_path_threshold_bpm: default_hot_path_threshold(),
            hot_path_batch: default_hot_path_batch(),
            cold_path_max_rounds: default_cold_path_max_rounds(),
            interval_secs: default_consolidation_interval(),
            idempotency_cache_size: default_idempotency_cache_size(),
            freshness: FreshnessPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Maximum number of active ticks remembered
    #[serde(default = "default_pulse_capacity")]
    pub capacity: usize,

    /// Expected heartbeat spacing; windows are clamped to 4x this
    #[serde(default = "default_nominal_window")]
    pub nominal_window_secs: f64,

    /// Lower clamp applied to the heartbeat window
    #[serde(default = "default_min_window")]
    pub min_window_secs: f64,
}

fn default_pulse_capacity() -> usize {
    100_000
}
fn default_nominal_window() -> f64 {
    600.0
}
fn default_min_window() -> f64 {
    1.0
}

impl PulseConfig {
    /// Upper clamp for the heartbeat window.
    pub fn max_window_secs(&self) -> f64 {
        self.nominal_window_secs * 4.0
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            capacity: default_pulse_capacity(),
            nominal_window_secs: default_nominal_window(),
            min_window_secs: default_min_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Multiplier applied per already-chosen span sharing a topic
    #[serde(default = "default_diversity_penalty")]
    pub diversity_penalty: f64,

    /// Mixture used when the caller supplies none
    #[serde(default)]
    pub default_mixture: BTreeMap<String, f64>,
}

fn default_diversity_penalty() -> f64 {
    0.5
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            diversity_penalty: default_diversity_penalty(),
            default_mixture: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Total attempts per call (including the first)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Consecutive failures that open the breaker
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// Time an open breaker waits before admitting a probe
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,

    /// Bound on a single embedding call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    30
}
fn default_call_timeout_ms() -> u64 {
    2_000
}

impl ResilienceConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider ("hashing" is the built-in offline embedder)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hashing".into()
}
fn default_dimensions() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.mnemo/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `MNEMO_LOG_LEVEL`
    /// - `MNEMO_SNAPSHOT_PATH`
    /// - `MNEMO_SIMILARITY_THRESHOLD`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = std::env::var("MNEMO_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(path) = std::env::var("MNEMO_SNAPSHOT_PATH") {
            self.memory.snapshot_path = Some(PathBuf::from(path));
        }

        if let Ok(raw) = std::env::var("MNEMO_SIMILARITY_THRESHOLD") {
            self.consolidation.similarity_threshold = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "MNEMO_SIMILARITY_THRESHOLD must be a number, got '{raw}'"
                ))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mnemo")
    }

    /// Where snapshots are read from and written to.
    pub fn snapshot_path(&self) -> PathBuf {
        self.memory
            .snapshot_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("snapshot.json"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        let c = &self.consolidation;
        if !(c.similarity_threshold > 0.0 && c.similarity_threshold <= 1.0) {
            return fail("consolidation.similarity_threshold must be in (0.0, 1.0]");
        }
        if !c.hot_path_threshold_bpm.is_finite() || c.hot_path_threshold_bpm < 0.0 {
            return fail("consolidation.hot_path_threshold_bpm must be >= 0");
        }
        if c.hot_path_batch < 2 {
            return fail("consolidation.hot_path_batch must be >= 2");
        }
        if c.cold_path_max_rounds == 0 {
            return fail("consolidation.cold_path_max_rounds must be > 0");
        }

        let p = &self.pulse;
        if p.capacity == 0 {
            return fail("pulse.capacity must be > 0");
        }
        if !(p.nominal_window_secs > 0.0) {
            return fail("pulse.nominal_window_secs must be > 0");
        }
        if !(p.min_window_secs > 0.0) || p.min_window_secs > p.max_window_secs() {
            return fail("pulse.min_window_secs must be > 0 and <= 4 * nominal_window_secs");
        }

        if !(0.0..=1.0).contains(&self.allocator.diversity_penalty) {
            return fail("allocator.diversity_penalty must be between 0.0 and 1.0");
        }
        if self
            .allocator
            .default_mixture
            .values()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return fail("allocator.default_mixture weights must be finite and >= 0");
        }

        let r = &self.resilience;
        if r.max_retries == 0 {
            return fail("resilience.max_retries must be >= 1");
        }
        if r.breaker_threshold == 0 {
            return fail("resilience.breaker_threshold must be >= 1");
        }
        if r.call_timeout_ms == 0 {
            return fail("resilience.call_timeout_ms must be > 0");
        }

        if self.embedding.dimensions == 0 {
            return fail("embedding.dimensions must be > 0");
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

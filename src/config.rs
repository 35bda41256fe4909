use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::semantic::cache::DEFAULT_CACHE_CAPACITY;
use crate::semantic::context::DEFAULT_CONTEXT_CHARS;
use crate::semantic::preprocess::DEFAULT_MAX_CHUNK_TOKENS;
use crate::semantic::ranker::{DEFAULT_MAX_RESULTS, DEFAULT_RECENCY_WEIGHT, DEFAULT_THRESHOLD};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model (bge-base offers +13% accuracy vs MiniLM)
const DEFAULT_EMBEDDING_MODEL: &str = "bge-base-en-v1.5";
/// Output dimension of the default model
const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Default recency half-life: 30 days
const DEFAULT_HALF_LIFE_HOURS: f64 = 720.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Maximum tokens per chunk
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
        }
    }
}

/// Configuration for the embedding adapter and provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector length produced by `model`
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Chunks sent to the provider per call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per provider call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for a single provider call in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum cached vectors
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Default similarity threshold [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Share of the combined score given to recency [0.0, 1.0]
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Hours until a note's recency score halves
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            recency_weight: DEFAULT_RECENCY_WEIGHT,
            half_life_hours: DEFAULT_HALF_LIFE_HOURS,
        }
    }
}

impl RankingConfig {
    pub fn half_life(&self) -> Duration {
        Duration::from_secs_f64(self.half_life_hours * 3600.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Character budget for assembled context
    #[serde(default = "default_context_chars")]
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CONTEXT_CHARS,
        }
    }
}

fn default_max_chunk_tokens() -> usize {
    DEFAULT_MAX_CHUNK_TOKENS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_recency_weight() -> f32 {
    DEFAULT_RECENCY_WEIGHT
}

fn default_half_life_hours() -> f64 {
    DEFAULT_HALF_LIFE_HOURS
}

fn default_context_chars() -> usize {
    DEFAULT_CONTEXT_CHARS
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl RecallConfig {
    pub fn validate(&self) -> Result<()> {
        if self.normalizer.max_chunk_tokens == 0 {
            bail!("normalizer.max_chunk_tokens must be greater than 0");
        }

        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if emb.dimension == 0 {
            bail!("embedding.dimension must be greater than 0");
        }
        if emb.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if emb.max_attempts == 0 {
            bail!("embedding.max_attempts must be greater than 0");
        }
        if emb.initial_backoff_ms > emb.max_backoff_ms {
            bail!(
                "embedding.initial_backoff_ms ({}) cannot exceed embedding.max_backoff_ms ({})",
                emb.initial_backoff_ms,
                emb.max_backoff_ms
            );
        }
        if emb.request_timeout_secs == 0 {
            bail!("embedding.request_timeout_secs must be greater than 0");
        }
        if emb.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        let rank = &self.ranking;
        if !(0.0..=1.0).contains(&rank.threshold) {
            bail!(
                "ranking.threshold must be between 0.0 and 1.0, got {}",
                rank.threshold
            );
        }
        if rank.max_results == 0 {
            bail!("ranking.max_results must be greater than 0");
        }
        if !(0.0..=1.0).contains(&rank.recency_weight) {
            bail!(
                "ranking.recency_weight must be between 0.0 and 1.0, got {}",
                rank.recency_weight
            );
        }
        if !(rank.half_life_hours.is_finite() && rank.half_life_hours > 0.0) {
            bail!(
                "ranking.half_life_hours must be a positive number, got {}",
                rank.half_life_hours
            );
        }

        if self.context.max_chars == 0 {
            bail!("context.max_chars must be greater than 0");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults when it is missing.
    pub fn load_with(base_path: &Path) -> Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("Failed to create {}", base_path.display()))?;
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&path, defaults)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Created default config at {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("Config {} is malformed", path.display()))?;

        config.validate()?;

        Ok(config)
    }
}

//! Embedding provider boundary and the local fastembed provider.
//!
//! The engine only talks to [`EmbeddingProvider`]; concrete transports live
//! behind it. [`EmbeddingModel`] is the built-in provider:
//! - Model download with configurable cache directory
//! - Batch embedding generation on a blocking thread

use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Failure reported by an embedding or generation provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider throttled the request")]
    Throttled,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Rejected(_))
    }
}

/// Turns texts into vectors under a named model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` with `model_id`, one vector per text, in input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        model_id: &str,
    ) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimensions: usize,
}

/// Error type for model initialization
#[derive(Debug, thiserror::Error)]
pub enum ModelInitError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, ModelInitError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        log::debug!(
            "loading embedding model '{}' (download timeout {}s)",
            model_name,
            timeout.as_secs()
        );

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            ModelInitError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| ModelInitError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Get the embedding dimensions for this model
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, ModelInitError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            _ => Err(ModelInitError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, ModelInitError> {
        let test_embeddings = model.embed(vec!["test"], None).map_err(|e| {
            ModelInitError::InitFailed(format!("Failed to probe dimensions: {}", e))
        })?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| ModelInitError::InitFailed("Model returned no embedding".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingModel {
    async fn embed_batch(
        &self,
        texts: &[String],
        model_id: &str,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if !model_id.eq_ignore_ascii_case(&self.model_name) {
            return Err(ProviderError::Rejected(format!(
                "model '{}' is not loaded (have '{}')",
                model_id, self.model_name
            )));
        }
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                ProviderError::Unavailable(format!("Failed to acquire model lock: {}", e))
            })?;
            model
                .embed(texts, None)
                .map_err(|e| ProviderError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|e| ProviderError::Unavailable(format!("embedding task failed: {}", e)))?
    }
}

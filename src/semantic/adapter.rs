//! Chunk-to-vector adapter over an [`EmbeddingProvider`].
//!
//! Provides:
//! - Batching into provider-sized groups (transparent to callers)
//! - Content-hash caching per model
//! - Bounded retries with exponential backoff and per-call timeouts
//! - Dimension checking against the configured model

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::semantic::cache::{cache_key, CacheKey, EmbeddingCache};
use crate::semantic::embeddings::{EmbeddingProvider, ProviderError};
use crate::semantic::preprocess::Chunk;
use crate::semantic::retry::{RetryFailure, RetryPolicy};

/// Vector for one chunk of one note.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    /// Note the vector belongs to
    pub note_id: String,
    /// Chunk position within the note
    pub chunk_index: usize,
    /// Model that produced the vector
    pub model_id: String,
    pub vector: Vec<f32>,
}

impl EmbeddingVector {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    /// Transient provider failures outlasted the retry budget.
    /// Callers should skip the item for now rather than abort.
    #[error("embedding unavailable after {attempts} attempts: {source}")]
    Unavailable { attempts: u32, source: ProviderError },

    #[error("embedding provider error: {0}")]
    Provider(ProviderError),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("provider returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },
}

impl From<RetryFailure> for EmbeddingError {
    fn from(failure: RetryFailure) -> Self {
        if failure.last_error.is_transient() {
            EmbeddingError::Unavailable {
                attempts: failure.attempts,
                source: failure.last_error,
            }
        } else {
            EmbeddingError::Provider(failure.last_error)
        }
    }
}

pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    model_id: String,
    dimension: usize,
    batch_size: usize,
    retry: RetryPolicy,
    cache: Mutex<EmbeddingCache>,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            model_id: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.max_backoff_ms),
                timeout: Duration::from_secs(config.request_timeout_secs),
            },
            cache: Mutex::new(EmbeddingCache::new(&config.model, config.cache_capacity)),
        }
    }

    /// Override the retry policy (mostly useful for tests).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Switch to a different model. Every cached vector is invalidated.
    pub fn set_model(&mut self, model_id: &str, dimension: usize) {
        self.model_id = model_id.to_string();
        self.dimension = dimension;
        self.cache
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .switch_model(model_id);
    }

    /// Embed chunks, returning one vector per chunk in input order.
    pub async fn embed(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if chunks.is_empty() {
            return Ok(vec![]);
        }

        let keys: Vec<CacheKey> = chunks
            .iter()
            .map(|chunk| cache_key(&self.model_id, &chunk.text))
            .collect();

        let mut resolved: HashMap<CacheKey, Arc<Vec<f32>>> = HashMap::new();
        let mut pending: Vec<(CacheKey, String)> = Vec::new();
        {
            let mut cache = self.lock_cache();
            let mut seen = HashSet::new();
            for (key, chunk) in keys.iter().zip(chunks) {
                if !seen.insert(*key) {
                    continue;
                }
                match cache.get(key) {
                    Some(vector) => {
                        resolved.insert(*key, vector);
                    }
                    None => pending.push((*key, chunk.text.clone())),
                }
            }
        }

        log::debug!(
            "embedding {} chunks: {} cached, {} to fetch",
            chunks.len(),
            resolved.len(),
            pending.len()
        );

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.fetch_batch(&texts).await?;

            let mut cache = self.lock_cache();
            for ((key, _), vector) in batch.iter().zip(vectors) {
                let vector = Arc::new(vector);
                cache.put(*key, Arc::clone(&vector));
                resolved.insert(*key, vector);
            }
        }

        chunks
            .iter()
            .zip(keys)
            .map(|(chunk, key)| {
                let vector = resolved.get(&key).ok_or(EmbeddingError::CountMismatch {
                    expected: chunks.len(),
                    got: resolved.len(),
                })?;
                Ok(EmbeddingVector {
                    note_id: chunk.note_id.clone(),
                    chunk_index: chunk.index,
                    model_id: self.model_id.clone(),
                    vector: vector.as_ref().clone(),
                })
            })
            .collect()
    }

    /// Embed ad-hoc text chunks and reduce them to a single query vector.
    pub async fn embed_query(&self, chunks: &[Chunk]) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed(chunks).await?;
        Ok(mean_vector(&vectors, self.dimension))
    }

    /// One provider round-trip with retries and shape validation.
    async fn fetch_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self
            .retry
            .run("embedding batch", || {
                self.provider.embed_batch(texts, &self.model_id)
            })
            .await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                got: bad.len(),
            });
        }

        Ok(vectors)
    }

    fn lock_cache(&self) -> MutexGuard<'_, EmbeddingCache> {
        // cached vectors stay valid even if a holder panicked
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Element-wise mean of `vectors`; a zero vector when there are none.
pub fn mean_vector(vectors: &[EmbeddingVector], dimension: usize) -> Vec<f32> {
    let mut mean = vec![0.0f32; dimension];
    if vectors.is_empty() {
        return mean;
    }

    for v in vectors {
        for (acc, x) in mean.iter_mut().zip(&v.vector) {
            *acc += x;
        }
    }

    let n = vectors.len() as f32;
    mean.iter_mut().for_each(|x| *x /= n);
    mean
}

//! Deterministic stand-ins for the embedding and generation providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::semantic::context::ContextPayload;
use crate::semantic::embeddings::{EmbeddingProvider, ProviderError};
use crate::semantic::generation::{ConversationState, GenerationProvider};
use crate::semantic::retry::RetryPolicy;

pub const TEST_MODEL: &str = "hashing-v1";
pub const TEST_DIMENSION: usize = 64;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "to", "of", "in", "on", "at", "for",
    "and", "or", "how", "do", "does", "did", "what", "which", "with", "by", "it", "this", "that",
];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("cnn", &["convolutional", "neural", "network"]),
    ("picture", &["image"]),
    ("photo", &["image"]),
    ("find", &["detect"]),
    ("spot", &["detect"]),
];

/// Bag-of-words embedding: each folded term adds 1.0 to a hashed bucket,
/// then the vector is scaled to unit length.
pub struct HashingProvider {
    dimension: usize,
    failure: Option<ProviderError>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    slow_on: Option<(String, Duration)>,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failure: None,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(vec![]),
            slow_on: None,
        }
    }

    /// Answer batches containing `needle` only after `delay`.
    pub fn slow_on(mut self, needle: &str, delay: Duration) -> Self {
        self.slow_on = Some((needle.to_string(), delay));
        self
    }

    /// Fail the first `count` calls with `error`.
    pub fn failing_first(mut self, count: usize, error: ProviderError) -> Self {
        self.failure = Some(error);
        self.failures_left = AtomicUsize::new(count);
        self
    }

    /// Fail the next `count` calls (with `Unavailable` unless configured otherwise).
    pub fn fail_from_now(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Provider calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sizes of the batches that succeeded, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in terms(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn terms(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.chars().count() < 2 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }

        let stem = if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
            &word[..word.len() - 1]
        } else {
            word.as_str()
        };

        match SYNONYMS.iter().find(|(from, _)| *from == stem) {
            Some((_, folded)) => out.extend(folded.iter().map(|t| t.to_string())),
            None => out.push(stem.to_string()),
        }
    }
    out
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        _model_id: &str,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((needle, delay)) = &self.slow_on {
            if texts.iter().any(|t| t.contains(needle.as_str())) {
                tokio::time::sleep(*delay).await;
            }
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self
                .failure
                .clone()
                .unwrap_or(ProviderError::Unavailable("scripted failure".to_string())));
        }

        self.batch_sizes.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Generator that describes what it was given instead of answering.
pub struct RecordingGenerator {
    failures_left: AtomicUsize,
    failure: ProviderError,
    calls: AtomicUsize,
    last_context: Mutex<Option<ContextPayload>>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self {
            failures_left: AtomicUsize::new(0),
            failure: ProviderError::Throttled,
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(None),
        }
    }

    pub fn failing_first(mut self, count: usize, error: ProviderError) -> Self {
        self.failures_left = AtomicUsize::new(count);
        self.failure = error;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<ContextPayload> {
        self.last_context.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    async fn generate(
        &self,
        context: &ContextPayload,
        conversation: &ConversationState,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.failure.clone());
        }

        *self.last_context.lock().unwrap() = Some(context.clone());
        Ok(format!(
            "{} excerpts for: {}",
            context.excerpts.len(),
            conversation.last_user_message().unwrap_or_default()
        ))
    }
}

pub fn test_embedding_config() -> EmbeddingConfig {
    EmbeddingConfig {
        model: TEST_MODEL.to_string(),
        dimension: TEST_DIMENSION,
        ..Default::default()
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        timeout: Duration::from_millis(500),
    }
}

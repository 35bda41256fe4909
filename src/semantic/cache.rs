//! Embedding cache keyed by chunk content and model.
//!
//! Keys are SHA256 digests of `model_id` + chunk text, so identical text
//! embedded under another model never collides. Switching the cache to a
//! different model drops every entry.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default number of cached vectors.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

pub type CacheKey = [u8; 32];

/// Compute the cache key for `text` embedded with `model_id`.
pub fn cache_key(model_id: &str, text: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// LRU store of embeddings for a single model.
pub struct EmbeddingCache {
    model_id: String,
    entries: LruCache<CacheKey, Arc<Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(model_id: &str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            model_id: model_id.to_string(),
            entries: LruCache::new(capacity),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point the cache at `model_id`, clearing it if the model changed.
    /// Returns true when entries were invalidated.
    pub fn switch_model(&mut self, model_id: &str) -> bool {
        if self.model_id == model_id {
            return false;
        }

        log::info!(
            "embedding model changed from '{}' to '{}', dropping {} cached vectors",
            self.model_id,
            model_id,
            self.entries.len()
        );
        self.model_id = model_id.to_string();
        self.entries.clear();
        true
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<Vec<f32>>> {
        self.entries.get(key).cloned()
    }

    pub fn put(&mut self, key: CacheKey, vector: Arc<Vec<f32>>) {
        self.entries.put(key, vector);
    }
}

//! Relevance ranking of indexed notes against a query vector.
//!
//! For every candidate note:
//! 1. `raw_similarity` is the best cosine similarity over the note's chunks
//! 2. `recency_score` decays exponentially with time since the last update
//! 3. `combined_score = (1 - w) * raw_similarity + w * recency_score`
//!
//! Notes whose `raw_similarity` falls below the threshold are dropped no
//! matter how recent they are. Survivors are ordered by `combined_score`
//! (desc), then `updated_at` (newest first), then `note_id` (asc).

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::semantic::index::{IndexSnapshot, IndexedNote};
use crate::semantic::lexical;

/// Default similarity floor. Model dependent; treat as a starting point.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Default number of results returned.
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Default share of the combined score given to recency.
pub const DEFAULT_RECENCY_WEIGHT: f32 = 0.2;

/// Default recency half-life (30 days).
pub const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A ranking request.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub query_vector: Vec<f32>,
    /// Minimum raw similarity, in [0, 1]
    pub threshold: f32,
    /// Maximum number of results, > 0
    pub max_results: usize,
    /// Weight of recency in the combined score, in [0, 1]
    pub recency_weight: f32,
    /// Lowercase terms used to explain matches via note tags
    pub topics: BTreeSet<String>,
}

impl MatchQuery {
    pub fn new(query_vector: Vec<f32>) -> Self {
        Self {
            query_vector,
            threshold: DEFAULT_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            recency_weight: DEFAULT_RECENCY_WEIGHT,
            topics: BTreeSet::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_recency_weight(mut self, recency_weight: f32) -> Self {
        self.recency_weight = recency_weight;
        self
    }

    pub fn with_topics(mut self, topics: BTreeSet<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Reject malformed queries before any scanning happens.
    pub fn validate(&self) -> Result<(), RankError> {
        self.validate_params()?;
        if self.query_vector.is_empty() {
            return Err(RankError::InvalidQuery("query vector is empty".to_string()));
        }
        if self.query_vector.iter().any(|x| !x.is_finite()) {
            return Err(RankError::InvalidQuery(
                "query vector contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }

    /// Check everything except the query vector, so bad requests can be
    /// refused before any text is embedded.
    pub fn validate_params(&self) -> Result<(), RankError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(RankError::InvalidQuery(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        if self.max_results == 0 {
            return Err(RankError::InvalidQuery(
                "max_results must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recency_weight) {
            return Err(RankError::InvalidQuery(format!(
                "recency_weight must be between 0.0 and 1.0, got {}",
                self.recency_weight
            )));
        }
        Ok(())
    }
}

/// One note that passed the similarity floor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub note_id: String,
    /// Chunk that produced `raw_similarity`
    pub best_chunk_index: usize,
    /// Cosine similarity of the best chunk, in [-1, 1]
    pub raw_similarity: f32,
    /// Time decay score, in [0, 1]
    pub recency_score: f32,
    pub combined_score: f32,
    /// Note tags covered by the query's topics
    pub matched_topics: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    /// Text of the best chunk
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("query dimension mismatch: index holds {expected}, query has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Scores and orders candidates from an [`IndexSnapshot`].
#[derive(Debug, Clone)]
pub struct Ranker {
    half_life: Duration,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_LIFE)
    }
}

impl Ranker {
    pub fn new(half_life: Duration) -> Self {
        Self { half_life }
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    /// Rank `candidates` against `query` as of now.
    pub fn rank(
        &self,
        query: &MatchQuery,
        candidates: &IndexSnapshot,
    ) -> Result<Vec<RankedResult>, RankError> {
        self.rank_at(query, candidates, Utc::now())
    }

    /// Rank `candidates` against `query` as of `now`.
    pub fn rank_at(
        &self,
        query: &MatchQuery,
        candidates: &IndexSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedResult>, RankError> {
        query.validate()?;

        if query.query_vector.len() != candidates.dimension() {
            return Err(RankError::DimensionMismatch {
                expected: candidates.dimension(),
                got: query.query_vector.len(),
            });
        }

        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let query_norm = l2_norm(&query.query_vector);
        if query_norm < f32::EPSILON {
            log::warn!("query vector has zero magnitude, nothing can match");
            return Ok(vec![]);
        }

        let mut results: Vec<RankedResult> = candidates
            .note_map()
            .par_iter()
            .filter_map(|(_, note)| self.score_note(note, query, query_norm, now))
            .filter(|result| result.raw_similarity >= query.threshold)
            .collect();

        results.sort_by(compare_results);
        results.truncate(query.max_results);

        log::debug!(
            "ranked {} candidates for owner '{}', {} returned",
            candidates.len(),
            candidates.owner_id(),
            results.len()
        );

        Ok(results)
    }

    fn score_note(
        &self,
        note: &IndexedNote,
        query: &MatchQuery,
        query_norm: f32,
        now: DateTime<Utc>,
    ) -> Option<RankedResult> {
        let mut best: Option<(usize, f32, &str)> = None;

        for chunk in &note.chunks {
            let Some(similarity) = cosine_with_norm(&query.query_vector, query_norm, &chunk.vector)
            else {
                log::warn!(
                    "skipping unscorable vector for note '{}' chunk {}",
                    note.note_id,
                    chunk.index
                );
                continue;
            };

            if best.map_or(true, |(_, s, _)| similarity > s) {
                best = Some((chunk.index, similarity, chunk.text.as_str()));
            }
        }

        let (best_chunk_index, raw_similarity, excerpt) = best?;
        let recency = recency_score(note.updated_at, now, self.half_life);
        let w = query.recency_weight;

        Some(RankedResult {
            note_id: note.note_id.clone(),
            best_chunk_index,
            raw_similarity,
            recency_score: recency,
            combined_score: (1.0 - w) * raw_similarity + w * recency,
            matched_topics: lexical::matched_topics(&note.tags, &query.topics),
            updated_at: note.updated_at,
            excerpt: excerpt.to_string(),
        })
    }
}

fn compare_results(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.note_id.cmp(&b.note_id))
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1]; `None` when either vector has zero
/// magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    let norm = l2_norm(a);
    if norm < f32::EPSILON {
        return None;
    }
    cosine_with_norm(a, norm, b)
}

fn cosine_with_norm(query: &[f32], query_norm: f32, target: &[f32]) -> Option<f32> {
    if query.len() != target.len() {
        return None;
    }

    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON || !target_norm.is_finite() {
        return None;
    }

    let dot_product: f32 = query.iter().zip(target).map(|(a, b)| a * b).sum();
    Some((dot_product / (query_norm * target_norm)).clamp(-1.0, 1.0))
}

/// Exponential decay: 1.0 when updated now (or in the future), 0.5 after one
/// half-life, approaching 0 for very old notes.
pub fn recency_score(updated_at: DateTime<Utc>, now: DateTime<Utc>, half_life: Duration) -> f32 {
    let elapsed_secs = (now - updated_at).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return 1.0;
    }

    let half_life_secs = half_life.as_secs_f64();
    if half_life_secs <= 0.0 {
        return 0.0;
    }

    0.5f64.powf(elapsed_secs / half_life_secs).clamp(0.0, 1.0) as f32
}

//! Recall service: wires the retrieval pipeline to a note store.
//!
//! Paths through the service:
//! - note creation: normalize, embed, upsert
//! - match: normalize and embed the query, rank against an index snapshot
//! - chat: match on the latest user message, assemble context, generate
//!
//! The index is a cache over the note store; [`RecallService::rebuild`]
//! re-derives an owner's slice of it from the store.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{RankingConfig, RecallConfig};
use crate::notes::{Note, NoteStore, NoteStoreError};
use crate::semantic::adapter::{EmbeddingAdapter, EmbeddingError};
use crate::semantic::context::{ContextAssembler, ContextPayload};
use crate::semantic::embeddings::EmbeddingProvider;
use crate::semantic::generation::{ConversationState, GenerationError, GenerationProvider};
use crate::semantic::index::{IndexError, NoteMetadata, VectorIndex};
use crate::semantic::lexical;
use crate::semantic::preprocess::{NormalizeError, Normalizer};
use crate::semantic::ranker::{MatchQuery, RankError, RankedResult, Ranker};
use crate::semantic::retry::RetryPolicy;

/// Id given to chunks of ad-hoc query text.
const QUERY_NOTE_ID: &str = "query";

/// Errors that can occur during recall operations.
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] NormalizeError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Rank error: {0}")]
    Rank(#[from] RankError),

    #[error("Note store error: {0}")]
    Store(#[from] NoteStoreError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

impl RecallError {
    /// Whether the failure is temporary and the item should just be skipped.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            RecallError::Embedding(EmbeddingError::Unavailable { .. })
                | RecallError::Generation(GenerationError::Unavailable { .. })
        )
    }
}

/// Result of indexing a single note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    Indexed { chunks: usize },
    /// Embedding was unavailable; the note stays out of the index until its
    /// next write or rebuild.
    Skipped { reason: String },
    /// A newer version of the note was indexed first and is kept.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Index entries with no backing note that were dropped
    pub pruned: usize,
}

/// Per-request overrides of the configured ranking defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOptions {
    pub threshold: Option<f32>,
    pub max_results: Option<usize>,
    pub recency_weight: Option<f32>,
    /// Explicit topics, merged with the query's own terms
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub context: ContextPayload,
    pub related: Vec<RankedResult>,
}

/// Semantic recall over one note store.
pub struct RecallService {
    store: Arc<dyn NoteStore>,
    normalizer: Normalizer,
    adapter: EmbeddingAdapter,
    index: VectorIndex,
    ranker: Ranker,
    ranking: RankingConfig,
    assembler: ContextAssembler,
    generator: Option<Arc<dyn GenerationProvider>>,
    generation_retry: RetryPolicy,
}

impl RecallService {
    pub fn new(
        config: &RecallConfig,
        store: Arc<dyn NoteStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let adapter = EmbeddingAdapter::new(provider, &config.embedding);
        let index = VectorIndex::new(config.embedding.dimension, &config.embedding.model);

        Self {
            store,
            normalizer: Normalizer::new(config.normalizer.max_chunk_tokens),
            adapter,
            index,
            ranker: Ranker::new(config.ranking.half_life()),
            ranking: config.ranking.clone(),
            assembler: ContextAssembler::new(config.context.max_chars),
            generator: None,
            generation_retry: RetryPolicy::default(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Use `retry` for both embedding and generation calls.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.adapter = self.adapter.with_retry_policy(retry.clone());
        self.generation_retry = retry;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn model_id(&self) -> &str {
        self.adapter.model_id()
    }

    /// Switch embedding models. The index is emptied; call [`Self::rebuild`]
    /// for each owner afterwards.
    pub fn switch_model(&mut self, model_id: &str, dimension: usize) {
        log::info!(
            "Switching embedding model from '{}' to '{}'",
            self.adapter.model_id(),
            model_id
        );
        self.adapter.set_model(model_id, dimension);
        self.index = VectorIndex::new(dimension, model_id);
    }

    /// Embed `note` and replace whatever the index held for it.
    ///
    /// Embedding outages are reported as [`IndexOutcome::Skipped`], not as
    /// errors. Either every chunk of the note becomes visible or none does.
    /// When writes of the same note race, the one with the latest
    /// `updated_at` ends up indexed.
    pub async fn index_note(&self, note: &Note) -> Result<IndexOutcome, RecallError> {
        let chunks = self.normalizer.normalize(&note.id, &note.text)?;

        let vectors = match self.adapter.embed(&chunks).await {
            Ok(vectors) => vectors,
            Err(e @ EmbeddingError::Unavailable { .. }) => {
                log::warn!("Skipping note '{}' for now: {}", note.id, e);
                // stale vectors would describe text the note no longer has
                self.index.remove_if_not_newer(&note.owner_id, &note.id, note.updated_at)?;
                return Ok(IndexOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = NoteMetadata {
            owner_id: note.owner_id.clone(),
            updated_at: note.updated_at,
            tags: note.tags.clone(),
            excerpts: chunks.iter().map(|c| c.text.clone()).collect(),
        };
        if !self.index.upsert(&note.id, vectors, metadata)? {
            log::debug!("Note '{}' was superseded while embedding", note.id);
            return Ok(IndexOutcome::Superseded);
        }

        log::debug!("Indexed note '{}' ({} chunks)", note.id, chunks.len());
        Ok(IndexOutcome::Indexed {
            chunks: chunks.len(),
        })
    }

    /// Persist `note`, then index it.
    ///
    /// Text that normalizes to nothing is rejected before anything is stored.
    pub async fn save_note(&self, note: &Note) -> Result<IndexOutcome, RecallError> {
        self.normalizer.normalize(&note.id, &note.text)?;
        self.store.save(note).await?;
        self.index_note(note).await
    }

    /// Delete a note from the store and the index. Returns whether it existed.
    pub async fn delete_note(&self, owner_id: &str, note_id: &str) -> Result<bool, RecallError> {
        let existed = self.store.delete(owner_id, note_id).await?;
        self.index.remove(owner_id, note_id)?;
        Ok(existed)
    }

    /// Re-index every stored note of `owner_id` and drop orphaned entries.
    ///
    /// Readers keep seeing the previous vectors of a note until its new ones
    /// are published.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self, owner_id: &str) -> Result<RebuildReport, RecallError> {
        let notes = self.store.load_all_for_owner(owner_id).await?;
        let mut report = RebuildReport::default();

        for note in &notes {
            match self.index_note(note).await {
                Ok(IndexOutcome::Indexed { .. } | IndexOutcome::Superseded) => report.indexed += 1,
                Ok(IndexOutcome::Skipped { .. }) => report.skipped += 1,
                Err(RecallError::InvalidInput(e)) => {
                    log::warn!("Note '{}' has no indexable text: {}", note.id, e);
                    self.index.remove_if_not_newer(owner_id, &note.id, note.updated_at)?;
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let live: HashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        let snapshot = self.index.snapshot_for(owner_id)?;
        for orphan in snapshot.notes().filter(|n| !live.contains(n.note_id.as_str())) {
            self.index.remove(owner_id, &orphan.note_id)?;
            report.pruned += 1;
        }

        log::info!(
            "Rebuilt index for '{}': {} indexed, {} skipped, {} failed, {} pruned",
            owner_id,
            report.indexed,
            report.skipped,
            report.failed,
            report.pruned
        );

        Ok(report)
    }

    /// Notes of `owner_id` related to `text`, best first.
    #[tracing::instrument(skip(self, text, options))]
    pub async fn find_related(
        &self,
        owner_id: &str,
        text: &str,
        options: &MatchOptions,
    ) -> Result<Vec<RankedResult>, RecallError> {
        let query = self.match_query(text, options).await?;
        let snapshot = self.index.snapshot_for(owner_id)?;
        Ok(self.ranker.rank(&query, &snapshot)?)
    }

    /// Related notes for `text` packed into a bounded context payload.
    pub async fn build_context(
        &self,
        owner_id: &str,
        text: &str,
        page_context: Option<&str>,
        options: &MatchOptions,
    ) -> Result<ContextPayload, RecallError> {
        let related = self.find_related(owner_id, text, options).await?;
        Ok(self.assembler.build(&related, page_context, &[]))
    }

    /// Answer the latest user message using related notes as context.
    ///
    /// If notes cannot be embedded right now the reply is generated without
    /// them.
    pub async fn chat(
        &self,
        owner_id: &str,
        conversation: &ConversationState,
        page_context: Option<&str>,
        options: &MatchOptions,
    ) -> Result<ChatReply, RecallError> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(GenerationError::NotConfigured)?;

        let Some((history, message)) = conversation.split_last_user() else {
            return Err(RankError::InvalidQuery("conversation has no user message".to_string()).into());
        };

        let related = match self.find_related(owner_id, message, options).await {
            Ok(related) => related,
            Err(e) if e.is_skippable() => {
                log::warn!("Answering without notes: {}", e);
                vec![]
            }
            Err(e) => return Err(e),
        };

        let context = self.assembler.build(&related, page_context, history);

        let reply = self
            .generation_retry
            .run("generation", || generator.generate(&context, conversation))
            .await
            .map_err(GenerationError::from)?;

        Ok(ChatReply {
            reply,
            context,
            related,
        })
    }

    /// Options are validated before the text is embedded.
    async fn match_query(&self, text: &str, options: &MatchOptions) -> Result<MatchQuery, RecallError> {
        let params = self.match_params(options)?;

        let chunks = self.normalizer.normalize(QUERY_NOTE_ID, text)?;
        let query_vector = self.adapter.embed_query(&chunks).await?;

        Ok(MatchQuery {
            query_vector,
            topics: lexical::query_topics(text, &options.topics),
            ..params
        })
    }

    fn match_params(&self, options: &MatchOptions) -> Result<MatchQuery, RankError> {
        let params = MatchQuery::new(vec![])
            .with_threshold(options.threshold.unwrap_or(self.ranking.threshold))
            .with_max_results(options.max_results.unwrap_or(self.ranking.max_results))
            .with_recency_weight(options.recency_weight.unwrap_or(self.ranking.recency_weight));
        params.validate_params()?;
        Ok(params)
    }
}

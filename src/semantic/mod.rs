//! Semantic retrieval engine for notes.
//!
//! # Architecture
//!
//! - `preprocess`: Markup stripping and sentence-bounded chunking
//! - `embeddings`: Provider boundary plus the local fastembed provider
//! - `adapter`: Batching, caching and retrying over a provider
//! - `index`: Per-owner copy-on-write vector index
//! - `ranker`: Similarity, recency blending and top-k selection
//! - `context`: Budgeted context assembly for chat
//! - `service`: High-level recall service over a note store

pub mod adapter;
pub mod cache;
pub mod context;
pub mod embeddings;
pub mod generation;
pub mod index;
pub mod lexical;
pub mod preprocess;
pub mod ranker;
pub mod retry;
pub mod service;

pub use adapter::{EmbeddingAdapter, EmbeddingError, EmbeddingVector};
pub use context::{ContextAssembler, ContextExcerpt, ContextPayload, ExcerptSource};
pub use embeddings::{EmbeddingModel, EmbeddingProvider, ProviderError};
pub use generation::{ConversationState, GenerationError, GenerationProvider, Role, Turn};
pub use index::{IndexError, IndexSnapshot, NoteMetadata, VectorIndex};
pub use preprocess::{Chunk, NormalizeError, Normalizer};
pub use ranker::{MatchQuery, RankError, RankedResult, Ranker};
pub use retry::RetryPolicy;
pub use service::{ChatReply, IndexOutcome, MatchOptions, RebuildReport, RecallError, RecallService};

//! In-memory vector index, partitioned by owner.
//!
//! Stores note chunk embeddings and the metadata ranking needs. The index
//! is a rebuildable cache over the note store, never the source of truth.
//!
//! Concurrency model:
//! - Each owner's notes live behind an `Arc` that is swapped, never mutated,
//!   so a snapshot taken by a reader stays consistent for its whole scan
//! - Writers for the same owner are serialized by a per-owner lock;
//!   writers for different owners do not contend
//! - A note is never replaced or removed on behalf of a version older than
//!   the one already stored (compared by `updated_at`)

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::semantic::adapter::EmbeddingVector;

/// One embedded chunk of a note.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub index: usize,
    /// Chunk text, kept so results can carry an excerpt
    pub text: String,
    pub vector: Vec<f32>,
}

/// Metadata stored next to a note's vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMetadata {
    pub owner_id: String,
    pub updated_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    /// Chunk texts, indexed by chunk position
    pub excerpts: Vec<String>,
}

/// Everything the index holds for a single note.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedNote {
    pub note_id: String,
    pub owner_id: String,
    pub updated_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub chunks: Vec<IndexedChunk>,
}

type NoteMap = HashMap<String, Arc<IndexedNote>>;

#[derive(Default)]
struct OwnerShard {
    /// Serializes writers for this owner
    writer: Mutex<()>,
    notes: RwLock<Arc<NoteMap>>,
}

/// Immutable view over one owner's notes.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    owner_id: String,
    dimension: usize,
    model_id: String,
    notes: Arc<NoteMap>,
}

impl IndexSnapshot {
    pub fn empty(owner_id: &str, dimension: usize, model_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            dimension,
            model_id: model_id.to_string(),
            notes: Arc::new(HashMap::new()),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, note_id: &str) -> Option<&IndexedNote> {
        self.notes.get(note_id).map(Arc::as_ref)
    }

    pub fn notes(&self) -> impl Iterator<Item = &IndexedNote> {
        self.notes.values().map(Arc::as_ref)
    }

    pub(crate) fn note_map(&self) -> &NoteMap {
        &self.notes
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model mismatch: index holds '{expected}' vectors, got '{got}'")]
    ModelMismatch { expected: String, got: String },

    #[error("Vector for note '{got}' passed to upsert of note '{expected}'")]
    ForeignVector { expected: String, got: String },

    #[error("No excerpt for chunk {0}")]
    MissingExcerpt(usize),

    #[error("Index lock poisoned: {0}")]
    Poisoned(String),
}

/// In-memory vector index for all owners.
pub struct VectorIndex {
    dimension: usize,
    model_id: String,
    shards: RwLock<HashMap<String, Arc<OwnerShard>>>,
}

impl VectorIndex {
    /// Create a new empty index for vectors of `dimension` from `model_id`.
    pub fn new(dimension: usize, model_id: &str) -> Self {
        Self {
            dimension,
            model_id: model_id.to_string(),
            shards: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Replace every vector for `note_id` at once.
    ///
    /// All vectors are validated before anything becomes visible; on error the
    /// previous state for the note is untouched. An empty `vectors` list
    /// removes the note.
    ///
    /// Returns `false` without touching the index when a newer version of the
    /// note is already stored.
    pub fn upsert(
        &self,
        note_id: &str,
        vectors: Vec<EmbeddingVector>,
        metadata: NoteMetadata,
    ) -> Result<bool, IndexError> {
        if vectors.is_empty() {
            return self.remove_if_not_newer(&metadata.owner_id, note_id, metadata.updated_at);
        }

        let mut chunks = Vec::with_capacity(vectors.len());
        for v in vectors {
            self.validate(note_id, &v)?;
            let text = metadata
                .excerpts
                .get(v.chunk_index)
                .cloned()
                .ok_or(IndexError::MissingExcerpt(v.chunk_index))?;
            chunks.push(IndexedChunk {
                index: v.chunk_index,
                text,
                vector: v.vector,
            });
        }
        chunks.sort_by_key(|c| c.index);

        let note = Arc::new(IndexedNote {
            note_id: note_id.to_string(),
            owner_id: metadata.owner_id.clone(),
            updated_at: metadata.updated_at,
            tags: metadata.tags,
            chunks,
        });

        let shard = self.shard_for_write(&metadata.owner_id)?;
        let _writer = shard
            .writer
            .lock()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;

        let current = self.current(&shard)?;
        if let Some(stored) = current.get(note_id) {
            if stored.updated_at > note.updated_at {
                log::debug!(
                    "Ignoring vectors for note '{}' from {}, index holds {}",
                    note_id,
                    note.updated_at,
                    stored.updated_at
                );
                return Ok(false);
            }
        }

        let mut next: NoteMap = current.as_ref().clone();
        next.insert(note_id.to_string(), note);
        self.publish(&shard, next)?;
        Ok(true)
    }

    /// Remove everything stored for `note_id`. No-op if absent.
    pub fn remove(&self, owner_id: &str, note_id: &str) -> Result<(), IndexError> {
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(());
        };
        let _writer = shard
            .writer
            .lock()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;

        let current = self.current(&shard)?;
        if !current.contains_key(note_id) {
            return Ok(());
        }

        let mut next: NoteMap = current.as_ref().clone();
        next.remove(note_id);
        self.publish(&shard, next)
    }

    /// Remove `note_id` unless the stored version is newer than `updated_at`.
    ///
    /// Returns `false` when a newer version was kept.
    pub fn remove_if_not_newer(
        &self,
        owner_id: &str,
        note_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, IndexError> {
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(true);
        };
        let _writer = shard
            .writer
            .lock()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;

        let current = self.current(&shard)?;
        match current.get(note_id) {
            None => Ok(true),
            Some(stored) if stored.updated_at > updated_at => Ok(false),
            Some(_) => {
                let mut next: NoteMap = current.as_ref().clone();
                next.remove(note_id);
                self.publish(&shard, next)?;
                Ok(true)
            }
        }
    }

    /// Drop every note for `owner_id`.
    pub fn clear_owner(&self, owner_id: &str) -> Result<(), IndexError> {
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(());
        };
        let _writer = shard
            .writer
            .lock()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        self.publish(&shard, HashMap::new())
    }

    /// Immutable view of `owner_id`'s notes for ranking.
    pub fn snapshot_for(&self, owner_id: &str) -> Result<IndexSnapshot, IndexError> {
        let notes = match self.shard(owner_id)? {
            Some(shard) => self.current(&shard)?,
            None => Arc::new(HashMap::new()),
        };

        Ok(IndexSnapshot {
            owner_id: owner_id.to_string(),
            dimension: self.dimension,
            model_id: self.model_id.clone(),
            notes,
        })
    }

    /// Number of notes indexed for `owner_id`.
    pub fn len_for(&self, owner_id: &str) -> Result<usize, IndexError> {
        Ok(self.snapshot_for(owner_id)?.len())
    }

    fn validate(&self, note_id: &str, v: &EmbeddingVector) -> Result<(), IndexError> {
        if v.note_id != note_id {
            return Err(IndexError::ForeignVector {
                expected: note_id.to_string(),
                got: v.note_id.clone(),
            });
        }
        if v.model_id != self.model_id {
            return Err(IndexError::ModelMismatch {
                expected: self.model_id.clone(),
                got: v.model_id.clone(),
            });
        }
        if v.dimension() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: v.dimension(),
            });
        }
        Ok(())
    }

    fn shard(&self, owner_id: &str) -> Result<Option<Arc<OwnerShard>>, IndexError> {
        let shards = self
            .shards
            .read()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(shards.get(owner_id).cloned())
    }

    fn shard_for_write(&self, owner_id: &str) -> Result<Arc<OwnerShard>, IndexError> {
        if let Some(shard) = self.shard(owner_id)? {
            return Ok(shard);
        }

        let mut shards = self
            .shards
            .write()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(Arc::clone(shards.entry(owner_id.to_string()).or_default()))
    }

    fn current(&self, shard: &OwnerShard) -> Result<Arc<NoteMap>, IndexError> {
        let notes = shard
            .notes
            .read()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(Arc::clone(&notes))
    }

    fn publish(&self, shard: &OwnerShard, next: NoteMap) -> Result<(), IndexError> {
        let mut notes = shard
            .notes
            .write()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        *notes = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "test-model";

    fn vector(note_id: &str, chunk_index: usize, values: Vec<f32>) -> EmbeddingVector {
        EmbeddingVector {
            note_id: note_id.to_string(),
            chunk_index,
            model_id: MODEL.to_string(),
            vector: values,
        }
    }

    fn metadata(owner: &str, excerpts: &[&str]) -> NoteMetadata {
        NoteMetadata {
            owner_id: owner.to_string(),
            updated_at: Utc::now(),
            tags: BTreeSet::new(),
            excerpts: excerpts.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(3, MODEL);
        assert_eq!(index.dimension(), 3);
        assert_eq!(index.model_id(), MODEL);
        assert!(index.snapshot_for("alice").unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_snapshot() {
        let index = VectorIndex::new(3, MODEL);
        index
            .upsert(
                "n1",
                vec![vector("n1", 1, vec![0.0, 1.0, 0.0]), vector("n1", 0, vec![1.0, 0.0, 0.0])],
                metadata("alice", &["first", "second"]),
            )
            .unwrap();

        let snapshot = index.snapshot_for("alice").unwrap();
        let note = snapshot.get("n1").unwrap();
        assert_eq!(note.chunks.len(), 2);
        assert_eq!(note.chunks[0].index, 0);
        assert_eq!(note.chunks[0].text, "first");
        assert_eq!(note.chunks[1].text, "second");
    }

    #[test]
    fn test_upsert_replaces_all_chunks() {
        let index = VectorIndex::new(2, MODEL);
        index
            .upsert(
                "n1",
                vec![vector("n1", 0, vec![1.0, 0.0]), vector("n1", 1, vec![0.0, 1.0])],
                metadata("alice", &["a", "b"]),
            )
            .unwrap();
        index
            .upsert("n1", vec![vector("n1", 0, vec![1.0, 1.0])], metadata("alice", &["c"]))
            .unwrap();

        let snapshot = index.snapshot_for("alice").unwrap();
        let note = snapshot.get("n1").unwrap();
        assert_eq!(note.chunks.len(), 1);
        assert_eq!(note.chunks[0].text, "c");
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let index = VectorIndex::new(2, MODEL);
        index
            .upsert("n1", vec![vector("n1", 0, vec![1.0, 0.0])], metadata("alice", &["old"]))
            .unwrap();

        let before = index.snapshot_for("alice").unwrap();
        index
            .upsert("n1", vec![vector("n1", 0, vec![0.0, 1.0])], metadata("alice", &["new"]))
            .unwrap();
        index.remove("alice", "n1").unwrap();

        assert_eq!(before.get("n1").unwrap().chunks[0].text, "old");
        assert!(index.snapshot_for("alice").unwrap().is_empty());
    }

    #[test]
    fn test_failed_upsert_leaves_previous_state() {
        let index = VectorIndex::new(2, MODEL);
        index
            .upsert("n1", vec![vector("n1", 0, vec![1.0, 0.0])], metadata("alice", &["keep"]))
            .unwrap();

        let result = index.upsert(
            "n1",
            vec![vector("n1", 0, vec![0.0, 1.0]), vector("n1", 1, vec![1.0, 0.0, 0.0])],
            metadata("alice", &["x", "y"]),
        );

        assert_eq!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 2,
                got: 3
            })
        );
        let snapshot = index.snapshot_for("alice").unwrap();
        assert_eq!(snapshot.get("n1").unwrap().chunks[0].text, "keep");
    }

    #[test]
    fn test_rejects_other_model() {
        let index = VectorIndex::new(2, MODEL);
        let mut v = vector("n1", 0, vec![1.0, 0.0]);
        v.model_id = "other-model".to_string();

        let result = index.upsert("n1", vec![v], metadata("alice", &["a"]));
        assert!(matches!(result, Err(IndexError::ModelMismatch { .. })));
    }

    #[test]
    fn test_rejects_foreign_vector_and_missing_excerpt() {
        let index = VectorIndex::new(2, MODEL);

        let result = index.upsert("n1", vec![vector("n2", 0, vec![1.0, 0.0])], metadata("alice", &["a"]));
        assert!(matches!(result, Err(IndexError::ForeignVector { .. })));

        let result = index.upsert("n1", vec![vector("n1", 3, vec![1.0, 0.0])], metadata("alice", &["a"]));
        assert_eq!(result, Err(IndexError::MissingExcerpt(3)));
    }

    #[test]
    fn test_owners_are_partitioned() {
        let index = VectorIndex::new(2, MODEL);
        index
            .upsert("n1", vec![vector("n1", 0, vec![1.0, 0.0])], metadata("alice", &["a"]))
            .unwrap();
        index
            .upsert("n2", vec![vector("n2", 0, vec![0.0, 1.0])], metadata("bob", &["b"]))
            .unwrap();

        assert_eq!(index.len_for("alice").unwrap(), 1);
        assert!(index.snapshot_for("alice").unwrap().get("n2").is_none());

        index.clear_owner("alice").unwrap();
        assert_eq!(index.len_for("alice").unwrap(), 0);
        assert_eq!(index.len_for("bob").unwrap(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let index = VectorIndex::new(2, MODEL);
        assert!(index.remove("nobody", "missing").is_ok());
        index
            .upsert("n1", vec![vector("n1", 0, vec![1.0, 0.0])], metadata("alice", &["a"]))
            .unwrap();
        assert!(index.remove("alice", "missing").is_ok());
        assert_eq!(index.len_for("alice").unwrap(), 1);
    }

    #[test]
    fn test_empty_upsert_removes_note() {
        let index = VectorIndex::new(2, MODEL);
        index
            .upsert("n1", vec![vector("n1", 0, vec![1.0, 0.0])], metadata("alice", &["a"]))
            .unwrap();
        index.upsert("n1", vec![], metadata("alice", &[])).unwrap();
        assert_eq!(index.len_for("alice").unwrap(), 0);
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let index = Arc::new(VectorIndex::new(2, MODEL));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    let id = format!("n{}", i);
                    index
                        .upsert(&id, vec![vector(&id, 0, vec![1.0, i as f32])], metadata("alice", &["x"]))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len_for("alice").unwrap(), 8);
    }

    #[test]
    fn test_older_version_never_replaces_newer() {
        let index = VectorIndex::new(2, MODEL);
        let newer = metadata("alice", &["new text"]);
        let mut older = metadata("alice", &["old text"]);
        older.updated_at = newer.updated_at - chrono::Duration::seconds(5);

        assert!(index.upsert("n1", vec![vector("n1", 0, vec![0.0, 1.0])], newer.clone()).unwrap());
        assert!(!index.upsert("n1", vec![vector("n1", 0, vec![1.0, 0.0])], older.clone()).unwrap());
        assert!(!index.remove_if_not_newer("alice", "n1", older.updated_at).unwrap());
        assert_eq!(index.snapshot_for("alice").unwrap().get("n1").unwrap().chunks[0].text, "new text");

        // same version may be re-applied
        assert!(index.upsert("n1", vec![vector("n1", 0, vec![0.0, 1.0])], newer.clone()).unwrap());
        assert!(index.remove_if_not_newer("alice", "n1", newer.updated_at).unwrap());
        assert_eq!(index.len_for("alice").unwrap(), 0);
    }
}

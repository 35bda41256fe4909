//! Notes and the stores that own them.
//!
//! The note store is the source of truth; the vector index is derived from it
//! and can be rebuilt at any time.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eid::Eid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Note {
    /// A fresh note with a generated id, created and updated now.
    pub fn new(owner_id: &str, text: &str, tags: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Eid::new().to_string(),
            owner_id: owner_id.to_string(),
            text: text.to_string(),
            created_at: now,
            updated_at: now,
            tags,
        }
    }

    /// Replace the text and bump `updated_at`.
    pub fn edit(&mut self, text: &str) {
        self.text = text.to_string();
        self.updated_at = Utc::now().max(self.created_at);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NoteStoreError {
    #[error("invalid identifier '{0}'")]
    InvalidId(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed note file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable keyed storage for notes.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn load_all_for_owner(&self, owner_id: &str) -> Result<Vec<Note>, NoteStoreError>;
    async fn save(&self, note: &Note) -> Result<(), NoteStoreError>;
    /// Returns whether a note was deleted.
    async fn delete(&self, owner_id: &str, note_id: &str) -> Result<bool, NoteStoreError>;
}

/// Volatile store, handy for tests and embedding in other processes.
#[derive(Default)]
pub struct MemoryNoteStore {
    notes: RwLock<HashMap<String, HashMap<String, Note>>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn load_all_for_owner(&self, owner_id: &str) -> Result<Vec<Note>, NoteStoreError> {
        let notes = self.notes.read().map_err(|_| NoteStoreError::Poisoned)?;
        let mut found: Vec<Note> = notes
            .get(owner_id)
            .map(|owned| owned.values().cloned().collect())
            .unwrap_or_default();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn save(&self, note: &Note) -> Result<(), NoteStoreError> {
        let mut notes = self.notes.write().map_err(|_| NoteStoreError::Poisoned)?;
        notes
            .entry(note.owner_id.clone())
            .or_default()
            .insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn delete(&self, owner_id: &str, note_id: &str) -> Result<bool, NoteStoreError> {
        let mut notes = self.notes.write().map_err(|_| NoteStoreError::Poisoned)?;
        Ok(notes
            .get_mut(owner_id)
            .and_then(|owned| owned.remove(note_id))
            .is_some())
    }
}

/// One JSON file per note under `<base_dir>/<owner_id>/<note_id>.json`.
#[derive(Clone)]
pub struct JsonNoteStore {
    base_dir: PathBuf,
}

impl JsonNoteStore {
    pub fn new(base_dir: &Path) -> Result<Self, NoteStoreError> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn owner_dir(&self, owner_id: &str) -> Result<PathBuf, NoteStoreError> {
        check_ident(owner_id)?;
        Ok(self.base_dir.join(owner_id))
    }

    fn note_path(&self, owner_id: &str, note_id: &str) -> Result<PathBuf, NoteStoreError> {
        check_ident(note_id)?;
        Ok(self.owner_dir(owner_id)?.join(format!("{note_id}.json")))
    }
}

/// Identifiers become path components, so only a safe alphabet is accepted.
fn check_ident(ident: &str) -> Result<(), NoteStoreError> {
    let valid = !ident.is_empty()
        && !ident.starts_with('.')
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(NoteStoreError::InvalidId(ident.to_string()))
    }
}

#[async_trait]
impl NoteStore for JsonNoteStore {
    async fn load_all_for_owner(&self, owner_id: &str) -> Result<Vec<Note>, NoteStoreError> {
        let dir = self.owner_dir(owner_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut notes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let data = tokio::fs::read(&path).await?;
            let note: Note = serde_json::from_slice(&data)
                .map_err(|source| NoteStoreError::Malformed { path, source })?;
            notes.push(note);
        }

        notes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(notes)
    }

    async fn save(&self, note: &Note) -> Result<(), NoteStoreError> {
        let path = self.note_path(&note.owner_id, &note.id)?;
        let dir = self.owner_dir(&note.owner_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let data = serde_json::to_vec_pretty(note).map_err(|source| NoteStoreError::Malformed {
            path: path.clone(),
            source,
        })?;

        // write-then-rename so readers never see half a note
        let temp_path = dir.join(format!(".{}-{}.tmp", Eid::new(), note.id));
        tokio::fs::write(&temp_path, data).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, owner_id: &str, note_id: &str) -> Result<bool, NoteStoreError> {
        let path = self.note_path(owner_id, note_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

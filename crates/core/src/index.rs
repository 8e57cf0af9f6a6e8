use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::RetrievedChunk;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const INDEX_FORMAT_VERSION: u32 = 1;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    text: String,
    embedding: Vec<f32>,
}

/// In-memory similarity index for one session. Grows only by appending;
/// loaded per call and never cached across operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionIndex {
    version: u32,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl SessionIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owns the lifecycle of per-session indexes under one root directory:
/// load-or-create, append, atomic persist, and similarity search.
pub struct IndexManager<E: Embedder> {
    root: PathBuf,
    embedder: E,
}

impl<E: Embedder> IndexManager<E> {
    pub fn new(root: impl Into<PathBuf>, embedder: E) -> Self {
        Self {
            root: root.into(),
            embedder,
        }
    }

    pub fn location_for(&self, session_id: i64) -> PathBuf {
        self.root.join(format!("session_{session_id}.json"))
    }

    /// Loads the index at `location`, validating format version and vector
    /// width. A missing or undecodable file is an error here, never an empty
    /// index.
    pub fn open(&self, location: &Path) -> Result<SessionIndex, IndexError> {
        if !location.exists() {
            return Err(IndexError::Missing(location.display().to_string()));
        }

        let raw = fs::read_to_string(location)?;
        let index: SessionIndex = serde_json::from_str(&raw)
            .map_err(|error| IndexError::Corrupt(error.to_string()))?;

        if index.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index version {}",
                index.version
            )));
        }
        if index.dimensions != self.embedder.dimensions() {
            return Err(IndexError::Dimensions {
                stored: index.dimensions,
                embedder: self.embedder.dimensions(),
            });
        }

        Ok(index)
    }

    /// Loads the session's prior index when its reference points at existing
    /// storage; otherwise builds a fresh index seeded with the current batch,
    /// so a fresh index never holds zero vectors. Returns the index plus the
    /// chunks still pending insertion (empty when the batch seeded it).
    pub fn load_or_create<'a>(
        &self,
        index_ref: Option<&str>,
        batch: &'a [String],
    ) -> Result<(SessionIndex, &'a [String]), IndexError> {
        if let Some(reference) = index_ref {
            let location = Path::new(reference);
            if location.exists() {
                let index = self.open(location)?;
                return Ok((index, batch));
            }
        }

        let mut index = SessionIndex {
            version: INDEX_FORMAT_VERSION,
            dimensions: self.embedder.dimensions(),
            entries: Vec::new(),
        };
        self.append(&mut index, batch)?;
        Ok((index, &[]))
    }

    /// Embeds and inserts chunks in order.
    pub fn append(&self, index: &mut SessionIndex, chunks: &[String]) -> Result<(), IndexError> {
        if index.dimensions != self.embedder.dimensions() {
            return Err(IndexError::Dimensions {
                stored: index.dimensions,
                embedder: self.embedder.dimensions(),
            });
        }

        for chunk in chunks {
            index.entries.push(IndexEntry {
                text: chunk.clone(),
                embedding: self.embedder.embed(chunk),
            });
        }
        Ok(())
    }

    /// Writes the index to its session-scoped location: serialize to a
    /// uuid-suffixed temp file, then rename into place. The returned location
    /// only becomes the session's reference after the rename succeeded, so a
    /// torn write can never be published.
    pub fn persist(&self, session_id: i64, index: &SessionIndex) -> Result<PathBuf, IndexError> {
        fs::create_dir_all(&self.root)?;

        let location = self.location_for(session_id);
        let staged = self.root.join(format!(".tmp-{}", Uuid::new_v4()));

        let payload = serde_json::to_string(index)?;
        fs::write(&staged, payload)?;
        if let Err(error) = fs::rename(&staged, &location) {
            let _ = fs::remove_file(&staged);
            return Err(IndexError::Io(error));
        }

        tracing::debug!(
            session_id,
            entries = index.len(),
            location = %location.display(),
            "session index persisted"
        );
        Ok(location)
    }

    /// Top-k chunks by descending dot-product similarity (embeddings are
    /// unit-length, so this is cosine). Ties keep insertion order, earliest
    /// first.
    pub fn search(&self, index: &SessionIndex, query: &str, top_k: usize) -> Vec<RetrievedChunk> {
        let query_vector = self.embedder.embed(query);

        let mut scored: Vec<RetrievedChunk> = index
            .entries
            .iter()
            .map(|entry| RetrievedChunk {
                text: entry.text.clone(),
                score: entry
                    .embedding
                    .iter()
                    .zip(&query_vector)
                    .map(|(a, b)| a * b)
                    .sum(),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        scored
    }
}

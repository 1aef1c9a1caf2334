//! Vector store: the single source of truth for corpus contents.
//!
//! An in-memory index serves reads (searches run against a consistent
//! snapshot under a read lock) while SQLite provides durability — every
//! `add` commits a transaction before the in-memory index or the caller
//! sees the new chunks. Writers are serialized; readers proceed
//! concurrently with other readers.
//!
//! Search is an exact cosine top-k scan with a stable tie-break (higher
//! intrinsic confidence first, then lexicographic id), so identical
//! queries against an unchanged corpus always return identical results.

use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::embed::cosine_similarity;
use crate::error::StorageError;
use crate::types::{Chunk, CorpusStats, Modality};

/// Metadata filters applied during search or delete.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub modality: Option<Modality>,
    pub source_file: Option<String>,
}

impl ChunkFilter {
    pub fn by_modality(modality: Modality) -> Self {
        Self {
            modality: Some(modality),
            source_file: None,
        }
    }

    pub fn by_source_file(source_file: impl Into<String>) -> Self {
        Self {
            modality: None,
            source_file: Some(source_file.into()),
        }
    }

    fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(modality) = self.modality {
            if chunk.modality != modality {
                return false;
            }
        }
        if let Some(source_file) = &self.source_file {
            if &chunk.source_file != source_file {
                return false;
            }
        }
        true
    }
}

/// Encode an f32 vector as little-endian bytes for BLOB storage.
fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a BLOB back into an f32 vector.
fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Persistent chunk + vector store.
pub struct VectorStore {
    conn: Mutex<Connection>,
    index: RwLock<HashMap<String, Chunk>>,
    dimension: usize,
}

impl VectorStore {
    /// Open (or create) the store in `index_dir` with the declared vector
    /// dimension. Existing chunks are loaded into the in-memory index.
    pub fn open(index_dir: &Path, dimension: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(index_dir).map_err(|e| StorageError::Io {
            message: format!("failed to create {}: {e}", index_dir.display()),
        })?;
        let conn = Connection::open(index_dir.join("chunks.sqlite3"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, dimension)
    }

    /// An in-memory store for tests.
    pub fn open_in_memory(dimension: usize) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, dimension)
    }

    fn with_connection(conn: Connection, dimension: usize) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id          TEXT PRIMARY KEY,
                modality    TEXT NOT NULL,
                source_file TEXT NOT NULL,
                chunk_json  TEXT NOT NULL,
                embedding   BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks (source_file);
            CREATE INDEX IF NOT EXISTS idx_chunks_modality ON chunks (modality);",
        )?;

        let mut index = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT chunk_json, embedding FROM chunks")?;
            let rows = stmt.query_map([], |row| {
                let json: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((json, blob))
            })?;
            for row in rows {
                let (json, blob) = row?;
                let mut chunk: Chunk =
                    serde_json::from_str(&json).map_err(|e| StorageError::Io {
                        message: format!("corrupt chunk row: {e}"),
                    })?;
                chunk.embedding = Some(blob_to_vec(&blob));
                index.insert(chunk.id.clone(), chunk);
            }
        }
        if !index.is_empty() {
            info!(chunks = index.len(), "Loaded existing corpus");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            index: RwLock::new(index),
            dimension,
        })
    }

    /// Atomically insert chunks. Rejects any chunk lacking an embedding,
    /// any embedding of the wrong dimension, and any duplicate id (against
    /// the corpus or within the batch). On rejection nothing is inserted.
    pub fn add(&self, chunks: &[Chunk]) -> Result<usize, StorageError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        {
            let index = self.index.read().unwrap();
            let mut batch_ids = std::collections::HashSet::new();
            for chunk in chunks {
                let embedding =
                    chunk
                        .embedding
                        .as_ref()
                        .ok_or_else(|| StorageError::MissingEmbedding {
                            id: chunk.id.clone(),
                        })?;
                if embedding.len() != self.dimension {
                    return Err(StorageError::Io {
                        message: format!(
                            "chunk '{}' embedding has dimension {}, store expects {}",
                            chunk.id,
                            embedding.len(),
                            self.dimension
                        ),
                    });
                }
                if index.contains_key(&chunk.id) || !batch_ids.insert(&chunk.id) {
                    return Err(StorageError::DuplicateId {
                        id: chunk.id.clone(),
                    });
                }
            }
        }

        // Durable first: commit the transaction, then expose in memory.
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            for chunk in chunks {
                let embedding = chunk.embedding.as_ref().expect("validated above");
                let mut stored = chunk.clone();
                stored.embedding = None; // the BLOB column carries the vector
                let json = serde_json::to_string(&stored).map_err(|e| StorageError::Io {
                    message: e.to_string(),
                })?;
                tx.execute(
                    "INSERT INTO chunks (id, modality, source_file, chunk_json, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        chunk.id,
                        chunk.modality.as_str(),
                        chunk.source_file,
                        json,
                        vec_to_blob(embedding)
                    ],
                )?;
            }
            tx.commit()?;
        }

        let mut index = self.index.write().unwrap();
        for chunk in chunks {
            index.insert(chunk.id.clone(), chunk.clone());
        }
        debug!(added = chunks.len(), total = index.len(), "Chunks inserted");
        Ok(chunks.len())
    }

    /// Top-`k` chunks by cosine similarity to `vector`, optionally
    /// filtered, in descending similarity order.
    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Vec<(Chunk, f32)> {
        let index = self.index.read().unwrap();
        let mut scored: Vec<(&Chunk, f32)> = index
            .values()
            .filter(|chunk| filter.matches(chunk))
            .filter_map(|chunk| {
                chunk
                    .embedding
                    .as_ref()
                    .map(|emb| (chunk, cosine_similarity(vector, emb)))
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(chunk, score)| (chunk.clone(), score))
            .collect()
    }

    /// Fetch a chunk by id.
    pub fn get(&self, id: &str) -> Option<Chunk> {
        self.index.read().unwrap().get(id).cloned()
    }

    /// Remove all chunks matching the filter; returns how many went.
    pub fn delete(&self, filter: &ChunkFilter) -> Result<usize, StorageError> {
        let doomed: Vec<String> = {
            let index = self.index.read().unwrap();
            index
                .values()
                .filter(|c| filter.matches(c))
                .map(|c| c.id.clone())
                .collect()
        };
        if doomed.is_empty() {
            return Ok(0);
        }

        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            for id in &doomed {
                tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
        }

        let mut index = self.index.write().unwrap();
        for id in &doomed {
            index.remove(id);
        }
        info!(removed = doomed.len(), "Chunks deleted");
        Ok(doomed.len())
    }

    /// Drop the entire corpus. The store is immediately usable and empty.
    pub fn reset(&self) -> Result<(), StorageError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM chunks", [])?;
        }
        self.index.write().unwrap().clear();
        info!("Vector store reset");
        Ok(())
    }

    /// Number of chunks in the corpus.
    pub fn count(&self) -> usize {
        self.index.read().unwrap().len()
    }

    /// Per-modality counters.
    pub fn stats(&self) -> CorpusStats {
        let index = self.index.read().unwrap();
        let mut per_modality_counts: BTreeMap<Modality, usize> = BTreeMap::new();
        for chunk in index.values() {
            *per_modality_counts.entry(chunk.modality).or_insert(0) += 1;
        }
        CorpusStats {
            total_chunks: index.len(),
            per_modality_counts,
        }
    }

    /// The declared shared-space dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

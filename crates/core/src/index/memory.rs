use super::{
    bytes_to_vector, cosine_similarity, count_per_file, embed_chunks, top_k, vector_to_bytes,
    EmbeddingIdentity, SearchOutcome, VectorIndex,
};
use crate::embeddings::EmbeddingProvider;
use crate::error::IndexError;
use crate::models::{Chunk, IndexStats, ScoredChunk};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const SNAPSHOT_VERSION: u32 = 1;

struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Brute-force cosine index held in process memory.
pub struct MemoryIndex {
    provider: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<Entry>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    embedding_model: String,
    dimensions: usize,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    chunk: Chunk,
    /// Base64 of little-endian `f32` bytes.
    vector: String,
}

impl MemoryIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Serialises vectors, chunks and the provider identity into one blob.
    pub async fn snapshot(&self) -> Result<Vec<u8>, IndexError> {
        let identity = EmbeddingIdentity::of(self.provider.as_ref());
        let entries = self.entries.read().await;

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            embedding_model: identity.model,
            dimensions: identity.dimensions,
            entries: entries
                .iter()
                .map(|entry| SnapshotEntry {
                    chunk: entry.chunk.clone(),
                    vector: STANDARD.encode(vector_to_bytes(&entry.vector)),
                })
                .collect(),
        };

        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Rebuilds an index from [`MemoryIndex::snapshot`] output. The blob must
    /// have been written with the same embedding model and width.
    pub fn restore(blob: &[u8], provider: Arc<dyn EmbeddingProvider>) -> Result<Self, IndexError> {
        let snapshot: Snapshot = serde_json::from_slice(blob)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let stored = EmbeddingIdentity {
            model: snapshot.embedding_model,
            dimensions: snapshot.dimensions,
        };
        stored.ensure_matches(&EmbeddingIdentity::of(provider.as_ref()))?;

        let mut entries = Vec::with_capacity(snapshot.entries.len());
        for item in snapshot.entries {
            let bytes = STANDARD
                .decode(item.vector.as_bytes())
                .map_err(|error| IndexError::Snapshot(error.to_string()))?;
            let vector = bytes_to_vector(&bytes)?;
            if vector.len() != stored.dimensions {
                return Err(IndexError::Snapshot(format!(
                    "vector for {} has {} dims, expected {}",
                    item.chunk.metadata.chunk_id,
                    vector.len(),
                    stored.dimensions
                )));
            }
            entries.push(Entry {
                chunk: item.chunk,
                vector,
            });
        }

        info!(chunks = entries.len(), "restored in-memory index from snapshot");
        Ok(Self {
            provider,
            entries: RwLock::new(entries),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors = embed_chunks(self.provider.as_ref(), chunks).await?;
        let mut entries = self.entries.write().await;
        entries.extend(
            chunks
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| Entry { chunk, vector }),
        );

        info!(added = chunks.len(), total = entries.len(), "indexed chunks in memory");
        Ok(chunks.len())
    }

    async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome, IndexError> {
        if self.is_empty().await {
            return Ok(SearchOutcome::empty());
        }

        let query_vector = self.provider.embed_query(query).await?;
        let entries = self.entries.read().await;
        let scored = entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&query_vector, &entry.vector),
            })
            .collect();

        Ok(SearchOutcome::Hits(top_k(scored, k)))
    }

    async fn reset(&self) -> Result<(), IndexError> {
        self.entries.write().await.clear();
        info!("cleared in-memory index");
        Ok(())
    }

    async fn contains_file(&self, filename: &str, content_hash: &str) -> Result<bool, IndexError> {
        Ok(self.entries.read().await.iter().any(|entry| {
            entry.chunk.metadata.source == filename && entry.chunk.metadata.file_hash == content_hash
        }))
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let entries = self.entries.read().await;
        Ok(count_per_file(
            entries.iter().map(|entry| entry.chunk.metadata.source.as_str()),
        ))
    }
}

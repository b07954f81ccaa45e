//! Vector index backends.
//!
//! Every backend owns its embedding provider, so chunks and queries are always
//! embedded by the same model. Two backends exist:
//!
//! - [`PersistentIndex`]: SQLite database in an index directory.
//! - [`MemoryIndex`]: process-local index that can be snapshotted to a blob.

pub mod memory;
pub mod persistent;

pub use memory::MemoryIndex;
pub use persistent::{PersistentIndex, PersistentIndexConfig};

use crate::embeddings::EmbeddingProvider;
use crate::error::IndexError;
use crate::models::{Chunk, IndexStats, ScoredChunk};
use async_trait::async_trait;

pub const EMPTY_INDEX_DIAGNOSTIC: &str =
    "인덱스에 저장된 문서가 없습니다. 먼저 PDF 문서를 업로드해주세요.";

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Hits(Vec<ScoredChunk>),
    /// Nothing has been indexed yet. Not an error.
    Empty { diagnostic: String },
}

impl SearchOutcome {
    pub fn empty() -> Self {
        SearchOutcome::Empty {
            diagnostic: EMPTY_INDEX_DIAGNOSTIC.to_string(),
        }
    }

    pub fn into_hits(self) -> Vec<ScoredChunk> {
        match self {
            SearchOutcome::Hits(hits) => hits,
            SearchOutcome::Empty { .. } => Vec::new(),
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Embeds and stores `chunks`, merging with whatever is already indexed.
    /// Returns the number of chunks written.
    async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError>;

    /// Top `k` chunks by cosine similarity to `query`, best first.
    async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome, IndexError>;

    /// Drops everything. Calling it on an empty index succeeds.
    async fn reset(&self) -> Result<(), IndexError>;

    /// True when a chunk with this filename and content hash is indexed.
    async fn contains_file(&self, filename: &str, content_hash: &str) -> Result<bool, IndexError>;

    async fn stats(&self) -> Result<IndexStats, IndexError>;
}

/// Model name and vector width recorded with stored vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingIdentity {
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingIdentity {
    pub fn of(provider: &dyn EmbeddingProvider) -> Self {
        Self {
            model: provider.model_name().to_string(),
            dimensions: provider.dimensions(),
        }
    }

    pub fn ensure_matches(&self, requested: &EmbeddingIdentity) -> Result<(), IndexError> {
        if self == requested {
            return Ok(());
        }
        Err(IndexError::EmbeddingMismatch {
            stored_model: self.model.clone(),
            stored_dims: self.dimensions,
            requested_model: requested.model.clone(),
            requested_dims: requested.dimensions,
        })
    }
}

pub(crate) async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
) -> Result<Vec<Vec<f32>>, IndexError> {
    let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
    let vectors = provider.embed_documents(&texts).await?;

    if vectors.len() != chunks.len() {
        return Err(IndexError::Request(format!(
            "embedding count {} doesn't match chunk count {}",
            vectors.len(),
            chunks.len()
        )));
    }
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != provider.dimensions()) {
        return Err(IndexError::Request(format!(
            "embedding dimension {} != {}",
            vector.len(),
            provider.dimensions()
        )));
    }

    Ok(vectors)
}

/// Sorts by score, best first, and keeps `k`.
pub(crate) fn top_k(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|left, right| right.score.total_cmp(&left.score));
    scored.truncate(k);
    scored
}

/// Per-file chunk counts in first-indexed order.
pub(crate) fn count_per_file<'a>(sources: impl IntoIterator<Item = &'a str>) -> IndexStats {
    let mut stats = IndexStats::default();
    for source in sources {
        stats.total_chunks += 1;
        match stats
            .chunks_per_file
            .iter_mut()
            .find(|(name, _)| name == source)
        {
            Some((_, count)) => *count += 1,
            None => stats.chunks_per_file.push((source.to_string(), 1)),
        }
    }
    stats
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator < f32::EPSILON {
        return 0.0;
    }
    dot / denominator
}

/// Little-endian `f32` bytes.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>, IndexError> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::Request(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::embeddings::EmbeddingProvider;
    use crate::error::ProviderError;
    use crate::models::{Chunk, ChunkMetadata, ExtractionMethod};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn chunk(source: &str, hash: &str, page: u32, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                file_hash: hash.to_string(),
                upload_time: Utc::now(),
                page: Some(page),
                chunk_id: format!("{source}_chunk_{page}"),
                has_tables: page == 2,
                table_count: usize::from(page == 2),
                image_count: 0,
                extraction_method: ExtractionMethod::Structural,
            },
        }
    }

    /// Provider that fails every call and counts attempts.
    #[derive(Default)]
    pub(crate) struct FailingEmbedder {
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Api {
                provider: "failing".to_string(),
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }
}

use super::{
    bytes_to_vector, cosine_similarity, count_per_file, embed_chunks, top_k, vector_to_bytes,
    EmbeddingIdentity, SearchOutcome, VectorIndex,
};
use crate::embeddings::EmbeddingProvider;
use crate::error::IndexError;
use crate::models::{Chunk, ChunkMetadata, IndexStats, ScoredChunk};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const DEFAULT_PERSIST_DIRECTORY: &str = "./chroma";
pub const DEFAULT_COLLECTION: &str = "chroma-cGMP";

#[derive(Debug, Clone)]
pub struct PersistentIndexConfig {
    pub directory: PathBuf,
    pub collection: String,
}

impl Default for PersistentIndexConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_PERSIST_DIRECTORY),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// SQLite-backed index. One database file per collection inside the index
/// directory; vectors are stored as little-endian `f32` blobs and scored in
/// process.
pub struct PersistentIndex {
    provider: Arc<dyn EmbeddingProvider>,
    directory: PathBuf,
    database_path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
    _scratch: Option<TempDir>,
}

impl PersistentIndex {
    /// Opens (or creates) the collection. When the directory cannot be
    /// created a fresh `chroma_*` temporary directory is used instead.
    pub async fn open(
        config: PersistentIndexConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        let (directory, scratch) = match std::fs::create_dir_all(&config.directory) {
            Ok(()) => (config.directory.clone(), None),
            Err(error) => {
                let scratch = tempfile::Builder::new().prefix("chroma_").tempdir()?;
                warn!(
                    requested = %config.directory.display(),
                    fallback = %scratch.path().display(),
                    %error,
                    "index directory unavailable, using temporary storage"
                );
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let database_path = directory.join(format!("{}.sqlite3", config.collection));
        let index = Self {
            provider,
            directory,
            database_path,
            pool: Mutex::new(None),
            _scratch: scratch,
        };

        let pool = index.pool().await?;
        if let Some(stored) = stored_identity(&pool).await? {
            stored.ensure_matches(&index.identity())?;
        }

        info!(path = %index.database_path.display(), "opened persistent index");
        Ok(index)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    fn identity(&self) -> EmbeddingIdentity {
        EmbeddingIdentity::of(self.provider.as_ref())
    }

    async fn pool(&self) -> Result<SqlitePool, IndexError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = connect(&self.database_path).await?;
        migrate(&pool).await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    fn database_files(&self) -> Vec<PathBuf> {
        ["", "-wal", "-shm"]
            .iter()
            .map(|suffix| {
                let mut name = self.database_path.clone().into_os_string();
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    }
}

async fn connect(path: &Path) -> Result<SqlitePool, IndexError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<(), IndexError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_identity (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id TEXT NOT NULL,
            source TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            page INTEGER,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_hash ON chunks(source, file_hash)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn stored_identity(pool: &SqlitePool) -> Result<Option<EmbeddingIdentity>, IndexError> {
    let row = sqlx::query_as::<_, (String, i64)>(
        "SELECT model, dimensions FROM embedding_identity WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(model, dimensions)| EmbeddingIdentity {
        model,
        dimensions: usize::try_from(dimensions).unwrap_or_default(),
    }))
}

async fn chunk_count(pool: &SqlitePool) -> Result<i64, IndexError> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?)
}

#[async_trait]
impl VectorIndex for PersistentIndex {
    fn backend_name(&self) -> &'static str {
        "persistent"
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let pool = self.pool().await?;
        let requested = self.identity();
        if let Some(stored) = stored_identity(&pool).await? {
            stored.ensure_matches(&requested)?;
        }

        let vectors = embed_chunks(self.provider.as_ref(), chunks).await?;

        let mut tx = pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO embedding_identity (id, model, dimensions) VALUES (1, ?, ?)")
            .bind(&requested.model)
            .bind(requested.dimensions as i64)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(&vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, source, file_hash, page, text, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.metadata.chunk_id)
            .bind(&chunk.metadata.source)
            .bind(&chunk.metadata.file_hash)
            .bind(chunk.metadata.page.map(i64::from))
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(vector_to_bytes(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(added = chunks.len(), path = %self.database_path.display(), "indexed chunks");
        Ok(chunks.len())
    }

    async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome, IndexError> {
        let pool = self.pool().await?;
        if chunk_count(&pool).await? == 0 {
            return Ok(SearchOutcome::empty());
        }

        if let Some(stored) = stored_identity(&pool).await? {
            stored.ensure_matches(&self.identity())?;
        }

        let query_vector = self.provider.embed_query(query).await?;
        let rows = sqlx::query("SELECT text, metadata_json, embedding FROM chunks")
            .fetch_all(&pool)
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let text: String = row.try_get("text")?;
            let metadata_json: String = row.try_get("metadata_json")?;
            let blob: Vec<u8> = row.try_get("embedding")?;

            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
            let vector = bytes_to_vector(&blob)?;
            scored.push(ScoredChunk {
                score: cosine_similarity(&query_vector, &vector),
                chunk: Chunk { text, metadata },
            });
        }

        Ok(SearchOutcome::Hits(top_k(scored, k)))
    }

    async fn reset(&self) -> Result<(), IndexError> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }

        let mut first_error = None;
        for path in self.database_files() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to remove index file");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(IndexError::Io(error)),
            None => {
                info!(path = %self.database_path.display(), "reset persistent index");
                Ok(())
            }
        }
    }

    async fn contains_file(&self, filename: &str, content_hash: &str) -> Result<bool, IndexError> {
        let pool = self.pool().await?;
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chunks WHERE source = ? AND file_hash = ?",
        )
        .bind(filename)
        .bind(content_hash)
        .fetch_one(&pool)
        .await?;
        Ok(count > 0)
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let pool = self.pool().await?;
        let sources = sqlx::query_scalar::<_, String>("SELECT source FROM chunks ORDER BY id")
            .fetch_all(&pool)
            .await?;
        Ok(count_per_file(sources.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::index::test_support::chunk;
    use tempfile::tempdir;

    fn provider(dimensions: usize) -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingEmbedder { dimensions })
    }

    fn config(directory: &Path) -> PersistentIndexConfig {
        PersistentIndexConfig {
            directory: directory.to_path_buf(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }

    #[tokio::test]
    async fn chunks_survive_reopening() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let index = PersistentIndex::open(config(dir.path()), provider(64)).await?;
            index
                .add(&[
                    chunk("gmp.pdf", "h1", 1, "cleaning validation"),
                    chunk("gmp.pdf", "h1", 2, "| Parameter | Limit |"),
                ])
                .await?;
        }

        let reopened = PersistentIndex::open(config(dir.path()), provider(64)).await?;
        let stats = reopened.stats().await?;
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.chunks_per_file, vec![("gmp.pdf".to_string(), 2)]);

        let hits = reopened.search("Parameter Limit", 1).await?.into_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata.page, Some(2));
        assert!(hits[0].chunk.metadata.has_tables);
        Ok(())
    }

    #[tokio::test]
    async fn empty_collection_search_is_a_diagnostic() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = PersistentIndex::open(config(dir.path()), provider(64)).await?;
        assert!(matches!(index.search("anything", 5).await?, SearchOutcome::Empty { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn dedup_requires_same_name_and_hash() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = PersistentIndex::open(config(dir.path()), provider(64)).await?;
        index.add(&[chunk("sop.pdf", "v1", 1, "text")]).await?;

        assert!(index.contains_file("sop.pdf", "v1").await?);
        assert!(!index.contains_file("sop.pdf", "v2").await?);
        assert!(!index.contains_file("renamed.pdf", "v1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn other_embedding_model_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let index = PersistentIndex::open(config(dir.path()), provider(64)).await?;
            index.add(&[chunk("a.pdf", "h", 1, "text")]).await?;
        }

        let result = PersistentIndex::open(config(dir.path()), provider(32)).await;
        assert!(matches!(result, Err(IndexError::EmbeddingMismatch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn reset_removes_database_and_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = PersistentIndex::open(config(dir.path()), provider(64)).await?;
        index.add(&[chunk("a.pdf", "h", 1, "text")]).await?;

        index.reset().await?;
        assert!(!index.database_path().exists());
        index.reset().await?;

        assert_eq!(index.stats().await?, IndexStats::default());
        assert!(!index.contains_file("a.pdf", "h").await?);
        Ok(())
    }

    #[tokio::test]
    async fn unusable_directory_falls_back_to_temporary_storage() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"file")?;

        let index = PersistentIndex::open(config(&blocker.join("index")), provider(16)).await?;
        assert_ne!(index.directory(), blocker.join("index").as_path());
        assert!(index
            .directory()
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("chroma_")));

        index.add(&[chunk("a.pdf", "h", 1, "text")]).await?;
        assert_eq!(index.stats().await?.total_chunks, 1);
        Ok(())
    }
}

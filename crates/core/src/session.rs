use crate::error::{IndexError, ProviderError};
use crate::generation::TextGenerator;
use crate::index::{SearchOutcome, VectorIndex};
use crate::ingest::{ingest_source_file, IngestStatus};
use crate::models::{Answer, ConversationTurn, IndexStats, IngestionOptions, Role, SourceFile};
use crate::synthesizer::{generation_failure_answer, search_failure_answer, synthesize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_TOP_K: usize = 5;

/// One user's conversation over a shared index. Operations run one at a time;
/// nothing here is cancellable.
pub struct ChatSession {
    id: Uuid,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn TextGenerator>,
    options: IngestionOptions,
    top_k: usize,
    history: Vec<ConversationTurn>,
    processed_files: Vec<String>,
}

impl ChatSession {
    pub fn new(index: Arc<dyn VectorIndex>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            generator,
            options: IngestionOptions::default(),
            top_k: DEFAULT_TOP_K,
            history: Vec::new(),
            processed_files: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: IngestionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn backend_name(&self) -> &'static str {
        self.index.backend_name()
    }

    /// Seeds the processed-file list from whatever the index already holds.
    pub async fn load_processed_files(&mut self) -> Result<(), IndexError> {
        let stats = self.index.stats().await?;
        for (filename, _) in stats.chunks_per_file {
            self.remember_file(filename);
        }
        Ok(())
    }

    pub async fn ingest_upload(&mut self, filename: &str, bytes: Vec<u8>) -> IngestStatus {
        self.ingest_source(SourceFile::new(filename, bytes)).await
    }

    pub async fn ingest_source(&mut self, source: SourceFile) -> IngestStatus {
        let status = ingest_source_file(self.index.as_ref(), &source, &self.options).await;
        if status.is_indexed() {
            self.remember_file(source.filename);
        }
        status
    }

    /// Ingests uploads strictly in order, one status per upload.
    pub async fn ingest_batch(&mut self, uploads: Vec<SourceFile>) -> Vec<IngestStatus> {
        let mut statuses = Vec::with_capacity(uploads.len());
        for upload in uploads {
            statuses.push(self.ingest_source(upload).await);
        }
        info!(
            session = %self.id,
            files = statuses.len(),
            indexed = statuses.iter().filter(|status| status.is_indexed()).count(),
            "batch finished"
        );
        statuses
    }

    /// Answers from the index and records both turns in the history. A failed
    /// generation is reported to the caller but leaves the history untouched.
    pub async fn ask(&mut self, question: &str) -> Answer {
        let answer = match self.answer(question).await {
            Ok(answer) => answer,
            Err(error) => {
                warn!(session = %self.id, %error, "generation failed");
                return generation_failure_answer(&error.to_string());
            }
        };

        self.history.push(ConversationTurn {
            role: Role::User,
            content: question.to_string(),
        });
        self.history.push(ConversationTurn {
            role: Role::Assistant,
            content: answer.display_message(),
        });

        answer
    }

    async fn answer(&self, question: &str) -> Result<Answer, ProviderError> {
        let hits = match self.index.search(question, self.top_k).await {
            Ok(SearchOutcome::Hits(hits)) => hits,
            Ok(SearchOutcome::Empty { diagnostic }) => {
                info!(session = %self.id, %diagnostic, "search on empty index");
                Vec::new()
            }
            Err(error) => {
                warn!(session = %self.id, %error, "retrieval failed");
                return Ok(search_failure_answer(&error.to_string()));
            }
        };

        info!(session = %self.id, hits = hits.len(), "retrieved chunks");
        synthesize(self.generator.as_ref(), question, &hits).await
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn processed_files(&self) -> &[String] {
        &self.processed_files
    }

    pub async fn index_stats(&self) -> Result<IndexStats, IndexError> {
        self.index.stats().await
    }

    /// Wipes the index. History and the processed-file list are cleared even
    /// when the backend reports a failure.
    pub async fn reset_index(&mut self) -> Result<(), IndexError> {
        let outcome = self.index.reset().await;
        self.processed_files.clear();
        self.history.clear();

        if let Err(error) = &outcome {
            warn!(session = %self.id, %error, "index reset failed, session state cleared anyway");
        }
        outcome
    }

    fn remember_file(&mut self, filename: String) {
        if !self.processed_files.contains(&filename) {
            self.processed_files.push(filename);
        }
    }
}

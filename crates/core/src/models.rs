use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// An uploaded PDF, identified by the hash of its bytes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let content_hash = content_hash(&bytes);
        Self {
            filename: filename.into(),
            bytes,
            content_hash,
            uploaded_at: Utc::now(),
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Rows of one detected table, cells already rendered as text.
pub type TableRows = Vec<Vec<String>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMetadata {
    pub page: u32,
    pub has_tables: bool,
    pub table_count: usize,
    pub image_count: usize,
    pub total_pages: usize,
}

/// One extracted PDF page. Lives only until the page has been chunked.
#[derive(Debug, Clone)]
pub struct PageUnit {
    pub raw_text: String,
    pub tables: Vec<TableRows>,
    pub structured_text: String,
    pub content: String,
    pub metadata: PageMetadata,
}

impl PageUnit {
    pub fn page_number(&self) -> u32 {
        self.metadata.page
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExtractionMethod {
    Structural,
    PlainText,
}

impl ExtractionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionMethod::Structural => "고급 추출 (표, 이미지, 구조 포함)",
            ExtractionMethod::PlainText => "기본 추출",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: String,
    pub file_hash: String,
    pub upload_time: DateTime<Utc>,
    pub page: Option<u32>,
    pub chunk_id: String,
    pub has_tables: bool,
    pub table_count: usize,
    pub image_count: usize,
    pub extraction_method: ExtractionMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

impl Answer {
    /// Text stored in the conversation history: the answer followed by its sources.
    pub fn display_message(&self) -> String {
        if self.sources.is_empty() {
            return self.answer.clone();
        }

        let listed = self
            .sources
            .iter()
            .map(|source| format!("- {source}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\n**참고 출처:**\n{listed}", self.answer)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub chunks_per_file: Vec<(String, usize)>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_500,
            chunk_overlap_chars: 300,
        }
    }
}

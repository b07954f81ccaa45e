pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod layout;
pub mod models;
pub mod session;
pub mod synthesizer;
pub mod tables;

#[cfg(test)]
mod test_pdf;

pub use chunking::{build_chunks, ChunkingConfig, RecursiveSplitter, DEFAULT_SEPARATORS};
pub use config::{AppConfig, Credentials, EmbeddingBackend, StoreBackend};
pub use embeddings::{EmbeddingProvider, HashingEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig};
pub use error::{ConfigError, IndexError, IngestError, ProviderError, TableError};
pub use extractor::{
    extract_document, extract_with_fallback, Extraction, PdfExtractor, PlainTextExtractor,
    StructuralExtractor,
};
pub use generation::{AnthropicConfig, AnthropicGenerator, TextGenerator};
pub use index::{
    MemoryIndex, PersistentIndex, PersistentIndexConfig, SearchOutcome, VectorIndex,
};
pub use ingest::{
    discover_pdf_files, expand_pdf_inputs, ingest_source_file, read_upload, IngestStatus,
};
pub use models::{
    Answer, Chunk, ChunkMetadata, ConversationTurn, ExtractionMethod, IndexStats,
    IngestionOptions, PageMetadata, PageUnit, Role, ScoredChunk, SourceFile,
};
pub use session::ChatSession;
pub use synthesizer::{synthesize, NO_RELEVANT_INFORMATION};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("PDF에서 텍스트를 추출할 수 없습니다: {0}")]
    NoText(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Failure while building a single table block. Never aborts a page.
#[derive(Debug, Error)]
#[error("table {table} on page {page}: {reason}")]
pub struct TableError {
    pub page: u32,
    pub table: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(
        "index was built with embedding model {stored_model} ({stored_dims} dims), \
         refusing {requested_model} ({requested_dims} dims)"
    )]
    EmbeddingMismatch {
        stored_model: String,
        stored_dims: usize,
        requested_model: String,
        requested_dims: usize,
    },

    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    #[error("index request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{provider} returned {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {provider}: {details}")]
    Malformed { provider: String, details: String },

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("다음 API 키가 설정되지 않았습니다: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

//! TOML configuration with environment fallbacks for API keys.
//!
//! Every section is optional. Keys resolve in this order: the `[api_keys]`
//! section, then top-level `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` entries in
//! the same file, then the process environment.

use crate::chunking::ChunkingConfig;
use crate::embeddings::{
    OpenAiEmbedderConfig, DEFAULT_HASHING_DIMENSIONS, OPENAI_BASE_URL, OPENAI_EMBEDDING_DIMENSIONS,
    OPENAI_EMBEDDING_MODEL,
};
use crate::error::ConfigError;
use crate::generation::{AnthropicConfig, ANTHROPIC_BASE_URL, ANTHROPIC_MODEL};
use crate::index::persistent::{DEFAULT_COLLECTION, DEFAULT_PERSIST_DIRECTORY};
use crate::index::PersistentIndexConfig;
use crate::models::IngestionOptions;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "gmp-rag.toml";

const OPENAI_KEY_LABEL: &str = "OpenAI API Key";
const ANTHROPIC_KEY_LABEL: &str = "Anthropic API Key";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_keys: ApiKeys,
    #[serde(rename = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,
    #[serde(rename = "ANTHROPIC_API_KEY")]
    pub anthropic_api_key: Option<String>,
    #[serde(rename = "LANGSMITH_API_KEY")]
    pub langsmith_api_key: Option<String>,
    #[serde(rename = "LANGSMITH_PROJECT")]
    pub langsmith_project: Option<String>,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub store: StoreSettings,
    pub langsmith: LangSmithSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    OpenAi,
    Hashing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
    pub hashing_dimensions: usize,
    pub base_url: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::OpenAi,
            model: OPENAI_EMBEDDING_MODEL.to_string(),
            dimensions: OPENAI_EMBEDDING_DIMENSIONS,
            hashing_dimensions: DEFAULT_HASHING_DIMENSIONS,
            base_url: OPENAI_BASE_URL.to_string(),
            batch_size: 64,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: ANTHROPIC_MODEL.to_string(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        let defaults = IngestionOptions::default();
        Self {
            max_chars: defaults.chunk_max_chars,
            overlap_chars: defaults.chunk_overlap_chars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Persistent,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "persistent" => Ok(StoreBackend::Persistent),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}' (expected persistent or memory)")),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Persistent => f.write_str("persistent"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub persist_directory: PathBuf,
    pub collection: String,
    /// Staging file for the memory backend's snapshot blob.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Persistent,
            persist_directory: PathBuf::from(DEFAULT_PERSIST_DIRECTORY),
            collection: DEFAULT_COLLECTION.to_string(),
            snapshot_path: None,
        }
    }
}

impl StoreSettings {
    /// True when indexed chunks disappear with the process: the memory
    /// backend without a snapshot file.
    pub fn is_ephemeral(&self) -> bool {
        self.backend == StoreBackend::Memory && self.snapshot_path.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LangSmithSettings {
    pub api_key: Option<String>,
    pub project: Option<String>,
}

/// API keys after file and environment resolution.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub langsmith_api_key: Option<String>,
    pub langsmith_project: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &Option<String>| if value.is_some() { "set" } else { "missing" };
        f.debug_struct("Credentials")
            .field("openai", &mask(&self.openai))
            .field("anthropic", &mask(&self.anthropic))
            .field("langsmith_api_key", &mask(&self.langsmith_api_key))
            .field("langsmith_project", &self.langsmith_project)
            .finish()
    }
}

impl AppConfig {
    /// Reads `path` when given; otherwise `gmp-rag.toml` in the working
    /// directory if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials_with(|name| std::env::var(name).ok())
    }

    pub fn credentials_with(&self, env: impl Fn(&str) -> Option<String>) -> Credentials {
        Credentials {
            openai: first_present([
                self.api_keys.openai.clone(),
                self.openai_api_key.clone(),
                env("OPENAI_API_KEY"),
            ]),
            anthropic: first_present([
                self.api_keys.anthropic.clone(),
                self.anthropic_api_key.clone(),
                env("ANTHROPIC_API_KEY"),
            ]),
            langsmith_api_key: first_present([
                self.langsmith.api_key.clone(),
                self.langsmith_api_key.clone(),
                env("LANGSMITH_API_KEY"),
            ]),
            langsmith_project: first_present([
                self.langsmith.project.clone(),
                self.langsmith_project.clone(),
                env("LANGSMITH_PROJECT"),
            ]),
        }
    }

    /// Checks settings and that every key the configured providers need is
    /// present. All missing keys are reported together.
    pub fn validate(&self, credentials: &Credentials) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.embedding.provider == EmbeddingBackend::OpenAi && credentials.openai.is_none() {
            missing.push(OPENAI_KEY_LABEL.to_string());
        }
        if credentials.anthropic.is_none() {
            missing.push(ANTHROPIC_KEY_LABEL.to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials(missing));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be > 0".to_string()));
        }
        self.chunking_config()
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        Ok(())
    }

    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_max_chars: self.chunking.max_chars,
            chunk_overlap_chars: self.chunking.overlap_chars,
        }
    }

    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig::from(&self.ingestion_options())
    }

    pub fn persistent_index(&self) -> PersistentIndexConfig {
        PersistentIndexConfig {
            directory: self.store.persist_directory.clone(),
            collection: self.store.collection.clone(),
        }
    }

    pub fn openai_embedder(&self, api_key: impl Into<String>) -> OpenAiEmbedderConfig {
        OpenAiEmbedderConfig {
            api_key: api_key.into(),
            model: self.embedding.model.clone(),
            dimensions: self.embedding.dimensions,
            base_url: self.embedding.base_url.clone(),
            batch_size: self.embedding.batch_size,
            timeout: Duration::from_secs(self.embedding.timeout_secs),
        }
    }

    pub fn anthropic_generator(&self, api_key: impl Into<String>) -> AnthropicConfig {
        AnthropicConfig {
            api_key: api_key.into(),
            model: self.generation.model.clone(),
            base_url: self.generation.base_url.clone(),
            max_tokens: self.generation.max_tokens,
            timeout: Duration::from_secs(self.generation.timeout_secs),
        }
    }
}

fn first_present<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

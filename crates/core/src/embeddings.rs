use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const OPENAI_EMBEDDING_DIMENSIONS: usize = 3072;
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const HASHING_EMBEDDING_MODEL: &str = "local-char-trigram";
pub const DEFAULT_HASHING_DIMENSIONS: usize = 256;

/// Turns text into fixed-size vectors. Documents and queries must go through
/// the same provider for similarity scores to mean anything.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ProviderError::Malformed {
            provider: self.model_name().to_string(),
            details: "no vector returned for query".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub base_url: String,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: OPENAI_EMBEDDING_MODEL.to_string(),
            dimensions: OPENAI_EMBEDDING_DIMENSIONS,
            base_url: OPENAI_BASE_URL.to_string(),
            batch_size: 64,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: Url,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential("OPENAI_API_KEY".to_string()));
        }

        let endpoint = Url::parse(&format!("{}/embeddings", config.base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "input": batch,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: "openai".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parse_embeddings(parsed, batch.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            debug!(batch = batch.len(), model = %self.config.model, "requesting embeddings");
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

fn parse_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
    if response.data.len() != expected {
        return Err(ProviderError::Malformed {
            provider: "openai".to_string(),
            details: format!("expected {expected} embeddings, got {}", response.data.len()),
        });
    }

    let mut data = response.data;
    data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

/// Deterministic character-trigram hashing into a normalised vector. Needs no
/// network, so it backs offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let windows: Vec<&[char]> = if chars.len() < 3 {
            vec![chars.as_slice()]
        } else {
            chars.windows(3).collect()
        };

        for window in windows {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        HASHING_EMBEDDING_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: ANTHROPIC_MODEL.to_string(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Single-turn Messages API client. The whole prompt goes in one user message.
pub struct AnthropicGenerator {
    client: Client,
    endpoint: Url,
    config: AnthropicConfig,
}

impl AnthropicGenerator {
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential("ANTHROPIC_API_KEY".to_string()));
        }

        let endpoint = Url::parse(&format!("{}/v1/messages", config.base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(model = %self.config.model, prompt_chars = prompt.chars().count(), "sending prompt");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "messages": [ { "role": "user", "content": prompt } ],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: "anthropic".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response.json().await?;
        first_text_block(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn first_text_block(response: MessagesResponse) -> Result<String, ProviderError> {
    response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .find_map(|block| block.text)
        .ok_or_else(|| ProviderError::Malformed {
            provider: "anthropic".to_string(),
            details: "missing text block in response".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> MessagesResponse {
        serde_json::from_value(value).expect("fixture should deserialize")
    }

    #[test]
    fn first_text_block_is_returned() -> Result<(), ProviderError> {
        let response = parse(json!({
            "id": "msg_1",
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "교차오염 방지 절차입니다." },
                { "type": "text", "text": "second" }
            ]
        }));

        assert_eq!(first_text_block(response)?, "교차오염 방지 절차입니다.");
        Ok(())
    }

    #[test]
    fn response_without_text_is_malformed() {
        let response = parse(json!({ "content": [] }));
        assert!(matches!(
            first_text_block(response),
            Err(ProviderError::Malformed { .. })
        ));
    }

    #[test]
    fn defaults_follow_messages_api() -> Result<(), ProviderError> {
        let generator = AnthropicGenerator::new(AnthropicConfig::new("key"))?;
        assert_eq!(generator.model_name(), ANTHROPIC_MODEL);
        assert_eq!(generator.endpoint.as_str(), "https://api.anthropic.com/v1/messages");
        assert_eq!(generator.config.max_tokens, 4096);
        Ok(())
    }

    #[test]
    fn missing_key_is_rejected() {
        assert!(matches!(
            AnthropicGenerator::new(AnthropicConfig::new("")),
            Err(ProviderError::MissingCredential(_))
        ));
    }
}

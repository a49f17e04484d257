//! OpenAI-compatible chat completions backend.
//!
//! This module provides the [`OpenAiClient`] which implements the
//! [`ModelClient`] trait for any endpoint speaking the OpenAI chat
//! completions protocol: OpenAI itself, OpenRouter
//! (<https://openrouter.ai/>), or a local inference server.

use super::{CompletionOptions, ModelClient};
use crate::error::ModelError;
use anyhow::{Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default OpenAI API endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenRouter endpoint, for use with [`OpenAiConfigBuilder::base_url`].
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for catalog transformation.
const DEFAULT_MODEL: &str = "gpt-4o";

/// Default timeout for API requests in seconds. Batches of long product
/// rows can take a while to generate.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
}

impl ChatResponse {
    /// Text of the first choice, if it has any non-blank content.
    fn into_text(self) -> Option<String> {
        self.choices?
            .into_iter()
            .next()?
            .message?
            .content
            .filter(|text| !text.trim().is_empty())
    }
}

/// Configuration for the OpenAI-compatible client.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// The model to use (e.g., "gpt-4o", "openai/gpt-4o-mini" on OpenRouter).
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Full chat completions URL.
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }
}

impl OpenAiConfig {
    /// Create a new configuration builder.
    pub fn builder() -> OpenAiConfigBuilder {
        OpenAiConfigBuilder::default()
    }
}

/// Builder for [`OpenAiConfig`].
#[derive(Default)]
pub struct OpenAiConfigBuilder {
    model: Option<String>,
    timeout_secs: Option<u64>,
    base_url: Option<String>,
}

impl OpenAiConfigBuilder {
    /// Set the model to use.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the request timeout in seconds.
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Set a custom endpoint (OpenRouter, a proxy, a local server).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> OpenAiConfig {
        OpenAiConfig {
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            base_url: self
                .base_url
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        }
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
///
/// # Example
///
/// ```rust,ignore
/// use catalog_transform::ai::{OpenAiClient, OpenAiConfig, OPENROUTER_BASE_URL};
///
/// // OpenAI with defaults
/// let client = OpenAiClient::new("your-api-key")?;
///
/// // OpenRouter
/// let config = OpenAiConfig::builder()
///     .base_url(OPENROUTER_BASE_URL)
///     .model("openai/gpt-4o")
///     .build();
/// let client = OpenAiClient::with_config("your-openrouter-key", config)?;
/// ```
pub struct OpenAiClient {
    api_key: String,
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    /// Create a new client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(api_key, OpenAiConfig::default())
    }

    /// Create a new client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_config(api_key: impl Into<String>, config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            api_key: api_key.into(),
            config,
            client,
        })
    }

    fn build_request(&self, system: &str, user: &str, options: &CompletionOptions) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: Some(system.to_string()),
                },
                Message {
                    role: "user".to_string(),
                    content: Some(user.to_string()),
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

impl ModelClient for OpenAiClient {
    fn complete(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        let request = self.build_request(system, user, options);
        debug!(
            "Requesting completion from {} (max_tokens={})",
            self.config.model, options.max_tokens
        );

        let response = self
            .client
            .post(&self.config.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "catalog-transform")
            .json(&request)
            .send()
            .map_err(|e| ModelError::transient(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::transient(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .map_err(|e| ModelError::transient(format!("Invalid response body: {}", e)))?;

        result.into_text().ok_or(ModelError::EmptyResponse)
    }

    fn name(&self) -> &str {
        if self.config.base_url.contains("openrouter.ai") {
            "OpenRouter"
        } else {
            "OpenAI"
        }
    }

    fn model(&self) -> Option<&str> {
        Some(&self.config.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_response() {
        let json = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "sku,title\nA1,Mug"
                }
            }]
        }"#;

        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_text().as_deref(), Some("sku,title\nA1,Mug"));
    }

    #[test]
    fn test_empty_choices_have_no_text() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(response.into_text().is_none());

        let response: ChatResponse = serde_json::from_str(r#"{"choices": null}"#).unwrap();
        assert!(response.into_text().is_none());
    }

    #[test]
    fn test_blank_or_null_content_has_no_text() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": "   "}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_text().is_none());

        let json = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_text().is_none());
    }

    #[test]
    fn test_parse_malformed_json() {
        let json = r#"{"choices": [{"message": "not an object"}]}"#;
        let result: std::result::Result<ChatResponse, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_request_carries_system_and_user() {
        let client = OpenAiClient::new("test-key").unwrap();
        let options = CompletionOptions {
            temperature: 0.1,
            max_tokens: 2700,
        };
        let request = client.build_request("be terse", "convert this", &options);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 2700);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "convert this");
    }

    #[test]
    fn test_config_builder() {
        let config = OpenAiConfig::builder().build();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, OPENAI_BASE_URL);

        let config = OpenAiConfig::builder()
            .model("openai/gpt-4o-mini")
            .base_url(OPENROUTER_BASE_URL)
            .timeout_secs(60)
            .build();
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_client_name_follows_endpoint() {
        let client = OpenAiClient::new("test-key").unwrap();
        assert_eq!(client.name(), "OpenAI");
        assert_eq!(client.model(), Some(DEFAULT_MODEL));

        let config = OpenAiConfig::builder().base_url(OPENROUTER_BASE_URL).build();
        let client = OpenAiClient::with_config("test-key", config).unwrap();
        assert_eq!(client.name(), "OpenRouter");
    }
}

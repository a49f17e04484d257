//! Model client trait for abstracting LLM interactions.
//!
//! This module defines the [`ModelClient`] trait that lets the pipeline talk
//! to any chat-style text generation backend (OpenAI, OpenRouter, Gemini, a
//! local server, or a scripted fake in tests) without changing the batch
//! logic.
//!
//! # Implementing a New Backend
//!
//! 1. Create a new file in `src/ai/` (e.g., `anthropic.rs`)
//! 2. Implement the [`ModelClient`] trait for your client struct
//! 3. Export the client in `src/ai/mod.rs`
//!
//! # Example
//!
//! ```rust,ignore
//! use catalog_transform::ai::{ModelClient, OpenAiClient};
//! use std::sync::Arc;
//!
//! let client: Arc<dyn ModelClient> = Arc::new(OpenAiClient::new("your-api-key")?);
//!
//! let pipeline = Pipeline::builder()
//!     .model_client(client)
//!     .build()?;
//! ```

use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// Default sampling temperature (low for stable formatting).
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Default output token ceiling for a single request.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Per-request generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Trait for text generation backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so one client can be shared by
/// pipelines running on different threads.
///
/// # Error Handling
///
/// Network failures, timeouts, authentication problems and non-success
/// statuses are reported as [`ModelError::Transient`]. A response without
/// any text is [`ModelError::EmptyResponse`]. The pipeline decides whether
/// to retry; implementations should not retry internally.
pub trait ModelClient: Send + Sync {
    /// Send one system + user prompt pair and return the raw text answer.
    fn complete(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError>;

    /// Backend name for logging and debugging.
    fn name(&self) -> &str;

    /// Model identifier, if the backend exposes one.
    fn model(&self) -> Option<&str> {
        None
    }
}

//! Model clients for LLM-driven table transformation.
//!
//! This module provides a trait-based abstraction for text generation
//! backends, so the pipeline can work with several LLM providers or with a
//! scripted client in tests.
//!
//! # Feature Flag
//!
//! The concrete HTTP clients require the `ai` feature flag. The
//! [`ModelClient`] trait is always available for custom implementations.
//!
//! ```toml
//! # Enable HTTP backends (default)
//! catalog-transform = { version = "0.1", features = ["ai"] }
//!
//! # Trait only, bring your own client
//! catalog-transform = { version = "0.1", default-features = false }
//! ```
//!
//! # Backends
//!
//! - [`OpenAiClient`] - OpenAI-compatible chat completions, including
//!   OpenRouter and local servers (requires `ai` feature)
//! - [`GeminiClient`] - Google Gemini API (requires `ai` feature)

// Client trait is always available (for custom implementations)
mod provider;
pub use provider::{CompletionOptions, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, ModelClient};

// Concrete clients require the "ai" feature
#[cfg(feature = "ai")]
mod gemini;
#[cfg(feature = "ai")]
mod openai;

#[cfg(feature = "ai")]
pub use gemini::{GeminiClient, GeminiConfig, GeminiConfigBuilder};

#[cfg(feature = "ai")]
pub use openai::{
    OPENAI_BASE_URL, OPENROUTER_BASE_URL, OpenAiClient, OpenAiConfig, OpenAiConfigBuilder,
};

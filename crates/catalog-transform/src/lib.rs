//! Catalog Transformation Library
//!
//! Row-preserving, LLM-driven conversion of product CSV files into
//! marketplace listing formats, built with Rust and Polars.
//!
//! # Overview
//!
//! A run reads a product table, splits it into small batches, asks a
//! language model to rewrite each batch into the target marketplace schema
//! and stitches the answers back together. Whatever the model returns, the
//! output has exactly as many rows as the input and exactly the schema's
//! columns in the schema's order:
//!
//! - **Reading**: UTF-8 or Latin-1 input, strict parse with a lenient fallback
//! - **Batching**: Fixed or adaptive batch sizes
//! - **Retries**: Bounded retries with backoff for thin, empty or failed answers
//! - **Reconciliation**: Padding and truncation to the expected row count
//! - **Quality**: Per-row confidence grades and column fill rates
//! - **Progress Reporting**: Real-time progress updates with cancellation support
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use catalog_transform::{Marketplace, Pipeline, PipelineConfig, TransformRequest};
//! use catalog_transform::ai::OpenAiClient;
//! use std::sync::Arc;
//!
//! let client = Arc::new(OpenAiClient::new(api_key)?);
//! let schema = Arc::new(Marketplace::Walmart.target_schema());
//!
//! let pipeline = Pipeline::builder()
//!     .model_client(client)
//!     .config(PipelineConfig::builder().batch_size(8).build()?)
//!     .build()?;
//!
//! let result = pipeline.try_run(TransformRequest::from_path("products.csv", schema))?;
//! println!("{} rows written to {:?}", result.output_rows, result.output_path);
//! ```
//!
//! # Model Clients
//!
//! Backends implement the [`ai::ModelClient`] trait. Built-in clients:
//!
//! - [`ai::OpenAiClient`] - OpenAI-compatible chat completions (OpenAI, OpenRouter)
//! - [`ai::GeminiClient`] - Google Gemini API
//!
//! # Progress Reporting
//!
//! ```rust,ignore
//! use catalog_transform::{CancellationToken, Pipeline, TransformError};
//!
//! let token = CancellationToken::new();
//! let pipeline = Pipeline::builder()
//!     .model_client(client)
//!     .cancellation_token(token.clone())
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.stage, update.message);
//!     })
//!     .build()?;
//!
//! match pipeline.try_run(request) {
//!     Ok(result) => println!("{} rows", result.output_rows),
//!     Err(TransformError::Cancelled) => println!("Cancelled by user"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```

pub mod ai;
pub mod assembler;
pub mod batcher;
pub mod config;
pub mod error;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod quality;
pub mod reader;
pub mod reconcile;
pub mod retry;
pub mod schema;
pub mod table;
pub mod types;

// Re-exports for convenient access
pub use batcher::{AdaptiveBatcher, BatchSpan, DataComplexity, plan_batches};
pub use config::{
    ConfigValidationError, PipelineConfig, PipelineConfigBuilder, RowLimitPolicy, TokenBudget,
};
pub use error::{ModelError, ParseError, Result as TransformResult, ResultExt, TransformError};
pub use output::{HistoryRecord, HistorySink, JsonlHistorySink, OutputStore};
pub use parser::{MalformedBatchError, ParsedBatch};
pub use pipeline::{
    BatchExecutor, CancellationToken, ClosureProgressReporter, InputSource, Pipeline,
    PipelineBuilder, ProgressReporter, ProgressUpdate, TransformRequest, TransformStage,
};
pub use quality::{Confidence, ConfidenceAnalyzer, ConfidenceSummary};
pub use reader::{ReadOutcome, TableReader};
pub use reconcile::{ReconcileReport, RowAdjustment, RowOrigin};
pub use schema::{Marketplace, TargetSchema};
pub use table::Table;
pub use types::{BatchOutcome, BatchReport, RunSummary, TransformationResult};

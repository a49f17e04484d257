//! Error types for the catalog transformation pipeline.
//!
//! Errors are split by stage. [`ParseError`] covers the table reader and is
//! the only class that fails a run outright. Model failures ([`ModelError`])
//! and malformed responses are contained per batch and degrade to padded
//! rows, so they never reach [`TransformError`].
//!
//! Errors are serializable as `{ code, message }` so callers (an HTTP
//! handler, the CLI's `--json` mode) can surface them without string
//! matching.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// Failures while reading the uploaded table.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The input had no header row at all.
    #[error("Input file is empty")]
    Empty,

    /// Neither the strict nor the lenient parse produced a table.
    #[error("Could not parse CSV: {0}")]
    Structure(String),

    /// The table has more data rows than the configured ceiling.
    #[error("Row limit exceeded: file has {rows} rows, limit is {limit}")]
    RowLimitExceeded { rows: usize, limit: usize },

    /// The input file could not be read.
    #[error("Could not read input: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "EMPTY_INPUT",
            Self::Structure(_) => "MALFORMED_CSV",
            Self::RowLimitExceeded { .. } => "ROW_LIMIT_EXCEEDED",
            Self::Io(_) => "INPUT_IO_ERROR",
        }
    }
}

/// Failures reported by a [`ModelClient`](crate::ai::ModelClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Network, timeout, authentication or non-success status.
    #[error("Transient model error: {0}")]
    Transient(String),

    /// The backend answered but produced no text.
    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl ModelError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}

/// The main error type for a transformation run.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Reading the input table failed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Run was cancelled through its [`CancellationToken`](crate::CancellationToken).
    #[error("Transformation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No built-in schema exists for this marketplace name.
    #[error("Marketplace '{0}' is not supported")]
    UnknownMarketplace(String),

    /// The assembled table could not be persisted.
    #[error("Failed to write output: {0}")]
    Output(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TransformError>,
    },
}

impl TransformError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TransformError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code for callers that branch on error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Parse(e) => e.error_code(),
            Self::Cancelled => "CANCELLED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::UnknownMarketplace(_) => "UNKNOWN_MARKETPLACE",
            Self::Output(_) => "OUTPUT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Csv(_) => "CSV_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the failure happened while reading the input table.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::Parse(_) => true,
            Self::WithContext { source, .. } => source.is_input_error(),
            _ => false,
        }
    }
}

impl Serialize for TransformError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TransformError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for transformation operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TransformError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TransformError::Io(e).with_context(context))
    }
}

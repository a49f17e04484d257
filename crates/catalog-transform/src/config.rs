//! Configuration types for the transformation pipeline.
//!
//! This module provides configuration options using the builder pattern
//! for flexible and ergonomic pipeline setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to do when the input has more rows than the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RowLimitPolicy {
    /// Fail the run before any model call.
    #[default]
    Reject,
    /// Keep the first `max_rows` rows and continue.
    Truncate,
}

/// Output token budget for one batch request.
///
/// The budget grows linearly with the batch size and is capped so a large
/// batch cannot run up an unbounded bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Fixed tokens reserved for the header row and formatting.
    pub base: u32,
    /// Estimated tokens per output row.
    pub per_row: u32,
    /// Hard ceiling for a single request.
    pub cap: u32,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            base: 1200,
            per_row: 150,
            cap: 4000,
        }
    }
}

impl TokenBudget {
    /// Token budget for a batch of `rows` rows.
    pub fn for_rows(&self, rows: usize) -> u32 {
        let rows = u32::try_from(rows).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.per_row.saturating_mul(rows))
            .min(self.cap)
    }
}

/// Configuration for the transformation pipeline.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use catalog_transform::config::{PipelineConfig, RowLimitPolicy};
///
/// let config = PipelineConfig::builder()
///     .batch_size(8)
///     .max_rows(500)
///     .row_limit_policy(RowLimitPolicy::Truncate)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows per model request before adaptive adjustments.
    /// Default: 10
    pub batch_size: usize,

    /// Upper bound on input rows.
    /// Default: 1000
    pub max_rows: usize,

    /// Behaviour when `max_rows` is exceeded.
    /// Default: Reject
    pub row_limit_policy: RowLimitPolicy,

    /// Shrink batches after a degraded batch and grow them back after clean ones.
    /// Default: true
    pub adaptive_batching: bool,

    /// Total attempts per batch, including the first one.
    /// Default: 3
    pub max_attempts: u32,

    /// Fraction of expected rows a response must contain to be accepted
    /// without retrying (0.0 - 1.0).
    /// Default: 0.5
    pub min_coverage: f64,

    /// Base delay between retries in milliseconds; doubles per attempt.
    /// Default: 500
    pub retry_backoff_ms: u64,

    /// Output token budget per request.
    pub token_budget: TokenBudget,

    /// Sampling temperature sent to the model.
    /// Default: 0.1
    pub temperature: f32,

    /// Directory that receives transformed files.
    /// Default: "output"
    pub output_dir: PathBuf,

    /// Whether to write the assembled table to `output_dir`.
    /// When false, results are kept in memory only.
    /// Default: true
    pub save_to_disk: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_rows: 1000,
            row_limit_policy: RowLimitPolicy::default(),
            adaptive_batching: true,
            max_attempts: 3,
            min_coverage: 0.5,
            retry_backoff_ms: 500,
            token_budget: TokenBudget::default(),
            temperature: 0.1,
            output_dir: PathBuf::from("output"),
            save_to_disk: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.batch_size == 0 {
            return Err(ConfigValidationError::ZeroValue("batch_size"));
        }

        if self.max_rows == 0 {
            return Err(ConfigValidationError::ZeroValue("max_rows"));
        }

        if self.max_attempts == 0 {
            return Err(ConfigValidationError::ZeroValue("max_attempts"));
        }

        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "min_coverage".to_string(),
                value: self.min_coverage,
            });
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigValidationError::InvalidTemperature(self.temperature));
        }

        if self.token_budget.cap < self.token_budget.base {
            return Err(ConfigValidationError::InvalidTokenBudget {
                base: self.token_budget.base,
                cap: self.token_budget.cap,
            });
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid value for '{0}': must be at least 1")]
    ZeroValue(&'static str),

    #[error("Invalid threshold for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),

    #[error("Invalid token budget: cap {cap} is below base {base}")]
    InvalidTokenBudget { base: u32, cap: u32 },

    #[error("A model client is required to build a pipeline")]
    MissingModelClient,
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    batch_size: Option<usize>,
    max_rows: Option<usize>,
    row_limit_policy: Option<RowLimitPolicy>,
    adaptive_batching: Option<bool>,
    max_attempts: Option<u32>,
    min_coverage: Option<f64>,
    retry_backoff_ms: Option<u64>,
    token_budget: Option<TokenBudget>,
    temperature: Option<f32>,
    output_dir: Option<PathBuf>,
    save_to_disk: Option<bool>,
}

impl PipelineConfigBuilder {
    /// Set the number of rows sent per model request.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the row ceiling for input files.
    pub fn max_rows(mut self, rows: usize) -> Self {
        self.max_rows = Some(rows);
        self
    }

    /// Choose between rejecting and truncating oversized inputs.
    pub fn row_limit_policy(mut self, policy: RowLimitPolicy) -> Self {
        self.row_limit_policy = Some(policy);
        self
    }

    /// Enable or disable adaptive batch sizing.
    pub fn adaptive_batching(mut self, enabled: bool) -> Self {
        self.adaptive_batching = Some(enabled);
        self
    }

    /// Set the total number of attempts per batch.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the minimum accepted row coverage.
    ///
    /// # Arguments
    /// * `coverage` - Value between 0.0 and 1.0 (e.g., 0.5 = half the rows)
    pub fn min_coverage(mut self, coverage: f64) -> Self {
        self.min_coverage = Some(coverage);
        self
    }

    /// Set the base retry delay in milliseconds.
    pub fn retry_backoff_ms(mut self, millis: u64) -> Self {
        self.retry_backoff_ms = Some(millis);
        self
    }

    /// Set the per-request token budget.
    pub fn token_budget(mut self, budget: TokenBudget) -> Self {
        self.token_budget = Some(budget);
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the output directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set whether to write output files.
    pub fn save_to_disk(mut self, save: bool) -> Self {
        self.save_to_disk = Some(save);
        self
    }

    /// Build the configuration, validating all values.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_rows: self.max_rows.unwrap_or(defaults.max_rows),
            row_limit_policy: self.row_limit_policy.unwrap_or(defaults.row_limit_policy),
            adaptive_batching: self.adaptive_batching.unwrap_or(defaults.adaptive_batching),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            min_coverage: self.min_coverage.unwrap_or(defaults.min_coverage),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(defaults.retry_backoff_ms),
            token_budget: self.token_budget.unwrap_or(defaults.token_budget),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            save_to_disk: self.save_to_disk.unwrap_or(defaults.save_to_disk),
        };

        config.validate()?;
        Ok(config)
    }
}

//! Batch executor module.
//!
//! Runs one batch end to end: prompt, model call, parse, retry decisions,
//! and reconciliation. A batch never fails the run; the worst case is a
//! batch of placeholder rows.

use crate::ai::{CompletionOptions, ModelClient};
use crate::batcher::BatchSpan;
use crate::config::PipelineConfig;
use crate::error::{ModelError, Result};
use crate::parser::{ParsedBatch, parse_response};
use crate::prompt::PromptBuilder;
use crate::reconcile::{ReconciledBatch, reconcile};
use crate::retry::{
    AttemptOutcome, AttemptState, DEFAULT_BACKOFF_CAP_MS, RetryDecision, RetryPolicy,
};
use crate::schema::TargetSchema;
use crate::table::Table;
use crate::types::{BatchOutcome, BatchReport};
use tracing::{debug, info, warn};

/// Executes batches against a model client.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    prompts: PromptBuilder,
    policy: RetryPolicy,
    temperature: f32,
}

impl BatchExecutor {
    pub fn new(prompts: PromptBuilder, policy: RetryPolicy, temperature: f32) -> Self {
        Self {
            prompts,
            policy,
            temperature,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            PromptBuilder::new(config.token_budget),
            RetryPolicy {
                max_attempts: config.max_attempts,
                min_coverage: config.min_coverage,
                backoff_base_ms: config.retry_backoff_ms,
                backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS.max(config.retry_backoff_ms),
            },
            config.temperature,
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Transform `batch` (the rows of `span`) into `schema`.
    ///
    /// Only prompt rendering can fail; model and parse failures are absorbed
    /// into the returned batch and report.
    pub fn execute(
        &self,
        client: &dyn ModelClient,
        batch: &Table,
        span: &BatchSpan,
        total_rows: usize,
        schema: &TargetSchema,
    ) -> Result<(ReconciledBatch, BatchReport)> {
        let expected = batch.row_count();
        let label = span.display_range();
        let prompt = self.prompts.build(batch, span, total_rows, schema)?;
        let options = CompletionOptions {
            temperature: self.temperature,
            max_tokens: prompt.max_tokens,
        };

        let mut state = AttemptState::default();
        let mut best: Option<ParsedBatch> = None;
        let mut last_error: Option<String> = None;

        let (chosen, outcome) = loop {
            let attempt = state.completed + 1;
            debug!("Batch {}: attempt {} of {}", label, attempt, self.policy.max_attempts);

            let (parsed, attempt_outcome) =
                match client.complete(&prompt.system, &prompt.user, &options) {
                    Ok(text) => {
                        let parsed = parse_response(&text, schema);
                        if let Some(error) = parsed.error() {
                            warn!("Batch {}: {}", label, error);
                            last_error = Some(error.to_string());
                        }
                        let usable_rows = parsed.row_count();
                        (
                            Some(parsed),
                            AttemptOutcome::Parsed {
                                usable_rows,
                                expected_rows: expected,
                            },
                        )
                    }
                    Err(error) => {
                        warn!("Batch {}: {}", label, error);
                        last_error = Some(error.to_string());
                        let outcome = match error {
                            ModelError::EmptyResponse => AttemptOutcome::EmptyResponse,
                            ModelError::Transient(_) => AttemptOutcome::TransientError,
                        };
                        (None, outcome)
                    }
                };

            let decision = self.policy.decide(&state, &attempt_outcome);
            state.record(&attempt_outcome);

            if let Some(parsed) = parsed {
                if decision == RetryDecision::Accept {
                    let outcome = if state.completed == 1 {
                        BatchOutcome::Accepted
                    } else {
                        BatchOutcome::Recovered
                    };
                    break (parsed, outcome);
                }
                if best.as_ref().is_none_or(|b| parsed.row_count() > b.row_count()) {
                    best = Some(parsed);
                }
            }

            match decision {
                RetryDecision::Accept => {}
                RetryDecision::Retry { delay } => {
                    info!(
                        "Batch {}: retrying in {}ms (attempt {} of {})",
                        label,
                        delay.as_millis(),
                        state.completed + 1,
                        self.policy.max_attempts
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                RetryDecision::GiveUp => {
                    let chosen = best
                        .take()
                        .unwrap_or_else(|| ParsedBatch::malformed("no usable response"));
                    let outcome = if chosen.row_count() > 0 {
                        BatchOutcome::Degraded
                    } else {
                        BatchOutcome::Failed
                    };
                    warn!(
                        "Batch {}: giving up after {} attempts, using best response ({})",
                        label, state.completed, chosen
                    );
                    break (chosen, outcome);
                }
            }
        };

        let reconciled = reconcile(expected, &chosen, schema);
        reconciled.report.log(&label);

        let report = BatchReport::new(
            span,
            state.completed,
            outcome,
            last_error,
            reconciled.report.clone(),
        );
        Ok((reconciled, report))
    }
}

//! Retry decisions for a batch.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempts made so far and
//! the outcome of the latest one. The executor owns the loop, the sleeping and
//! the bookkeeping of the best attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on a single backoff delay.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 8000;

/// When to retry a batch and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Parsed rows / expected rows needed to accept a response.
    pub min_coverage: f64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_coverage: 0.5,
            backoff_base_ms: 500,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
        }
    }
}

/// History of earlier attempts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptState {
    /// Attempts finished before the one being decided.
    pub completed: u32,
    /// Empty responses among those attempts.
    pub empty_responses: u32,
}

impl AttemptState {
    /// Fold an outcome into the history once it has been decided.
    pub fn record(&mut self, outcome: &AttemptOutcome) {
        self.completed += 1;
        if matches!(outcome, AttemptOutcome::EmptyResponse) {
            self.empty_responses += 1;
        }
    }
}

/// What a single attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The response was parsed; malformed responses have zero usable rows.
    Parsed {
        usable_rows: usize,
        expected_rows: usize,
    },
    TransientError,
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Accept,
    Retry { delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    pub fn decide(&self, state: &AttemptState, outcome: &AttemptOutcome) -> RetryDecision {
        let can_retry = state.completed + 1 < self.max_attempts;

        let retryable = match *outcome {
            AttemptOutcome::Parsed {
                usable_rows,
                expected_rows,
            } => {
                if self.is_sufficient(usable_rows, expected_rows) {
                    return RetryDecision::Accept;
                }
                true
            }
            AttemptOutcome::TransientError => true,
            AttemptOutcome::EmptyResponse => state.empty_responses == 0,
        };

        if retryable && can_retry {
            RetryDecision::Retry {
                delay: self.backoff(state.completed + 1),
            }
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Whether `usable` rows out of `expected` meet the coverage threshold.
    pub fn is_sufficient(&self, usable: usize, expected: usize) -> bool {
        if expected == 0 {
            return true;
        }
        usable as f64 / expected as f64 >= self.min_coverage
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(millis)
    }
}

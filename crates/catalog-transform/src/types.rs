//! Result and report types returned by a transformation run.

use crate::batcher::{BatchSpan, DataComplexity};
use crate::error::TransformError;
use crate::quality::ConfidenceSummary;
use crate::reader::{ParseMode, TextEncoding};
use crate::reconcile::{ReconcileReport, RowAdjustment};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Outcome of one transformation run.
///
/// Only input and output failures produce `success == false`; batch-level
/// problems are absorbed and show up in [`RunSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationResult {
    pub run_id: String,
    pub success: bool,
    pub marketplace: String,
    pub input_rows: usize,
    pub output_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Per-batch details and quality breakdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    /// The assembled table, kept in memory for callers.
    #[serde(skip)]
    pub table: Option<Table>,
}

impl TransformationResult {
    /// Result for a run that stopped with `error`.
    pub fn failure(
        run_id: impl Into<String>,
        marketplace: impl Into<String>,
        error: &TransformError,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            success: false,
            marketplace: marketplace.into(),
            input_rows: 0,
            output_rows: 0,
            output_path: None,
            elapsed_ms,
            error: Some(error.to_string()),
            error_code: Some(error.error_code().to_string()),
            summary: None,
            table: None,
        }
    }

    /// Whether the output has exactly as many rows as the input.
    pub fn row_counts_match(&self) -> bool {
        self.input_rows == self.output_rows
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// First response was accepted.
    Accepted,
    /// A retry produced an acceptable response.
    Recovered,
    /// Attempts ran out; the best partial response was used.
    Degraded,
    /// No usable response; the batch is all placeholders.
    Failed,
}

/// Details of one processed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub attempts: u32,
    pub outcome: BatchOutcome,
    /// Last model or parse error seen for this batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub reconcile: ReconcileReport,
}

impl BatchReport {
    pub fn new(
        span: &BatchSpan,
        attempts: u32,
        outcome: BatchOutcome,
        last_error: Option<String>,
        reconcile: ReconcileReport,
    ) -> Self {
        Self {
            index: span.index,
            start: span.start,
            end: span.end,
            attempts,
            outcome,
            last_error,
            reconcile,
        }
    }

    /// Needed a retry or a row count correction.
    pub fn is_degraded(&self) -> bool {
        self.attempts > 1
            || self.outcome != BatchOutcome::Accepted
            || self.reconcile.count_mismatch()
    }
}

/// Everything a run recorded beyond the output table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub encoding: TextEncoding,
    pub parse_mode: ParseMode,
    /// Original input row count when the input was truncated to the ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_truncated_from: Option<usize>,
    pub complexity: DataComplexity,
    pub batches: Vec<BatchReport>,
    /// Model calls across all batches.
    pub total_attempts: u32,
    pub retried_batches: usize,
    pub failed_batches: usize,
    pub duplicated_rows: usize,
    pub placeholder_rows: usize,
    pub truncated_rows: usize,
    /// Schema columns missing from at least one response.
    pub missing_columns: Vec<String>,
    /// Correction applied when assembling the whole table.
    pub assembly_adjustment: RowAdjustment,
    pub confidence: ConfidenceSummary,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(
        encoding: TextEncoding,
        parse_mode: ParseMode,
        input_truncated_from: Option<usize>,
        complexity: DataComplexity,
    ) -> Self {
        Self {
            encoding,
            parse_mode,
            input_truncated_from,
            complexity,
            batches: Vec::new(),
            total_attempts: 0,
            retried_batches: 0,
            failed_batches: 0,
            duplicated_rows: 0,
            placeholder_rows: 0,
            truncated_rows: 0,
            missing_columns: Vec::new(),
            assembly_adjustment: RowAdjustment::None,
            confidence: ConfidenceSummary::default(),
            warnings: Vec::new(),
        }
    }

    /// Fold a batch report into the run totals.
    pub fn add_batch(&mut self, report: BatchReport) {
        self.total_attempts += report.attempts;
        if report.attempts > 1 {
            self.retried_batches += 1;
        }
        if report.outcome == BatchOutcome::Failed {
            self.failed_batches += 1;
        }

        match report.reconcile.adjustment {
            RowAdjustment::None => {}
            RowAdjustment::Padded {
                duplicated,
                placeholders,
            } => {
                self.duplicated_rows += duplicated;
                self.placeholder_rows += placeholders;
            }
            RowAdjustment::Truncated { dropped } => self.truncated_rows += dropped,
        }

        let mut missing: BTreeSet<String> = self.missing_columns.drain(..).collect();
        missing.extend(report.reconcile.missing_columns.iter().cloned());
        self.missing_columns = missing.into_iter().collect();

        self.batches.push(report);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

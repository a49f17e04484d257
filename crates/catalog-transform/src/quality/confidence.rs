use crate::reconcile::RowOrigin;
use crate::schema::TargetSchema;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fill rate below which a row is graded [`Confidence::Failed`].
pub const FAILED_FILL_RATE: f64 = 0.5;

/// Grade of a single output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Model row with every required field filled.
    High,
    /// Copied or incomplete row that still carries most required fields.
    Partial,
    /// Placeholder row, or fewer than half the required fields filled.
    Failed,
}

/// Row counts per confidence grade plus per-column fill rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub high: usize,
    pub partial: usize,
    pub failed: usize,
    /// Share of rows with a non-blank value, per scoring column.
    pub fill_rates: BTreeMap<String, f64>,
}

impl ConfidenceSummary {
    pub fn total(&self) -> usize {
        self.high + self.partial + self.failed
    }

    /// Scoring columns that are blank in more than half the rows.
    pub fn sparse_columns(&self) -> Vec<&str> {
        self.fill_rates
            .iter()
            .filter(|(_, rate)| **rate < FAILED_FILL_RATE)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

pub struct ConfidenceAnalyzer;

impl ConfidenceAnalyzer {
    /// Grade every row of `table`.
    ///
    /// `origins` is aligned with the table rows; missing entries are treated
    /// as model rows.
    pub fn classify_rows(
        table: &Table,
        origins: &[RowOrigin],
        schema: &TargetSchema,
    ) -> Vec<Confidence> {
        let scoring: Vec<usize> = schema
            .scoring_columns()
            .iter()
            .filter_map(|c| table.column_index(c))
            .collect();

        table
            .rows()
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let origin = origins.get(idx).copied().unwrap_or(RowOrigin::Model);
                Self::classify_row(row, &scoring, origin)
            })
            .collect()
    }

    fn classify_row(row: &[String], scoring: &[usize], origin: RowOrigin) -> Confidence {
        if origin == RowOrigin::Placeholder {
            return Confidence::Failed;
        }

        let fill_rate = if scoring.is_empty() {
            1.0
        } else {
            let filled = scoring
                .iter()
                .filter(|&&i| row.get(i).is_some_and(|v| !v.trim().is_empty()))
                .count();
            filled as f64 / scoring.len() as f64
        };

        if fill_rate < FAILED_FILL_RATE {
            Confidence::Failed
        } else if origin == RowOrigin::Model && fill_rate >= 1.0 {
            Confidence::High
        } else {
            Confidence::Partial
        }
    }

    /// Grade the table and aggregate the result.
    pub fn summarize(
        table: &Table,
        origins: &[RowOrigin],
        schema: &TargetSchema,
    ) -> ConfidenceSummary {
        let mut summary = ConfidenceSummary::default();
        for level in Self::classify_rows(table, origins, schema) {
            match level {
                Confidence::High => summary.high += 1,
                Confidence::Partial => summary.partial += 1,
                Confidence::Failed => summary.failed += 1,
            }
        }

        if table.row_count() > 0 {
            for column in schema.scoring_columns() {
                let Some(idx) = table.column_index(column) else {
                    continue;
                };
                let filled = table
                    .rows()
                    .iter()
                    .filter(|row| !row[idx].trim().is_empty())
                    .count();
                summary
                    .fill_rates
                    .insert(column.clone(), filled as f64 / table.row_count() as f64);
            }
        }

        summary
    }
}

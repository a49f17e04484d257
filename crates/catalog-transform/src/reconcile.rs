//! Forcing a parsed batch to the expected shape.
//!
//! Whatever the model returned, the reconciled batch has exactly the
//! expected number of rows and exactly the schema's columns in schema order.
//! [`reconcile`] is pure: the warnings it would raise are collected in a
//! [`ReconcileReport`] and emitted by [`ReconcileReport::log`].

use crate::parser::ParsedBatch;
use crate::schema::TargetSchema;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where an output row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrigin {
    /// Emitted by the model.
    Model,
    /// Copy of the last model row, added to make up the count.
    Duplicated,
    /// All-empty row, added because the model produced nothing usable.
    Placeholder,
}

/// Row count correction applied to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowAdjustment {
    None,
    Padded { duplicated: usize, placeholders: usize },
    Truncated { dropped: usize },
}

/// Everything the reconciler changed about a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub expected_rows: usize,
    pub received_rows: usize,
    pub adjustment: RowAdjustment,
    /// Schema columns the response did not contain; filled with empty values.
    pub missing_columns: Vec<String>,
    /// Response columns that are not in the schema; dropped.
    pub extra_columns: Vec<String>,
    /// Set when the response could not be parsed at all.
    pub malformed: Option<String>,
}

impl ReconcileReport {
    /// Whether any row was added or dropped.
    pub fn count_mismatch(&self) -> bool {
        self.adjustment != RowAdjustment::None
    }

    /// Emit the count and schema mismatch warnings for this batch.
    pub fn log(&self, batch_label: &str) {
        if let Some(reason) = &self.malformed {
            warn!("Batch {}: malformed response ({})", batch_label, reason);
        }

        match self.adjustment {
            RowAdjustment::None => {}
            RowAdjustment::Padded {
                duplicated,
                placeholders,
            } => warn!(
                "Batch {}: expected {} rows, got {}; padded with {} duplicated and {} empty rows",
                batch_label, self.expected_rows, self.received_rows, duplicated, placeholders
            ),
            RowAdjustment::Truncated { dropped } => warn!(
                "Batch {}: expected {} rows, got {}; dropped {} extra rows",
                batch_label, self.expected_rows, self.received_rows, dropped
            ),
        }

        if !self.missing_columns.is_empty() {
            warn!(
                "Batch {}: response missing columns {:?}, filled with empty values",
                batch_label, self.missing_columns
            );
        }
    }
}

/// A batch with the expected row count and the schema's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledBatch {
    pub table: Table,
    /// One entry per row of `table`.
    pub origins: Vec<RowOrigin>,
    pub report: ReconcileReport,
}

impl ReconciledBatch {
    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    /// Re-express the batch as a parsed response.
    pub fn to_parsed(&self) -> ParsedBatch {
        ParsedBatch::Rows {
            columns: self.table.columns().to_vec(),
            rows: self.table.rows().to_vec(),
        }
    }
}

/// Reconcile `parsed` to `expected` rows in `schema` column order.
pub fn reconcile(expected: usize, parsed: &ParsedBatch, schema: &TargetSchema) -> ReconciledBatch {
    let (mut rows, missing_columns, extra_columns, malformed) = match parsed {
        ParsedBatch::Rows { columns, rows } => {
            let projection = project_columns(columns, &schema.columns);
            let missing = schema
                .columns
                .iter()
                .zip(&projection)
                .filter(|(_, source)| source.is_none())
                .map(|(name, _)| name.clone())
                .collect();
            let extra = columns
                .iter()
                .enumerate()
                .filter(|(idx, _)| !projection.contains(&Some(*idx)))
                .map(|(_, name)| name.clone())
                .collect();
            let rows: Vec<Vec<String>> = rows
                .iter()
                .map(|row| {
                    projection
                        .iter()
                        .map(|source| {
                            source
                                .and_then(|idx| row.get(idx))
                                .cloned()
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .collect();
            (rows, missing, extra, None)
        }
        ParsedBatch::Malformed { reason } => {
            (Vec::new(), Vec::new(), Vec::new(), Some(reason.clone()))
        }
    };

    let received = rows.len();
    let mut origins = vec![RowOrigin::Model; received.min(expected)];

    let adjustment = if received > expected {
        rows.truncate(expected);
        RowAdjustment::Truncated {
            dropped: received - expected,
        }
    } else if received < expected {
        let missing = expected - received;
        match rows.last().cloned() {
            Some(last) => {
                rows.extend(std::iter::repeat_n(last, missing));
                origins.extend(std::iter::repeat_n(RowOrigin::Duplicated, missing));
                RowAdjustment::Padded {
                    duplicated: missing,
                    placeholders: 0,
                }
            }
            None => {
                let blank = vec![String::new(); schema.columns.len()];
                rows.extend(std::iter::repeat_n(blank, missing));
                origins.extend(std::iter::repeat_n(RowOrigin::Placeholder, missing));
                RowAdjustment::Padded {
                    duplicated: 0,
                    placeholders: missing,
                }
            }
        }
    } else {
        RowAdjustment::None
    };

    ReconciledBatch {
        table: Table::new(schema.columns.clone(), rows),
        origins,
        report: ReconcileReport {
            expected_rows: expected,
            received_rows: received,
            adjustment,
            missing_columns,
            extra_columns,
            malformed,
        },
    }
}

/// Batch made entirely of placeholder rows, for batches with no usable response.
pub fn placeholder_batch(expected: usize, schema: &TargetSchema, reason: &str) -> ReconciledBatch {
    reconcile(expected, &ParsedBatch::malformed(reason), schema)
}

/// For each target column, the index of the matching source column.
///
/// Exact names win; otherwise a trimmed, case-insensitive match is used.
/// Each source column is used at most once.
fn project_columns(source: &[String], target: &[String]) -> Vec<Option<usize>> {
    let mut used = vec![false; source.len()];
    let mut projection: Vec<Option<usize>> = target
        .iter()
        .map(|name| {
            let idx = source.iter().position(|s| s == name)?;
            used[idx] = true;
            Some(idx)
        })
        .collect();

    for (slot, name) in projection.iter_mut().zip(target) {
        if slot.is_some() {
            continue;
        }
        let wanted = name.trim();
        if let Some(idx) = source
            .iter()
            .enumerate()
            .position(|(i, s)| !used[i] && s.trim().eq_ignore_ascii_case(wanted))
        {
            used[idx] = true;
            *slot = Some(idx);
        }
    }

    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema() -> TargetSchema {
        TargetSchema {
            name: "test".into(),
            display_name: "Test".into(),
            columns: vec!["sku".into(), "title".into(), "price".into()],
            required: vec!["sku".into(), "title".into()],
            guidelines: String::new(),
        }
    }

    fn parsed(rows: &[&[&str]]) -> ParsedBatch {
        ParsedBatch::Rows {
            columns: schema().columns,
            rows: rows
                .iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_exact_count_is_accepted() {
        let batch = reconcile(2, &parsed(&[&["A1", "Mug", "9"], &["A2", "Plate", "4"]]), &schema());
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.origins, vec![RowOrigin::Model, RowOrigin::Model]);
        assert_eq!(batch.report.adjustment, RowAdjustment::None);
        assert!(!batch.report.count_mismatch());
    }

    #[test]
    fn test_too_few_rows_duplicate_last() {
        let batch = reconcile(4, &parsed(&[&["A1", "Mug", "9"], &["A2", "Plate", "4"]]), &schema());
        assert_eq!(batch.row_count(), 4);
        assert_eq!(batch.table.rows()[3], vec!["A2", "Plate", "4"]);
        assert_eq!(
            batch.origins,
            vec![
                RowOrigin::Model,
                RowOrigin::Model,
                RowOrigin::Duplicated,
                RowOrigin::Duplicated
            ]
        );
        assert_eq!(
            batch.report.adjustment,
            RowAdjustment::Padded {
                duplicated: 2,
                placeholders: 0
            }
        );
    }

    #[test]
    fn test_too_many_rows_are_truncated() {
        let batch = reconcile(
            1,
            &parsed(&[&["A1", "Mug", "9"], &["A2", "Plate", "4"], &["A3", "Bowl", "6"]]),
            &schema(),
        );
        assert_eq!(batch.row_count(), 1);
        assert_eq!(batch.table.value(0, "sku"), Some("A1"));
        assert_eq!(batch.report.adjustment, RowAdjustment::Truncated { dropped: 2 });
    }

    #[test]
    fn test_malformed_becomes_placeholders() {
        let batch = reconcile(3, &ParsedBatch::malformed("response is empty"), &schema());
        assert_eq!(batch.row_count(), 3);
        assert!(batch.origins.iter().all(|o| *o == RowOrigin::Placeholder));
        assert!(batch.table.rows().iter().all(|r| r.iter().all(String::is_empty)));
        assert_eq!(batch.report.malformed.as_deref(), Some("response is empty"));
        assert_eq!(batch.table.columns(), schema().columns.as_slice());
    }

    #[test]
    fn test_zero_expected_rows() {
        let batch = reconcile(0, &parsed(&[&["A1", "Mug", "9"]]), &schema());
        assert_eq!(batch.row_count(), 0);
        assert!(batch.origins.is_empty());
    }

    #[test]
    fn test_columns_are_projected_into_schema_order() {
        let parsed = ParsedBatch::Rows {
            columns: vec!["Price".into(), " SKU ".into(), "colour".into()],
            rows: vec![vec!["9".into(), "A1".into(), "blue".into()]],
        };
        let batch = reconcile(1, &parsed, &schema());
        assert_eq!(batch.table.columns(), schema().columns.as_slice());
        assert_eq!(batch.table.rows()[0], vec!["A1", "", "9"]);
        assert_eq!(batch.report.missing_columns, vec!["title".to_string()]);
        assert_eq!(batch.report.extra_columns, vec!["colour".to_string()]);
    }

    #[test]
    fn test_short_rows_are_padded_with_empty_values() {
        let batch = reconcile(1, &parsed(&[&["A1"]]), &schema());
        assert_eq!(batch.table.rows()[0], vec!["A1", "", ""]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        for input in [
            parsed(&[&["A1", "Mug", "9"]]),
            parsed(&[&["A1", "Mug", "9"], &["A2", "Plate", "4"], &["A3", "Bowl", "6"]]),
            ParsedBatch::malformed("nothing"),
        ] {
            let once = reconcile(2, &input, &schema());
            let twice = reconcile(2, &once.to_parsed(), &schema());
            assert_eq!(once.table, twice.table);
        }
    }

    #[test]
    fn test_placeholder_batch() {
        let batch = placeholder_batch(2, &schema(), "gave up");
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.origins, vec![RowOrigin::Placeholder; 2]);
    }
}

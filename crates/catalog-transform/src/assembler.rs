//! Stitching reconciled batches into the output table.

use crate::parser::ParsedBatch;
use crate::reconcile::{ReconciledBatch, RowAdjustment, RowOrigin, reconcile};
use crate::schema::TargetSchema;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Summary of the assembly step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub batch_count: usize,
    /// Rows contributed by the batches before the whole-table check.
    pub batch_rows: usize,
    /// Correction applied at whole-table level; `None` in a healthy run.
    pub adjustment: RowAdjustment,
    /// Origin of every output row, in output order.
    #[serde(skip)]
    pub origins: Vec<RowOrigin>,
}

/// Concatenate `batches` in order, in schema column order, and force the
/// result to `expected_rows` rows.
pub fn assemble(
    schema: &TargetSchema,
    batches: Vec<ReconciledBatch>,
    expected_rows: usize,
) -> (Table, AssemblyReport) {
    let batch_count = batches.len();
    let mut rows = Vec::with_capacity(expected_rows);
    let mut origins = Vec::with_capacity(expected_rows);

    for batch in batches {
        let projection: Vec<Option<usize>> = schema
            .columns
            .iter()
            .map(|c| batch.table.column_index(c))
            .collect();
        origins.extend(batch.origins);
        for row in batch.table.into_rows() {
            rows.push(
                projection
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i)).cloned().unwrap_or_default())
                    .collect::<Vec<String>>(),
            );
        }
    }

    let batch_rows = rows.len();
    origins.resize(batch_rows, RowOrigin::Model);

    let parsed = ParsedBatch::Rows {
        columns: schema.columns.clone(),
        rows,
    };
    let whole = reconcile(expected_rows, &parsed, schema);
    let adjustment = whole.report.adjustment;

    if adjustment != RowAdjustment::None {
        warn!(
            "Assembled {} rows but expected {}; applied {:?} to the full table",
            batch_rows, expected_rows, adjustment
        );
        origins.truncate(expected_rows);
        let kept = origins.len();
        origins.extend(whole.origins.into_iter().skip(kept));
    }

    (
        whole.table,
        AssemblyReport {
            batch_count,
            batch_rows,
            adjustment,
            origins,
        },
    )
}

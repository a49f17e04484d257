//! In-memory string table shared by every pipeline stage.
//!
//! Product feeds are treated as text end to end: prices, quantities and
//! identifiers are never coerced, so a value the model emits is written back
//! byte for byte. Rows are stored positionally against the column list.

use crate::batcher::BatchSpan;
use crate::error::{Result, ResultExt};
use polars::prelude::*;

/// Ordered columns plus ordered rows of string values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table, padding or cutting each row to the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// A table with the given columns and no rows.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at `row` for the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    /// Copy of the rows covered by `span`, clamped to the table bounds.
    pub fn slice(&self, span: &BatchSpan) -> Table {
        let end = span.end.min(self.rows.len());
        let start = span.start.min(end);
        Table {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    /// Keep only the first `limit` rows.
    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    /// Remove rows whose cells are all blank; returns how many were removed.
    pub fn drop_blank_rows(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.iter().any(|cell| !cell.trim().is_empty()));
        before - self.rows.len()
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Render the table (header included) as CSV text.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| crate::TransformError::Io(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Convert into a polars `DataFrame` with one String column per column.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: Vec<&str> = self.rows.iter().map(|row| row[idx].as_str()).collect();
                Column::new(PlSmallStr::from(name.as_str()), values)
            })
            .collect();
        DataFrame::new(columns).context("Building output frame")
    }

    /// Build a table from a `DataFrame`, casting every column to String.
    ///
    /// Nulls become empty strings.
    pub fn from_dataframe(df: &DataFrame) -> Result<Table> {
        let columns: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let mut rows = vec![Vec::with_capacity(columns.len()); df.height()];

        for column in df.get_columns() {
            let as_text = column
                .cast(&DataType::String)
                .context("Casting column to text")?;
            let values = as_text.str().context("Reading text column")?;
            for (row, value) in rows.iter_mut().zip(values.into_iter()) {
                row.push(value.unwrap_or_default().to_string());
            }
        }

        Ok(Table { columns, rows })
    }
}

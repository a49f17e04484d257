//! Reading uploaded product tables.
//!
//! Input files come from spreadsheets exported on every platform, so the
//! reader tries progressively more forgiving strategies:
//!
//! 1. Decode as UTF-8 (dropping a BOM), falling back to Latin-1.
//! 2. Parse strictly with polars, every column read as text.
//! 3. On a structural failure, parse leniently with the `csv` crate and skip
//!    records whose field count does not match the header.
//!
//! The row ceiling is enforced last, before any model call is made.

use crate::config::RowLimitPolicy;
use crate::error::ParseError;
use crate::table::Table;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// Text encoding the input was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Parser that produced the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Strict,
    /// Malformed records were skipped.
    Lenient { skipped_records: usize },
}

/// A successfully read table and how it was obtained.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub table: Table,
    pub encoding: TextEncoding,
    pub mode: ParseMode,
    /// Original row count when the table was cut to the row ceiling.
    pub truncated_from: Option<usize>,
}

/// Reads CSV input into a [`Table`] and enforces the row ceiling.
#[derive(Debug, Clone, Copy)]
pub struct TableReader {
    max_rows: usize,
    policy: RowLimitPolicy,
}

impl TableReader {
    pub fn new(max_rows: usize, policy: RowLimitPolicy) -> Self {
        Self { max_rows, policy }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Read a CSV file from disk.
    pub fn read_path(&self, path: impl AsRef<Path>) -> Result<ReadOutcome, ParseError> {
        let path = path.as_ref();
        debug!("Reading {}", path.display());
        let bytes = std::fs::read(path)?;
        self.read_bytes(&bytes)
    }

    /// Read CSV content already held in memory.
    pub fn read_bytes(&self, bytes: &[u8]) -> Result<ReadOutcome, ParseError> {
        let (text, encoding) = decode(bytes);
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let (mut table, mode) = match parse_strict(&text) {
            Ok(table) => (table, ParseMode::Strict),
            Err(e) => {
                debug!("Strict parse failed: {}", e);
                let (table, skipped) = parse_lenient(&text)?;
                if skipped > 0 {
                    warn!("Skipped {} malformed records while reading input", skipped);
                }
                (
                    table,
                    ParseMode::Lenient {
                        skipped_records: skipped,
                    },
                )
            }
        };

        let blank = table.drop_blank_rows();
        if blank > 0 {
            debug!("Dropped {} blank lines from input", blank);
        }

        info!(
            "Read {} rows x {} columns ({:?}, {:?})",
            table.row_count(),
            table.column_count(),
            encoding,
            mode
        );

        let truncated_from = self.apply_row_limit(&mut table)?;

        Ok(ReadOutcome {
            table,
            encoding,
            mode,
            truncated_from,
        })
    }

    fn apply_row_limit(&self, table: &mut Table) -> Result<Option<usize>, ParseError> {
        let rows = table.row_count();
        if rows <= self.max_rows {
            return Ok(None);
        }

        match self.policy {
            RowLimitPolicy::Reject => Err(ParseError::RowLimitExceeded {
                rows,
                limit: self.max_rows,
            }),
            RowLimitPolicy::Truncate => {
                warn!("Input has {} rows, keeping the first {}", rows, self.max_rows);
                table.truncate(self.max_rows);
                Ok(Some(rows))
            }
        }
    }
}

/// Decode bytes as UTF-8, or Latin-1 when they are not valid UTF-8.
fn decode(bytes: &[u8]) -> (String, TextEncoding) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), TextEncoding::Utf8),
        Err(_) => {
            debug!("Input is not valid UTF-8, decoding as Latin-1");
            let text = bytes.iter().map(|&b| char::from(b)).collect();
            (text, TextEncoding::Latin1)
        }
    }
}

fn parse_strict(text: &str) -> PolarsResult<Table> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .into_reader_with_file_handle(Cursor::new(text.as_bytes().to_vec()))
        .finish()?;

    Table::from_dataframe(&df).map_err(|e| PolarsError::ComputeError(e.to_string().into()))
}

/// Parse with the `csv` crate, skipping records that do not fit the header.
fn parse_lenient(text: &str) -> Result<(Table, usize), ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::Structure(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if columns.iter().all(|c| c.is_empty()) {
        return Err(ParseError::Empty);
    }

    let mut rows = Vec::new();
    let mut skipped = 0;
    for record in reader.records() {
        match record {
            Ok(record) if record.len() == columns.len() => {
                rows.push(record.iter().map(str::to_string).collect());
            }
            Ok(_) | Err(_) => skipped += 1,
        }
    }

    Ok((Table::new(columns, rows), skipped))
}

//! Turning raw model text into rows.
//!
//! Models wrap CSV in markdown fences, prepend chatty preambles, drop the
//! header or repeat it. The parser tolerates all of that and reports a
//! [`ParsedBatch::Malformed`] only when nothing tabular can be recovered.
//! It never fails: the result is a tagged value consumed by the reconciler.

use crate::schema::TargetSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;

/// Leading records searched for an echoed header.
const HEADER_SEARCH_DEPTH: usize = 3;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)(?:```|\z)")
        .expect("fenced block pattern is valid")
});

static FENCE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("fence marker pattern is valid"));

/// Outcome of parsing one model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBatch {
    Rows {
        /// Header the model emitted, or the target columns when it emitted none.
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Malformed {
        reason: String,
    },
}

impl ParsedBatch {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Usable data rows; a malformed response counts as zero.
    pub fn row_count(&self) -> usize {
        match self {
            Self::Rows { rows, .. } => rows.len(),
            Self::Malformed { .. } => 0,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }

    /// The malformed reason as an error value, for logging.
    pub fn error(&self) -> Option<MalformedBatchError> {
        match self {
            Self::Malformed { reason } => Some(MalformedBatchError {
                reason: reason.clone(),
            }),
            Self::Rows { .. } => None,
        }
    }
}

/// A model response that could not be read as CSV.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed model response: {reason}")]
pub struct MalformedBatchError {
    pub reason: String,
}

/// Remove markdown code fences and surrounding whitespace.
///
/// When the text contains a fenced block, only the block's content is kept,
/// which also drops any prose around it. An unterminated block runs to the
/// end of the text.
pub fn strip_fences(text: &str) -> String {
    if let Some(captures) = FENCED_BLOCK.captures(text)
        && let Some(inner) = captures.get(1)
    {
        return inner.as_str().trim().to_string();
    }
    FENCE_MARKER.replace_all(text, "").trim().to_string()
}

/// Parse a model response against the target schema.
pub fn parse_response(text: &str, schema: &TargetSchema) -> ParsedBatch {
    let body = strip_fences(text);
    if body.is_empty() {
        return ParsedBatch::malformed("response is empty");
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => {
                let fields: Vec<String> = record.iter().map(str::to_string).collect();
                if fields.iter().any(|f| !f.is_empty()) {
                    records.push(fields);
                }
            }
            Err(e) => return ParsedBatch::malformed(format!("invalid CSV: {}", e)),
        }
    }

    if schema.columns.len() > 1 {
        trim_prose(&mut records, schema.columns.len());
        if records.is_empty() {
            return ParsedBatch::malformed("response is not tabular");
        }
    }

    if records.is_empty() {
        return ParsedBatch::malformed("no records in response");
    }

    // Records before an echoed header are preamble only when they are
    // narrower than the header itself.
    let header_at = (0..records.len().min(HEADER_SEARCH_DEPTH)).find(|&i| {
        looks_like_header(&records[i], schema)
            && records[..i].iter().all(|r| r.len() < records[i].len())
    });

    let (header, mut rows) = match header_at {
        Some(index) => {
            let mut records = records.into_iter().skip(index);
            let header = records.next().unwrap_or_default();
            (header, records.collect::<Vec<_>>())
        }
        None => (schema.columns.clone(), records),
    };

    let echoed = rows.len();
    rows.retain(|row| !same_fields(row, &header) && !same_fields(row, &schema.columns));
    let echoed = echoed - rows.len();
    if echoed > 0 {
        debug!("Dropped {} repeated header records from response", echoed);
    }

    if rows.is_empty() {
        return ParsedBatch::malformed("response has a header but no data rows");
    }

    ParsedBatch::Rows {
        columns: canonical_header(&header, schema),
        rows,
    }
}

/// Drop prose records before and after the table body.
///
/// A record counts as prose when it has fewer than half as many fields as
/// the schema has columns (and always when it has a single field).
fn trim_prose(records: &mut Vec<Vec<String>>, width: usize) {
    let min_fields = width.div_ceil(2).max(2);
    while records.last().is_some_and(|r| r.len() < min_fields) {
        records.pop();
    }
    let leading = records.iter().take_while(|r| r.len() < min_fields).count();
    records.drain(..leading);
}

/// At least half the fields name a target column.
fn looks_like_header(record: &[String], schema: &TargetSchema) -> bool {
    let matches = record
        .iter()
        .filter(|field| schema.columns.iter().any(|c| names_column(field, c)))
        .count();
    matches > 0 && matches * 2 >= record.len()
}

/// Lowercase alphanumeric words of a header label.
fn label_words(label: &str) -> Vec<String> {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn exact_label(field: &str, column: &str) -> bool {
    field.trim().eq_ignore_ascii_case(column.trim())
}

/// `field` is the column's name, or a label whose words contain (or are
/// contained in) the column's words, e.g. `SKU ID` for `sku`.
fn names_column(field: &str, column: &str) -> bool {
    if exact_label(field, column) {
        return true;
    }
    let field_words = label_words(field);
    let column_words = label_words(column);
    if field_words.is_empty() || column_words.is_empty() {
        return false;
    }
    // Numbered values like `SKU-1` are data, not labels.
    if field_words
        .iter()
        .any(|w| w.chars().any(|c| c.is_ascii_digit()) && !column_words.contains(w))
    {
        return false;
    }
    column_words.iter().all(|w| field_words.contains(w))
        || field_words.iter().all(|w| column_words.contains(w))
}

/// Rename loosely matched header labels to the column they stand for.
///
/// Labels that equal a column (ignoring case) are kept as emitted; the
/// reconciler resolves those. Each column is claimed at most once.
fn canonical_header(header: &[String], schema: &TargetSchema) -> Vec<String> {
    let mut claimed: Vec<&str> = schema
        .columns
        .iter()
        .filter(|c| header.iter().any(|f| exact_label(f, c)))
        .map(String::as_str)
        .collect();

    header
        .iter()
        .map(|field| {
            if schema.columns.iter().any(|c| exact_label(field, c)) {
                return field.clone();
            }
            match schema
                .columns
                .iter()
                .find(|c| !claimed.contains(&c.as_str()) && names_column(field, c))
            {
                Some(column) => {
                    claimed.push(column.as_str());
                    column.clone()
                }
                None => field.clone(),
            }
        })
        .collect()
}

/// Field-wise equality ignoring case and surrounding whitespace.
fn same_fields(record: &[String], labels: &[String]) -> bool {
    record.len() == labels.len()
        && record
            .iter()
            .zip(labels)
            .all(|(field, label)| exact_label(field, label))
}

impl fmt::Display for ParsedBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => {
                write!(f, "{} rows x {} columns", rows.len(), columns.len())
            }
            Self::Malformed { reason } => write!(f, "malformed ({})", reason),
        }
    }
}

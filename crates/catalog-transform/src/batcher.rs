//! Splitting a table into row batches.
//!
//! Every strategy here produces contiguous, non-overlapping spans that cover
//! the whole table in order. [`plan_batches`] is the fixed-size partition;
//! [`AdaptiveBatcher`] yields spans one at a time so the size of the next
//! batch can react to how the previous one went.

use crate::table::Table;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Half-open range `[start, end)` of row indices processed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchSpan {
    /// Position of this batch in the run, starting at 0.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl BatchSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// One-based, inclusive row range for log messages.
    pub fn display_range(&self) -> String {
        format!("{}-{}", self.start + 1, self.end)
    }
}

/// Fixed-size partition of `row_count` rows.
///
/// A `batch_size` of 0 is treated as 1.
pub fn plan_batches(row_count: usize, batch_size: usize) -> Vec<BatchSpan> {
    let size = batch_size.max(1);
    (0..row_count)
        .step_by(size)
        .enumerate()
        .map(|(index, start)| BatchSpan {
            index,
            start,
            end: (start + size).min(row_count),
        })
        .collect()
}

/// Rough difficulty of a source table for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataComplexity {
    Standard,
    /// Dense titles (phones, electronics) or long rows; smaller batches
    /// keep the model from dropping rows.
    Complex,
}

/// Rows inspected by [`assess_complexity`].
const COMPLEXITY_SAMPLE_ROWS: usize = 20;

/// Average characters per row above which a table counts as complex.
const LONG_ROW_CHARS: usize = 400;

static DEVICE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(galaxy|iphone|ipad|pixel|oneplus|xiaomi|motorola|\d+\s?gb|dual sim|single sim|5g|4g|unlocked|t-mobile|verizon|at&t)\b",
    )
    .expect("device keyword pattern is valid")
});

static NAME_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(name|title|product|item|model)").expect("name column pattern is valid")
});

/// Classify a table from a sample of its first rows.
pub fn assess_complexity(table: &Table) -> DataComplexity {
    let sample = table.row_count().min(COMPLEXITY_SAMPLE_ROWS);
    if sample == 0 {
        return DataComplexity::Standard;
    }

    let rows = &table.rows()[..sample];
    let total_chars: usize = rows
        .iter()
        .map(|row| row.iter().map(|v| v.len()).sum::<usize>())
        .sum();
    if total_chars / sample > LONG_ROW_CHARS {
        return DataComplexity::Complex;
    }

    let name_column = table
        .columns()
        .iter()
        .position(|c| NAME_COLUMN.is_match(c))
        .unwrap_or(0);

    let has_devices = rows
        .iter()
        .filter_map(|row| row.get(name_column))
        .any(|value| DEVICE_KEYWORDS.is_match(value));

    if has_devices {
        DataComplexity::Complex
    } else {
        DataComplexity::Standard
    }
}

/// Starting batch size for a table of the given complexity.
pub fn initial_batch_size(base: usize, complexity: DataComplexity) -> usize {
    match complexity {
        DataComplexity::Standard => base.max(1),
        DataComplexity::Complex => (base / 2).max(1),
    }
}

/// Clean batches needed before the batch size grows again.
const CLEAN_STREAK_TO_GROW: u32 = 2;

/// Sequential span generator whose batch size reacts to batch outcomes.
///
/// Call [`next_span`](Self::next_span) to get the next batch, then
/// [`observe`](Self::observe) with whether that batch was degraded.
#[derive(Debug, Clone)]
pub struct AdaptiveBatcher {
    total_rows: usize,
    next_start: usize,
    next_index: usize,
    initial_size: usize,
    current_size: usize,
    clean_streak: u32,
    adaptive: bool,
}

impl AdaptiveBatcher {
    pub fn new(total_rows: usize, initial_size: usize, adaptive: bool) -> Self {
        let initial_size = initial_size.max(1);
        Self {
            total_rows,
            next_start: 0,
            next_index: 0,
            initial_size,
            current_size: initial_size,
            clean_streak: 0,
            adaptive,
        }
    }

    /// Size that the next span will have (before clamping to the table end).
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn remaining_rows(&self) -> usize {
        self.total_rows - self.next_start
    }

    /// Next span, or `None` once every row has been handed out.
    pub fn next_span(&mut self) -> Option<BatchSpan> {
        if self.next_start >= self.total_rows {
            return None;
        }

        let span = BatchSpan {
            index: self.next_index,
            start: self.next_start,
            end: (self.next_start + self.current_size).min(self.total_rows),
        };
        self.next_start = span.end;
        self.next_index += 1;
        Some(span)
    }

    /// Record how the last batch went.
    pub fn observe(&mut self, degraded: bool) {
        if !self.adaptive {
            return;
        }

        if degraded {
            self.clean_streak = 0;
            self.current_size = (self.current_size / 2).max(1);
        } else {
            self.clean_streak += 1;
            if self.clean_streak >= CLEAN_STREAK_TO_GROW && self.current_size < self.initial_size {
                self.current_size = (self.current_size * 2).min(self.initial_size);
                self.clean_streak = 0;
            }
        }
    }
}

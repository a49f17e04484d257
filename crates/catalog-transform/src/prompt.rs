//! Prompt construction for one batch.
//!
//! The user prompt states the expected row count as a literal number and
//! lists the target columns verbatim, so a model that follows instructions
//! produces output the parser can take as-is.

use crate::batcher::BatchSpan;
use crate::config::TokenBudget;
use crate::error::Result;
use crate::schema::TargetSchema;
use crate::table::Table;
use std::fmt::Write as _;

/// A ready-to-send request for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Number of data rows the model is asked to return.
    pub expected_rows: usize,
    pub max_tokens: u32,
}

/// Builds batch prompts for a target schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    budget: TokenBudget,
}

impl PromptBuilder {
    pub fn new(budget: TokenBudget) -> Self {
        Self { budget }
    }

    /// Prompt for `batch`, the rows covered by `span` out of `total_rows`.
    pub fn build(
        &self,
        batch: &Table,
        span: &BatchSpan,
        total_rows: usize,
        schema: &TargetSchema,
    ) -> Result<Prompt> {
        let expected_rows = batch.row_count();
        let source_csv = batch.to_csv_string()?;

        let system = format!(
            "You are an expert product feed transformation system for the {} marketplace. \
             You convert source product rows into the marketplace upload format. \
             Your output must be ONLY valid CSV data.",
            schema.display_name
        );

        let mut user = String::new();
        let _ = writeln!(
            user,
            "Transform the following {} product rows (rows {} of {}) into {} format.",
            expected_rows,
            span.display_range(),
            total_rows,
            schema.display_name
        );
        let _ = writeln!(user);
        let _ = writeln!(user, "SOURCE COLUMNS: {}", batch.columns().join(", "));
        let _ = writeln!(user);
        let _ = writeln!(user, "TARGET COLUMNS (use exactly these names, in this order):");
        let _ = writeln!(user, "{}", schema.columns.join(","));
        let _ = writeln!(user);

        if !schema.required.is_empty() {
            let _ = writeln!(user, "REQUIRED FIELDS: {}", schema.required.join(", "));
            let _ = writeln!(user);
        }

        if !schema.guidelines.is_empty() {
            let _ = writeln!(user, "MARKETPLACE GUIDELINES:");
            let _ = writeln!(user, "{}", schema.guidelines);
            let _ = writeln!(user);
        }

        let _ = writeln!(user, "CRITICAL RULES:");
        let _ = writeln!(
            user,
            "1. Output EXACTLY {} data rows, one for each source row, in the same order.",
            expected_rows
        );
        let _ = writeln!(
            user,
            "2. Start with a header row containing exactly the target column names above."
        );
        let _ = writeln!(
            user,
            "3. If a required field is missing from the source, generate a plausible value."
        );
        let _ = writeln!(user, "4. Leave optional fields empty when no value fits.");
        let _ = writeln!(
            user,
            "5. Quote any value that contains a comma, quote or line break."
        );
        let _ = writeln!(
            user,
            "6. Return ONLY the CSV. No explanations, no commentary, no markdown code fences."
        );
        let _ = writeln!(user);
        let _ = writeln!(user, "SOURCE DATA:");
        user.push_str(&source_csv);

        Ok(Prompt {
            system,
            user,
            expected_rows,
            max_tokens: self.budget.for_rows(expected_rows),
        })
    }
}

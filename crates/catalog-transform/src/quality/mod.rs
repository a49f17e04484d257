//! Output quality classification.
//!
//! This module grades each transformed row by how completely the model
//! filled the schema's required fields. The grades are informational: they
//! never change the output table.

mod confidence;

pub use confidence::{Confidence, ConfidenceAnalyzer, ConfidenceSummary, FAILED_FILL_RATE};

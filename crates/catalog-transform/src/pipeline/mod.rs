//! Pipeline module.
//!
//! This module provides the transformation pipeline, the per-batch executor
//! and progress reporting with cancellation.

mod builder;
mod executor;
pub mod progress;

pub use builder::{InputSource, Pipeline, PipelineBuilder, TransformRequest};
pub use executor::BatchExecutor;
pub use progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, TransformStage,
};

//! Progress reporting and cancellation support for the transformation pipeline.
//!
//! This module provides types for tracking pipeline progress and supporting
//! cancellation from external threads (e.g., an HTTP request that was
//! abandoned, or a CLI interrupt).
//!
//! # Example
//!
//! ```rust,ignore
//! use catalog_transform::{Pipeline, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! // In another thread
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(30));
//!     token_clone.cancel();
//! });
//!
//! let result = Pipeline::builder()
//!     .model_client(client)
//!     .cancellation_token(token)
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.stage, update.message);
//!     })
//!     .build()?
//!     .run(request);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages of a transformation run.
///
/// A run moves `Idle → Reading → Batching → ProcessingBatches → Assembling
/// → Complete`, or ends early in `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStage {
    /// Run has not started
    Idle,
    /// Decoding and parsing the input table
    Reading,
    /// Assessing the data and planning batches
    Batching,
    /// Sending batches to the model and reconciling responses
    ProcessingBatches,
    /// Stitching batches together and writing output
    Assembling,
    /// Run completed successfully
    Complete,
    /// Run was cancelled through its token
    Cancelled,
    /// Run failed with an error
    Failed,
}

impl TransformStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Reading => "Reading Input",
            Self::Batching => "Planning Batches",
            Self::ProcessingBatches => "Transforming Batches",
            Self::Assembling => "Assembling Output",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Returns the typical weight of this stage in the overall run (0.0 - 1.0).
    ///
    /// Model calls dominate the wall-clock time of a run.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::Reading => 0.05,
            Self::Batching => 0.02,
            Self::ProcessingBatches => 0.85,
            Self::Assembling => 0.08,
            Self::Complete => 0.0,
            Self::Cancelled => 0.0,
            Self::Failed => 0.0,
        }
    }

    /// Returns the cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::Reading => 0.0,
            Self::Batching => 0.05,
            Self::ProcessingBatches => 0.07,
            Self::Assembling => 0.92,
            Self::Complete => 1.0,
            Self::Cancelled => 0.0,
            Self::Failed => 0.0,
        }
    }

    /// Whether the run has ended in this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }
}

/// Progress update emitted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current pipeline stage
    pub stage: TransformStage,

    /// Optional sub-stage description (e.g., "Batch 3/12")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    /// Human-readable message describing current activity
    pub message: String,

    /// Rows processed so far in the current stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    /// Total rows in the current stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    /// Creates a new progress update for a stage without sub-stage info.
    pub fn new(stage: TransformStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: None,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a new progress update with item counts.
    pub fn with_items(
        stage: TransformStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            sub_stage: Some(sub_stage.into()),
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: Some(current),
            items_total: Some(total),
        }
    }

    /// Creates a completion progress update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: TransformStage::Complete,
            sub_stage: None,
            progress: 1.0,
            stage_progress: 1.0,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a cancelled progress update.
    pub fn cancelled() -> Self {
        Self {
            stage: TransformStage::Cancelled,
            sub_stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            message: "Transformation cancelled".to_string(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Creates a failed progress update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: TransformStage::Failed,
            sub_stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be `Send + Sync` because runs execute on worker
/// threads while the reporter usually forwards to a UI or a log.
///
/// # Example
///
/// ```rust,ignore
/// use catalog_transform::{ProgressReporter, ProgressUpdate};
/// use std::sync::mpsc::Sender;
/// use std::sync::Mutex;
///
/// struct ChannelReporter(Mutex<Sender<ProgressUpdate>>);
///
/// impl ProgressReporter for ChannelReporter {
///     fn report(&self, update: ProgressUpdate) {
///         if let Ok(tx) = self.0.lock() {
///             let _ = tx.send(update);
///         }
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    /// Called when progress is made. May be called once per batch, so
    /// implementations should be cheap and non-blocking.
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
///
/// # Example
///
/// ```rust,ignore
/// Pipeline::builder()
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .run(request);
/// ```
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    /// Creates a new closure-based progress reporter.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running transformation.
///
/// This token uses an atomic boolean internally, making it safe to clone
/// and share across threads. Call [`cancel()`](Self::cancel) from any thread
/// to request cancellation.
///
/// The pipeline checks the token before every batch and before writing
/// output, and returns
/// [`TransformError::Cancelled`](crate::error::TransformError::Cancelled)
/// when cancellation was requested. A batch already waiting on the model is
/// allowed to finish.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    /// Creates a new cancellation token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Thread-safe.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if [`cancel()`](Self::cancel) has been called on this
    /// token or any of its clones.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        assert!(!token1.is_cancelled());
        token1.cancel();
        assert!(token2.is_cancelled());

        token2.reset();
        assert!(!token1.is_cancelled());
    }

    #[test]
    fn test_progress_update_with_items() {
        let update = ProgressUpdate::with_items(
            TransformStage::ProcessingBatches,
            "Batch 2/4",
            20,
            40,
            "Transforming rows 11-20",
        );
        assert_eq!(update.stage, TransformStage::ProcessingBatches);
        assert_eq!(update.sub_stage, Some("Batch 2/4".to_string()));
        assert_eq!(update.stage_progress, 0.5);
        assert!((update.progress - (0.07 + 0.85 * 0.5)).abs() < 1e-6);
        assert_eq!(update.items_total, Some(40));
    }

    #[test]
    fn test_progress_update_terminal_states() {
        let update = ProgressUpdate::complete("Done!");
        assert_eq!(update.stage, TransformStage::Complete);
        assert_eq!(update.progress, 1.0);
        assert!(update.stage.is_terminal());

        assert_eq!(ProgressUpdate::cancelled().stage, TransformStage::Cancelled);
        assert!(!TransformStage::Reading.is_terminal());
    }

    #[test]
    fn test_closure_progress_reporter() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let reporter = ClosureProgressReporter::new(move |_update| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        reporter.report(ProgressUpdate::new(TransformStage::Reading, 0.5, "Test"));
        reporter.report(ProgressUpdate::complete("Done"));

        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stage_weights_sum() {
        let stages = [
            TransformStage::Reading,
            TransformStage::Batching,
            TransformStage::ProcessingBatches,
            TransformStage::Assembling,
        ];

        let total_weight: f32 = stages.iter().map(|s| s.weight()).sum();
        assert!((total_weight - 1.0).abs() < 0.01, "Weights should sum to ~1.0");

        for pair in stages.windows(2) {
            let expected = pair[0].base_progress() + pair[0].weight();
            assert!((pair[1].base_progress() - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stage_json_values() {
        let stage_expectations = [
            (TransformStage::Idle, "\"idle\""),
            (TransformStage::Reading, "\"reading\""),
            (TransformStage::Batching, "\"batching\""),
            (TransformStage::ProcessingBatches, "\"processing_batches\""),
            (TransformStage::Assembling, "\"assembling\""),
            (TransformStage::Complete, "\"complete\""),
            (TransformStage::Cancelled, "\"cancelled\""),
            (TransformStage::Failed, "\"failed\""),
        ];

        for (stage, expected_json) in stage_expectations {
            let json = serde_json::to_string(&stage).expect("Should serialize");
            assert_eq!(json, expected_json);
        }
    }

    #[test]
    fn test_cancellation_across_threads() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            token_clone.is_cancelled()
        });

        token.cancel();

        let was_cancelled = handle.join().expect("Thread should not panic");
        assert!(was_cancelled, "Cancellation should be visible across threads");
    }
}

//! Transformation pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! orchestrating a row-preserving transformation run.

use crate::ai::ModelClient;
use crate::assembler::assemble;
use crate::batcher::{AdaptiveBatcher, assess_complexity, initial_batch_size};
use crate::config::{ConfigValidationError, PipelineConfig};
use crate::error::{Result, TransformError};
use crate::output::{HistoryRecord, HistorySink, OutputStore, generate_run_id};
use crate::pipeline::BatchExecutor;
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, TransformStage,
};
use crate::quality::ConfidenceAnalyzer;
use crate::reader::{ReadOutcome, TableReader};
use crate::schema::TargetSchema;
use crate::types::{RunSummary, TransformationResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where the input CSV comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Path(PathBuf),
    /// Uploaded content with its original file name.
    Bytes { name: String, data: Vec<u8> },
}

/// One file to transform into one target schema.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub source: InputSource,
    pub schema: Arc<TargetSchema>,
    /// Overrides [`PipelineConfig::max_rows`] for this request.
    pub max_rows: Option<usize>,
}

impl TransformRequest {
    pub fn from_path(path: impl Into<PathBuf>, schema: Arc<TargetSchema>) -> Self {
        Self {
            source: InputSource::Path(path.into()),
            schema,
            max_rows: None,
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>, schema: Arc<TargetSchema>) -> Self {
        Self {
            source: InputSource::Bytes {
                name: name.into(),
                data,
            },
            schema,
            max_rows: None,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// File name of the source, used for run ids and history.
    pub fn source_name(&self) -> String {
        match &self.source {
            InputSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            InputSource::Bytes { name, .. } => name.clone(),
        }
    }
}

/// The transformation pipeline.
///
/// Use [`Pipeline::builder()`] to create a pipeline. A pipeline holds no
/// per-run state and can serve several runs, including from several threads.
///
/// # Example
///
/// ```rust,ignore
/// use catalog_transform::{Marketplace, Pipeline, PipelineConfig, TransformRequest};
/// use catalog_transform::ai::OpenAiClient;
/// use std::sync::Arc;
///
/// let client = Arc::new(OpenAiClient::new(api_key)?);
/// let schema = Arc::new(Marketplace::Amazon.target_schema());
///
/// let result = Pipeline::builder()
///     .model_client(client)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .config(PipelineConfig::default())
///     .build()?
///     .run(TransformRequest::from_path("products.csv", schema));
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    client: Arc<dyn ModelClient>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
    history_sink: Option<Arc<dyn HistorySink>>,
    executor: BatchExecutor,
    store: OutputStore,
}

// Runs of one pipeline may execute on scoped worker threads.
static_assertions::assert_impl_all!(Pipeline: Send, Sync);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// Run a transformation, folding errors into a failed result.
    pub fn run(&self, request: TransformRequest) -> TransformationResult {
        let start = Instant::now();
        let run_id = generate_run_id(&request.schema.name, &request.source_name());
        match self.process(&request, &run_id, start) {
            Ok(result) => result,
            Err(e) => TransformationResult::failure(
                run_id,
                request.schema.name.clone(),
                &e,
                start.elapsed().as_millis() as u64,
            ),
        }
    }

    /// Run a transformation.
    ///
    /// # Errors
    ///
    /// Returns `Err(TransformError::Cancelled)` if the run was cancelled via
    /// the cancellation token. Input and output failures are returned as
    /// their own variants; batch-level failures never abort the run.
    pub fn try_run(&self, request: TransformRequest) -> Result<TransformationResult> {
        let start = Instant::now();
        let run_id = generate_run_id(&request.schema.name, &request.source_name());
        self.process(&request, &run_id, start)
    }

    fn process(
        &self,
        request: &TransformRequest,
        run_id: &str,
        start: Instant,
    ) -> Result<TransformationResult> {
        match self.process_internal(request, run_id, start) {
            Ok(result) => {
                self.report_progress(ProgressUpdate::complete(format!(
                    "Transformed {} rows",
                    result.output_rows
                )));
                Ok(result)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("Run {} failed: {}", run_id, e);
                Err(e)
            }
        }
    }

    /// Check if cancellation has been requested.
    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(TransformError::Cancelled);
        }
        Ok(())
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn read_input(&self, request: &TransformRequest) -> Result<ReadOutcome> {
        let limit = request.max_rows.unwrap_or(self.config.max_rows);
        let reader = TableReader::new(limit, self.config.row_limit_policy);
        let outcome = match &request.source {
            InputSource::Path(path) => reader.read_path(path)?,
            InputSource::Bytes { data, .. } => reader.read_bytes(data)?,
        };
        Ok(outcome)
    }

    fn process_internal(
        &self,
        request: &TransformRequest,
        run_id: &str,
        start: Instant,
    ) -> Result<TransformationResult> {
        let schema = request.schema.as_ref();
        let source_name = request.source_name();
        schema.validate()?;

        info!("Starting run {} ({} -> {})", run_id, source_name, schema.display_name);
        self.check_cancelled()?;

        // Step 1: Read the input
        self.report_progress(ProgressUpdate::new(
            TransformStage::Reading,
            0.0,
            format!("Reading {}...", source_name),
        ));
        let input = self.read_input(request)?;
        let input_rows = input.table.row_count();
        self.report_progress(ProgressUpdate::new(
            TransformStage::Reading,
            1.0,
            format!("Read {} rows", input_rows),
        ));

        // Step 2: Plan batches
        let complexity = assess_complexity(&input.table);
        let initial_size = initial_batch_size(self.config.batch_size, complexity);
        let mut batcher =
            AdaptiveBatcher::new(input_rows, initial_size, self.config.adaptive_batching);
        debug!("Complexity {:?}, initial batch size {}", complexity, initial_size);
        self.report_progress(ProgressUpdate::new(
            TransformStage::Batching,
            1.0,
            format!("Batching {} rows, {} per batch", input_rows, initial_size),
        ));

        let mut summary =
            RunSummary::new(input.encoding, input.mode, input.truncated_from, complexity);
        if let Some(original) = input.truncated_from {
            summary.add_warning(format!(
                "Input truncated from {} to {} rows",
                original, input_rows
            ));
        }

        // Step 3: Transform batch by batch
        let mut batches = Vec::new();
        let mut rows_done = 0;
        while let Some(span) = batcher.next_span() {
            self.check_cancelled()?;
            self.report_progress(ProgressUpdate::with_items(
                TransformStage::ProcessingBatches,
                format!("Batch {}", span.index + 1),
                rows_done,
                input_rows,
                format!("Transforming rows {}", span.display_range()),
            ));

            let slice = input.table.slice(&span);
            let (batch, report) =
                self.executor
                    .execute(self.client.as_ref(), &slice, &span, input_rows, schema)?;
            batcher.observe(report.is_degraded());
            summary.add_batch(report);

            rows_done = span.end;
            batches.push(batch);
        }
        self.report_progress(ProgressUpdate::with_items(
            TransformStage::ProcessingBatches,
            format!("{} batches", batches.len()),
            rows_done,
            input_rows,
            "All batches transformed",
        ));

        // Step 4: Assemble and grade
        self.report_progress(ProgressUpdate::new(
            TransformStage::Assembling,
            0.0,
            "Assembling output...",
        ));
        let (table, assembly) = assemble(schema, batches, input_rows);
        summary.assembly_adjustment = assembly.adjustment;
        summary.confidence = ConfidenceAnalyzer::summarize(&table, &assembly.origins, schema);

        if summary.failed_batches > 0 {
            summary.add_warning(format!(
                "{} batches produced no usable rows and were filled with placeholders",
                summary.failed_batches
            ));
        }
        let sparse = summary.confidence.sparse_columns();
        if !sparse.is_empty() {
            let message = format!("Mostly empty required columns: {}", sparse.join(", "));
            summary.add_warning(message);
        }

        self.check_cancelled()?;

        // Step 5: Persist
        let output_path = if self.config.save_to_disk {
            Some(self.store.save(run_id, &table)?)
        } else {
            None
        };
        self.report_progress(ProgressUpdate::new(
            TransformStage::Assembling,
            1.0,
            "Output assembled",
        ));

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let output_rows = table.row_count();
        info!(
            "Run {} finished: {} -> {} rows in {}ms ({} retried, {} failed batches)",
            run_id,
            input_rows,
            output_rows,
            elapsed_ms,
            summary.retried_batches,
            summary.failed_batches
        );

        self.record_history(HistoryRecord {
            run_id: run_id.to_string(),
            marketplace: schema.name.clone(),
            source_filename: source_name,
            output_filename: output_path.as_deref().and_then(file_name),
            input_rows,
            output_rows,
            elapsed_ms,
            recorded_at: Utc::now(),
        });

        Ok(TransformationResult {
            run_id: run_id.to_string(),
            success: true,
            marketplace: schema.name.clone(),
            input_rows,
            output_rows,
            output_path,
            elapsed_ms,
            error: None,
            error_code: None,
            summary: Some(summary),
            table: Some(table),
        })
    }

    fn record_history(&self, record: HistoryRecord) {
        if let Some(sink) = &self.history_sink
            && let Err(e) = sink.record(&record)
        {
            warn!("Could not record history for {}: {}", record.run_id, e);
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Builder for creating a [`Pipeline`] instance.
///
/// A model client is required; everything else has a default.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    client: Option<Arc<dyn ModelClient>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
    history_sink: Option<Arc<dyn HistorySink>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the model client used for every batch.
    ///
    /// Use `Arc` so one client can be shared by several pipelines.
    pub fn model_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set a progress reporter for receiving updates during a run.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// This is a convenience method for simple progress handling.
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping a run.
    ///
    /// The token is checked before every batch and before the output is
    /// written. A cancelled run returns [`TransformError::Cancelled`] and
    /// leaves no output file behind.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Record every successful run to `sink`.
    pub fn history_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history_sink = Some(sink);
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid or no model client
    /// was set.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let client = self.client.ok_or(ConfigValidationError::MissingModelClient)?;

        Ok(Pipeline {
            executor: BatchExecutor::from_config(&config),
            store: OutputStore::new(config.output_dir.clone()),
            config,
            client,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
            history_sink: self.history_sink,
        })
    }
}

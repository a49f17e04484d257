//! Integration tests for the catalog transformation pipeline.
//!
//! These tests drive full runs against a scripted model client that answers
//! from the source rows embedded in each prompt, so every run is
//! deterministic.

use catalog_transform::ai::{CompletionOptions, ModelClient};
use catalog_transform::{
    BatchOutcome, CancellationToken, JsonlHistorySink, ModelError, Pipeline, PipelineConfig,
    RowLimitPolicy, TargetSchema, TransformError, TransformRequest, TransformStage,
    TransformationResult,
};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn schema() -> Arc<TargetSchema> {
    Arc::new(TargetSchema {
        name: "shop".into(),
        display_name: "Test Shop".into(),
        columns: vec!["sku".into(), "title".into(), "price".into(), "brand".into()],
        required: vec!["sku".into(), "title".into()],
        guidelines: "Prices in AUD.".into(),
    })
}

fn products_request() -> TransformRequest {
    TransformRequest::from_path(fixtures_path().join("products.csv"), schema())
}

fn config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .batch_size(5)
        .adaptive_batching(false)
        .retry_backoff_ms(0)
        .output_dir(output_dir)
        .build()
        .unwrap()
}

fn pipeline(client: Arc<ScriptedClient>, output_dir: &Path) -> Pipeline {
    Pipeline::builder()
        .config(config(output_dir))
        .model_client(client)
        .build()
        .unwrap()
}

fn column(result: &TransformationResult, name: &str) -> Vec<String> {
    let table = result.table.as_ref().unwrap();
    (0..table.row_count())
        .map(|row| table.value(row, name).unwrap_or_default().to_string())
        .collect()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// Scripted Model Client
// ============================================================================

/// How the client answers one request.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Reply {
    /// One target row per source row.
    Mirror,
    /// Mirror, wrapped in a markdown code fence.
    Fenced,
    /// Mirror with the target columns in a different order and `brand` missing.
    Reordered,
    /// Mirror without the last row.
    DropLast,
    /// Only the first N source rows.
    FirstRows(usize),
    /// Mirror plus one invented row.
    ExtraRow,
    /// A sentence instead of CSV.
    Prose,
    Empty,
    Transient,
}

/// Answers according to a plan, then with a fallback reply.
///
/// Rows are derived from the `SOURCE DATA` block of the prompt: `sku` from
/// `handle`, `title` from `name` and `price` copied as is.
struct ScriptedClient {
    plan: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    cancel_on_first_call: Option<CancellationToken>,
}

impl ScriptedClient {
    fn new(plan: &[Reply], fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(plan.iter().copied().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            cancel_on_first_call: None,
        })
    }

    fn mirror() -> Arc<Self> {
        Self::new(&[], Reply::Mirror)
    }

    fn cancelling(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(VecDeque::new()),
            fallback: Reply::Mirror,
            calls: AtomicUsize::new(0),
            cancel_on_first_call: Some(token),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn source_rows(user: &str) -> Vec<Vec<String>> {
        let data = user.split("SOURCE DATA:\n").nth(1).unwrap_or_default();
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let headers = reader.headers().unwrap().clone();
        let index = |name: &str| headers.iter().position(|h| h == name);
        let (handle, name, price) = (index("handle"), index("name"), index("price"));

        reader
            .records()
            .map(|record| {
                let record = record.unwrap();
                let get = |idx: Option<usize>| {
                    idx.and_then(|i| record.get(i)).unwrap_or_default().to_string()
                };
                vec![get(handle), get(name), get(price), String::new()]
            })
            .collect()
    }

    fn render(header: &[&str], rows: &[Vec<String>]) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(header).unwrap();
        for row in rows {
            writer.write_record(row).unwrap();
        }
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }
}

impl ModelClient for ScriptedClient {
    fn complete(
        &self,
        _system: &str,
        user: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0
            && let Some(token) = &self.cancel_on_first_call
        {
            token.cancel();
        }

        let reply = self
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        let mut rows = Self::source_rows(user);
        let header = ["sku", "title", "price", "brand"];

        match reply {
            Reply::Mirror => Ok(Self::render(&header, &rows)),
            Reply::Fenced => Ok(format!(
                "Here is the transformed data:\n```csv\n{}```\n",
                Self::render(&header, &rows)
            )),
            Reply::Reordered => {
                let reordered: Vec<Vec<String>> = rows
                    .iter()
                    .map(|r| vec![r[2].clone(), r[0].clone(), r[1].clone()])
                    .collect();
                Ok(Self::render(&["price", "sku", "title"], &reordered))
            }
            Reply::DropLast => {
                rows.pop();
                Ok(Self::render(&header, &rows))
            }
            Reply::FirstRows(count) => {
                rows.truncate(count);
                Ok(Self::render(&header, &rows))
            }
            Reply::ExtraRow => {
                rows.push(vec![
                    "X999".into(),
                    "Invented".into(),
                    "1.00".into(),
                    String::new(),
                ]);
                Ok(Self::render(&header, &rows))
            }
            Reply::Prose => Ok("I cannot transform these rows.".to_string()),
            Reply::Empty => Err(ModelError::EmptyResponse),
            Reply::Transient => Err(ModelError::transient("503 Service Unavailable")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Full Runs
// ============================================================================

#[test]
fn test_exact_responses_preserve_rows_and_order() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::mirror();
    let pipeline = pipeline(client.clone(), dir.path());

    let result = pipeline.try_run(products_request()).unwrap();

    assert!(result.success);
    assert_eq!(result.input_rows, 12);
    assert_eq!(result.output_rows, 12);
    assert!(result.row_counts_match());
    assert_eq!(client.calls(), 3);

    let table = result.table.as_ref().unwrap();
    assert_eq!(table.columns(), schema().columns.as_slice());
    let skus = column(&result, "sku");
    let expected: Vec<String> = (1..=12).map(|i| format!("P{:03}", i)).collect();
    assert_eq!(skus, expected);
    assert_eq!(table.value(0, "title"), Some("Ceramic Mug"));
    assert_eq!(table.value(5, "price"), Some("48.00"));

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.batches.len(), 3);
    assert_eq!(
        summary.batches.iter().map(|b| (b.start, b.end)).collect::<Vec<_>>(),
        vec![(0, 5), (5, 10), (10, 12)]
    );
    assert!(summary.batches.iter().all(|b| b.outcome == BatchOutcome::Accepted));
    assert_eq!(summary.retried_batches, 0);
    assert_eq!(summary.confidence.high, 12);
    assert!(summary.warnings.is_empty());
}

#[test]
fn test_output_file_round_trips() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(ScriptedClient::mirror(), dir.path());

    let result = pipeline.run(products_request());

    let path = result.output_path.clone().unwrap();
    assert_eq!(path, pipeline.store().path_for(&result.run_id));
    assert!(path.exists());
    assert!(result.run_id.starts_with("shop_products_"));

    let loaded = pipeline.store().load(&result.run_id).unwrap();
    assert_eq!(&loaded, result.table.as_ref().unwrap());
    assert_eq!(files_in(dir.path()), vec![path]);
}

#[test]
fn test_in_memory_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        save_to_disk: false,
        ..config(dir.path())
    };
    let pipeline = Pipeline::builder()
        .config(config)
        .model_client(ScriptedClient::mirror())
        .build()
        .unwrap();

    let result = pipeline.run(products_request());

    assert!(result.success);
    assert!(result.output_path.is_none());
    assert_eq!(result.output_rows, 12);
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_too_few_rows_are_padded_by_duplication() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new(&[Reply::DropLast], Reply::Mirror);
    let result = pipeline(client.clone(), dir.path())
        .try_run(products_request())
        .unwrap();

    // 4 of 5 rows meets the coverage threshold, so no retry.
    assert_eq!(client.calls(), 3);
    assert_eq!(result.output_rows, 12);

    let skus = column(&result, "sku");
    assert_eq!(&skus[..6], &["P001", "P002", "P003", "P004", "P004", "P006"]);

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.duplicated_rows, 1);
    assert_eq!(summary.placeholder_rows, 0);
    assert_eq!(summary.confidence.high, 11);
    assert_eq!(summary.confidence.partial, 1);
}

#[test]
fn test_short_second_batch_of_ten_rows_is_padded() {
    let dir = TempDir::new().unwrap();
    let fixture = std::fs::read_to_string(fixtures_path().join("products.csv")).unwrap();
    let first_ten: Vec<&str> = fixture.lines().take(11).collect();
    let data = format!("{}\n", first_ten.join("\n")).into_bytes();

    let client = ScriptedClient::new(&[Reply::Mirror, Reply::FirstRows(3)], Reply::Mirror);
    let result = pipeline(client.clone(), dir.path())
        .try_run(TransformRequest::from_bytes("ten.csv", data, schema()))
        .unwrap();

    assert_eq!(client.calls(), 2);
    assert_eq!(result.input_rows, 10);
    assert_eq!(result.output_rows, 10);

    let skus = column(&result, "sku");
    assert_eq!(&skus[5..], &["P006", "P007", "P008", "P008", "P008"]);

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.batches.len(), 2);
    assert_eq!(summary.duplicated_rows, 2);
    assert!(summary.batches[1].reconcile.count_mismatch());
}

#[test]
fn test_adaptive_batches_shrink_after_degraded_batch() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::builder()
        .batch_size(4)
        .adaptive_batching(true)
        .retry_backoff_ms(0)
        .output_dir(dir.path())
        .build()
        .unwrap();
    let client = ScriptedClient::new(&[Reply::DropLast], Reply::Mirror);
    let pipeline = Pipeline::builder()
        .config(config)
        .model_client(client.clone())
        .build()
        .unwrap();

    let result = pipeline.try_run(products_request()).unwrap();

    assert_eq!(result.output_rows, 12);
    let summary = result.summary.as_ref().unwrap();
    let spans: Vec<(usize, usize)> = summary.batches.iter().map(|b| (b.start, b.end)).collect();
    // Halved after the short first batch, restored after two clean ones.
    assert_eq!(spans, vec![(0, 4), (4, 6), (6, 8), (8, 12)]);
    assert!(summary.batches[0].is_degraded());
    assert!(summary.batches[1..].iter().all(|b| !b.is_degraded()));
    assert_eq!(client.calls(), 4);

    let skus = column(&result, "sku");
    assert_eq!(&skus[..5], &["P001", "P002", "P003", "P003", "P005"]);
    assert_eq!(skus[11], "P012");
}

#[test]
fn test_too_many_rows_are_truncated() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new(&[Reply::Mirror, Reply::ExtraRow], Reply::Mirror);
    let result = pipeline(client, dir.path()).try_run(products_request()).unwrap();

    assert_eq!(result.output_rows, 12);
    let skus = column(&result, "sku");
    assert!(!skus.contains(&"X999".to_string()));
    assert_eq!(skus[9], "P010");

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.truncated_rows, 1);
    assert!(summary.batches[1].reconcile.count_mismatch());
}

#[test]
fn test_malformed_responses_become_placeholders() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new(&[], Reply::Prose);
    let result = pipeline(client.clone(), dir.path())
        .try_run(products_request())
        .unwrap();

    // Three batches, three attempts each.
    assert_eq!(client.calls(), 9);
    assert!(result.success);
    assert_eq!(result.output_rows, 12);
    assert!(column(&result, "sku").iter().all(|v| v.is_empty()));

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.failed_batches, 3);
    assert_eq!(summary.placeholder_rows, 12);
    assert_eq!(summary.confidence.failed, 12);
    assert!(summary.batches.iter().all(|b| b.outcome == BatchOutcome::Failed));
    assert!(summary.batches[0].reconcile.malformed.is_some());
    assert!(!summary.warnings.is_empty());
}

#[test]
fn test_low_coverage_response_is_retried() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new(&[Reply::Prose, Reply::Mirror], Reply::Mirror);
    let result = pipeline(client.clone(), dir.path())
        .try_run(products_request())
        .unwrap();

    assert_eq!(client.calls(), 4);
    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.batches[0].outcome, BatchOutcome::Recovered);
    assert_eq!(summary.batches[0].attempts, 2);
    assert_eq!(summary.retried_batches, 1);
    assert_eq!(summary.confidence.high, 12);
}

#[test]
fn test_empty_response_is_retried_once() {
    let dir = TempDir::new().unwrap();

    let client = ScriptedClient::new(&[Reply::Empty], Reply::Mirror);
    let result = pipeline(client.clone(), dir.path())
        .try_run(products_request())
        .unwrap();
    assert_eq!(client.calls(), 4);
    assert_eq!(
        result.summary.as_ref().unwrap().batches[0].outcome,
        BatchOutcome::Recovered
    );

    let client = ScriptedClient::new(&[Reply::Empty, Reply::Empty], Reply::Mirror);
    let result = pipeline(client.clone(), dir.path())
        .try_run(products_request())
        .unwrap();
    let first = &result.summary.as_ref().unwrap().batches[0];
    assert_eq!(first.attempts, 2);
    assert_eq!(first.outcome, BatchOutcome::Failed);
    assert_eq!(result.output_rows, 12);
    assert_eq!(column(&result, "sku")[5], "P006");
}

#[test]
fn test_transient_errors_are_retried() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new(&[Reply::Transient, Reply::Transient], Reply::Mirror);
    let result = pipeline(client.clone(), dir.path())
        .try_run(products_request())
        .unwrap();

    assert_eq!(client.calls(), 5);
    let first = &result.summary.as_ref().unwrap().batches[0];
    assert_eq!(first.attempts, 3);
    assert_eq!(first.outcome, BatchOutcome::Recovered);
    assert!(first.last_error.as_deref().unwrap().contains("503"));
    assert_eq!(result.summary.as_ref().unwrap().total_attempts, 5);
}

#[test]
fn test_fenced_and_reordered_responses() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new(&[Reply::Fenced, Reply::Reordered], Reply::Mirror);
    let result = pipeline(client, dir.path()).try_run(products_request()).unwrap();

    let table = result.table.as_ref().unwrap();
    assert_eq!(table.columns(), schema().columns.as_slice());
    assert_eq!(table.value(0, "sku"), Some("P001"));
    assert_eq!(table.value(6, "sku"), Some("P007"));
    assert_eq!(table.value(6, "title"), Some("Oven Mitt"));
    assert_eq!(table.value(6, "price"), Some("7.80"));

    let summary = result.summary.as_ref().unwrap();
    assert!(summary.batches[0].reconcile.missing_columns.is_empty());
    assert_eq!(summary.batches[1].reconcile.missing_columns, vec!["brand"]);
    assert_eq!(summary.missing_columns, vec!["brand"]);
}

// ============================================================================
// Input Handling
// ============================================================================

#[test]
fn test_row_limit_rejects_by_default() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::mirror();
    let result = pipeline(client.clone(), dir.path()).run(products_request().with_max_rows(5));

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("ROW_LIMIT_EXCEEDED"));
    assert_eq!(client.calls(), 0);
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_row_limit_truncates_when_opted_in() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        row_limit_policy: RowLimitPolicy::Truncate,
        ..config(dir.path())
    };
    let pipeline = Pipeline::builder()
        .config(config)
        .model_client(ScriptedClient::mirror())
        .build()
        .unwrap();

    let result = pipeline
        .try_run(products_request().with_max_rows(5))
        .unwrap();

    assert_eq!(result.input_rows, 5);
    assert_eq!(result.output_rows, 5);
    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.input_truncated_from, Some(12));
    assert_eq!(summary.warnings.len(), 1);
}

#[test]
fn test_latin1_upload() {
    let dir = TempDir::new().unwrap();
    let data = b"handle,name,price\nP1,Caf\xe9 mug,4.00\nP2,Cr\xe8me jug,6.00\n".to_vec();
    let request = TransformRequest::from_bytes("upload.csv", data, schema());

    let result = pipeline(ScriptedClient::mirror(), dir.path())
        .try_run(request)
        .unwrap();

    assert_eq!(column(&result, "title"), vec!["Café mug", "Crème jug"]);
}

#[test]
fn test_header_only_input_yields_empty_output() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::mirror();
    let request = TransformRequest::from_path(fixtures_path().join("header_only.csv"), schema());

    let result = pipeline(client.clone(), dir.path()).try_run(request).unwrap();

    assert!(result.success);
    assert_eq!(result.output_rows, 0);
    assert_eq!(client.calls(), 0);
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();
    let request = TransformRequest::from_path(fixtures_path().join("missing.csv"), schema());

    let error = pipeline(ScriptedClient::mirror(), dir.path())
        .try_run(request)
        .unwrap_err();

    assert!(error.is_input_error());
}

#[test]
fn test_invalid_schema_is_rejected() {
    let dir = TempDir::new().unwrap();
    let schema = Arc::new(TargetSchema {
        columns: Vec::new(),
        ..schema().as_ref().clone()
    });
    let request = TransformRequest::from_path(fixtures_path().join("products.csv"), schema);

    let result = pipeline(ScriptedClient::mirror(), dir.path()).run(request);

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("INVALID_CONFIG"));
}

// ============================================================================
// Cancellation, Progress and History
// ============================================================================

#[test]
fn test_cancellation_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let stages_clone = stages.clone();

    let client = ScriptedClient::cancelling(token.clone());
    let pipeline = Pipeline::builder()
        .config(config(dir.path()))
        .model_client(client.clone())
        .cancellation_token(token)
        .on_progress(move |update| stages_clone.lock().unwrap().push(update.stage))
        .build()
        .unwrap();

    let error = pipeline.try_run(products_request()).unwrap_err();

    assert!(matches!(error, TransformError::Cancelled));
    assert_eq!(client.calls(), 1);
    assert!(files_in(dir.path()).is_empty());
    assert_eq!(stages.lock().unwrap().last(), Some(&TransformStage::Cancelled));
}

#[test]
fn test_progress_reaches_completion() {
    let dir = TempDir::new().unwrap();
    let updates = Arc::new(Mutex::new(Vec::new()));
    let updates_clone = updates.clone();

    let pipeline = Pipeline::builder()
        .config(config(dir.path()))
        .model_client(ScriptedClient::mirror())
        .on_progress(move |update| updates_clone.lock().unwrap().push(update))
        .build()
        .unwrap();
    pipeline.try_run(products_request()).unwrap();

    let updates = updates.lock().unwrap();
    let stages: Vec<TransformStage> = updates.iter().map(|u| u.stage).collect();
    assert_eq!(stages.first(), Some(&TransformStage::Reading));
    assert_eq!(stages.last(), Some(&TransformStage::Complete));
    assert!(stages.contains(&TransformStage::ProcessingBatches));
    assert!(stages.contains(&TransformStage::Assembling));
    assert!(
        updates
            .windows(2)
            .all(|w| w[1].progress + 1e-5 >= w[0].progress),
        "progress should never go backwards"
    );
}

#[test]
fn test_history_is_recorded() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonlHistorySink::new(dir.path().join("history.jsonl")));

    let pipeline = Pipeline::builder()
        .config(config(&dir.path().join("out")))
        .model_client(ScriptedClient::mirror())
        .history_sink(sink.clone())
        .build()
        .unwrap();

    let result = pipeline.run(products_request());
    pipeline.run(products_request().with_max_rows(1));

    let records = sink.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].run_id, result.run_id);
    assert_eq!(records[0].marketplace, "shop");
    assert_eq!(records[0].source_filename, "products.csv");
    assert_eq!(
        records[0].output_filename.as_deref(),
        Some(format!("{}.csv", result.run_id).as_str())
    );
    assert_eq!(records[0].input_rows, 12);
    assert_eq!(records[0].output_rows, 12);
}

#[test]
fn test_concurrent_runs_share_a_pipeline() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(ScriptedClient::mirror(), dir.path());

    let results: Vec<TransformationResult> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| scope.spawn(|| pipeline.run(products_request())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|r| r.success && r.output_rows == 12));
}

//! Persisting transformed tables and recording finished runs.
//!
//! Files are written under a temporary name and renamed into place, so a
//! reader of the output directory never observes a partial CSV.

use crate::config::RowLimitPolicy;
use crate::error::{Result, ResultExt, TransformError};
use crate::reader::TableReader;
use crate::table::Table;
use chrono::{DateTime, Local, Utc};
use polars::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Build a run id: `{marketplace}_{source-stem}_{timestamp}_{random}`.
///
/// The stem is reduced to ASCII letters, digits, `-` and `_`.
pub fn generate_run_id(marketplace: &str, source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() { "input".to_string() } else { stem };

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{}_{}_{}_{:08x}", marketplace, stem, timestamp, suffix)
}

/// Directory of transformed CSV files keyed by run id.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", run_id))
    }

    /// Write `table` as `{run_id}.csv` and return its path.
    pub fn save(&self, run_id: &str, table: &Table) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).context("Creating output directory")?;

        let final_path = self.path_for(run_id);
        if final_path.exists() {
            return Err(TransformError::Output(format!(
                "{} already exists",
                final_path.display()
            )));
        }
        let temp_path = self.dir.join(format!(".{}.csv.tmp", run_id));

        if let Err(e) = Self::write_csv(&temp_path, table) {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                debug!("Could not remove {}: {}", temp_path.display(), cleanup);
            }
            return Err(TransformError::Output(e.to_string()));
        }

        fs::rename(&temp_path, &final_path).context("Moving output into place")?;
        info!("Saved {} rows to {}", table.row_count(), final_path.display());
        Ok(final_path)
    }

    fn write_csv(path: &Path, table: &Table) -> Result<()> {
        let mut df = table.to_dataframe()?;
        let mut file = File::create(path).context("Creating output file")?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .with_quote_char(b'"')
            .finish(&mut df)
            .context("Writing output CSV")?;
        file.sync_all().context("Flushing output file")?;
        Ok(())
    }

    /// Read a previously saved run back into a table.
    pub fn load(&self, run_id: &str) -> Result<Table> {
        let reader = TableReader::new(usize::MAX, RowLimitPolicy::Reject);
        let outcome = reader
            .read_path(self.path_for(run_id))
            .map_err(TransformError::from)
            .context(format!("Loading run {}", run_id))?;
        Ok(outcome.table)
    }
}

/// One finished run, as recorded by a [`HistorySink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub run_id: String,
    pub marketplace: String,
    pub source_filename: String,
    pub output_filename: Option<String>,
    pub input_rows: usize,
    pub output_rows: usize,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Destination for run history.
///
/// The pipeline calls [`record`](Self::record) after every successful run.
/// Errors are logged by the pipeline and never fail the run.
pub trait HistorySink: Send + Sync {
    fn record(&self, record: &HistoryRecord) -> Result<()>;
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlHistorySink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file, skipping lines that do not parse.
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Reading history file"),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable history line: {}", e);
                    None
                }
            })
            .collect())
    }
}

impl HistorySink for JsonlHistorySink {
    fn record(&self, record: &HistoryRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| TransformError::Output("history lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Creating history directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Opening history file")?;
        writeln!(file, "{}", line).context("Appending history record")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn table() -> Table {
        Table::new(
            vec!["sku".into(), "title".into(), "price".into()],
            vec![
                vec!["007".into(), "Mug, blue".into(), "9.90".into()],
                vec!["008".into(), "Plate \"XL\"".into(), "12".into()],
            ],
        )
    }

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id("amazon", "uploads/My Products (v2).csv");
        assert!(id.starts_with("amazon_My_Products__v2__"));
        let parts: Vec<&str> = id.rsplitn(4, '_').collect();
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_run_id_empty_stem() {
        assert!(generate_run_id("meta", "").starts_with("meta_input_"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path().join("out"));

        let path = store.save("run_1", &table()).unwrap();
        assert_eq!(path, store.path_for("run_1"));
        assert!(path.exists());

        let loaded = store.load("run_1").unwrap();
        assert_eq!(loaded, table());

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_never_overwrites_existing_run() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path());
        store.save("run_1", &table()).unwrap();

        let error = store.save("run_1", &Table::empty(vec!["sku".into()])).unwrap_err();
        assert!(matches!(error, TransformError::Output(_)));
        assert_eq!(store.load("run_1").unwrap(), table());
    }

    #[test]
    fn test_run_ids_differ_within_one_second() {
        let first = generate_run_id("catch", "products.csv");
        let second = generate_run_id("catch", "products.csv");
        assert_ne!(first, second);
    }

    #[test]
    fn test_load_missing_run() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path());
        let error = store.load("nope").unwrap_err();
        assert!(error.is_input_error());
    }

    #[test]
    fn test_jsonl_history_appends() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlHistorySink::new(dir.path().join("logs/history.jsonl"));
        assert!(sink.read_all().unwrap().is_empty());

        let record = HistoryRecord {
            run_id: "amazon_feed_20240101_000000_abcd".into(),
            marketplace: "amazon".into(),
            source_filename: "feed.csv".into(),
            output_filename: Some("amazon_feed_20240101_000000_abcd.csv".into()),
            input_rows: 12,
            output_rows: 12,
            elapsed_ms: 3400,
            recorded_at: Utc::now(),
        };
        sink.record(&record).unwrap();
        sink.record(&HistoryRecord {
            run_id: "second".into(),
            ..record.clone()
        })
        .unwrap();

        let all = sink.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], record);
        assert_eq!(all[1].run_id, "second");
    }
}

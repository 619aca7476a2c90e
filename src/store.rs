//! External collaborator seams: the row store, the status channel, and the
//! durable result sink.
//!
//! The orchestrator only sees the three traits. The bundled filesystem
//! implementations are what the CLI runs against; the in-memory doubles are
//! used by tests and support failure injection. Status and result files are
//! written to a temp path and renamed into place, so a `completed` status is
//! never observable without its fully written result.

use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use csv::QuoteStyle;
use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{error::WriteError, record::NormalizedRecord, report::AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub status: IngestStatus,
    pub progress: u8,
    pub processed_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusInfo {
    pub fn uploading() -> Self {
        Self {
            status: IngestStatus::Uploading,
            progress: 0,
            processed_rows: 0,
            error: None,
        }
    }

    pub fn processing(progress: u8, processed_rows: u64) -> Self {
        Self {
            status: IngestStatus::Processing,
            progress,
            processed_rows,
            error: None,
        }
    }

    pub fn completed(processed_rows: u64) -> Self {
        Self {
            status: IngestStatus::Completed,
            progress: 100,
            processed_rows,
            error: None,
        }
    }

    pub fn failed(processed_rows: u64, cause: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Failed,
            progress: 0,
            processed_rows,
            error: Some(cause.into()),
        }
    }
}

/// Bulk row persistence. Implementations are expected to be duplicate
/// tolerant (the natural key is date + website + country + device + ad
/// format), because a timed-out batch is re-issued whole: delivery is
/// at-least-once, not exactly-once.
pub trait RowStore {
    fn write_batch(&mut self, records: &[NormalizedRecord]) -> Result<usize, WriteError>;
}

/// Progress/status channel. Last write wins per file identifier.
pub trait StatusSink {
    fn update(&mut self, file_id: &str, status: &StatusInfo) -> Result<(), WriteError>;
}

/// Durable analysis-result sink, keyed by file identifier.
pub trait ResultSink {
    fn persist(&mut self, file_id: &str, result: &AnalysisResult) -> Result<(), WriteError>;
}

/// Append-only CSV row store, one file per ingest session.
pub struct CsvRowStore {
    writer: csv::Writer<BufWriter<File>>,
    rows_written: u64,
}

const ROW_HEADER: [&str; 20] = [
    "date",
    "website",
    "country",
    "adFormat",
    "adUnit",
    "advertiser",
    "domain",
    "device",
    "browser",
    "requests",
    "impressions",
    "clicks",
    "ctr",
    "ecpm",
    "revenue",
    "viewableImpressions",
    "viewabilityRate",
    "measurableImpressions",
    "fillRate",
    "arpu",
];

impl CsvRowStore {
    pub fn create(path: &Path) -> Result<Self, WriteError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(path)?);
        let mut writer = csv::WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .double_quote(true)
            .from_writer(file);
        writer.write_record(ROW_HEADER)?;
        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Rows appended so far, across all batches.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl RowStore for CsvRowStore {
    fn write_batch(&mut self, records: &[NormalizedRecord]) -> Result<usize, WriteError> {
        for record in records {
            self.writer.write_record([
                record.date.format("%Y-%m-%d").to_string(),
                record.website.clone(),
                record.country.clone(),
                record.ad_format.clone(),
                record.ad_unit.clone(),
                record.advertiser.clone(),
                record.domain.clone(),
                record.device.clone(),
                record.browser.clone(),
                format_counter(record.requests),
                format_counter(record.impressions),
                format_counter(record.clicks),
                format_ratio(record.ctr),
                format_ratio(record.ecpm),
                format_ratio(record.revenue),
                format_counter(record.viewable_impressions),
                format_ratio(record.viewability_rate),
                format_counter(record.measurable_impressions),
                format_ratio(record.fill_rate),
                format_ratio(record.arpu),
            ])?;
        }
        self.writer.flush()?;
        self.rows_written += records.len() as u64;
        Ok(records.len())
    }
}

fn format_counter(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn format_ratio(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Status files under `<dir>/<id>.json`.
pub struct FsStatusSink {
    dir: PathBuf,
}

impl FsStatusSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn load(&self, file_id: &str) -> Result<Option<StatusInfo>> {
        load_json(&self.dir.join(format!("{file_id}.json")))
    }
}

impl StatusSink for FsStatusSink {
    fn update(&mut self, file_id: &str, status: &StatusInfo) -> Result<(), WriteError> {
        debug!(
            "status {} -> {:?} ({}%)",
            file_id, status.status, status.progress
        );
        write_json_atomic(&self.dir, file_id, status)
    }
}

/// Result files under `<dir>/<id>.json`.
pub struct FsResultSink {
    dir: PathBuf,
}

impl FsResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn load(&self, file_id: &str) -> Result<Option<AnalysisResult>> {
        load_json(&self.dir.join(format!("{file_id}.json")))
    }
}

impl ResultSink for FsResultSink {
    fn persist(&mut self, file_id: &str, result: &AnalysisResult) -> Result<(), WriteError> {
        write_json_atomic(&self.dir, file_id, result)
    }
}

fn write_json_atomic<T: Serialize>(dir: &Path, file_id: &str, value: &T) -> Result<(), WriteError> {
    let tmp = dir.join(format!(".{file_id}.json.tmp"));
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, dir.join(format!("{file_id}.json")))?;
    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing {path:?}"))?;
    Ok(Some(value))
}

/// In-memory row store with failure injection for orchestrator tests.
#[derive(Default)]
pub struct MemoryRowStore {
    pub rows: Vec<NormalizedRecord>,
    /// Sizes of the batches received, in order.
    pub batch_sizes: Vec<usize>,
    /// Each queued error is returned (and consumed) before any write lands.
    pub planned_errors: VecDeque<WriteError>,
}

impl MemoryRowStore {
    pub fn plan_timeout(&mut self, times: usize) {
        for _ in 0..times {
            self.planned_errors.push_back(WriteError::Timeout { records: 0 });
        }
    }

    pub fn plan_rejection(&mut self, times: usize, cause: &str) {
        for _ in 0..times {
            self.planned_errors
                .push_back(WriteError::Rejected(cause.to_string()));
        }
    }
}

impl RowStore for MemoryRowStore {
    fn write_batch(&mut self, records: &[NormalizedRecord]) -> Result<usize, WriteError> {
        if let Some(error) = self.planned_errors.pop_front() {
            let error = match error {
                WriteError::Timeout { .. } => WriteError::Timeout {
                    records: records.len(),
                },
                other => other,
            };
            return Err(error);
        }
        self.rows.extend_from_slice(records);
        self.batch_sizes.push(records.len());
        Ok(records.len())
    }
}

#[derive(Default)]
pub struct MemoryStatusSink {
    pub updates: Vec<StatusInfo>,
}

impl StatusSink for MemoryStatusSink {
    fn update(&mut self, _file_id: &str, status: &StatusInfo) -> Result<(), WriteError> {
        self.updates.push(status.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResultSink {
    pub result: Option<(String, AnalysisResult)>,
    pub reject_next: bool,
}

impl ResultSink for MemoryResultSink {
    fn persist(&mut self, file_id: &str, result: &AnalysisResult) -> Result<(), WriteError> {
        if self.reject_next {
            self.reject_next = false;
            return Err(WriteError::Rejected("result sink unavailable".to_string()));
        }
        self.result = Some((file_id.to_string(), result.clone()));
        Ok(())
    }
}

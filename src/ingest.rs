//! The ingestion orchestrator: drives one uploaded file end-to-end.
//!
//! State machine per upload: `uploading -> processing -> {completed |
//! failed}`. Each accepted record is handed to both the batch buffer and the
//! aggregation state; a full batch is flushed to the row store before any
//! progress past it is reported. The analysis result is persisted before the
//! terminal `completed` status, so a reader holding `completed` always finds
//! a result. Already-flushed batches survive a mid-stream failure: partial
//! ingestion stays visible until an operator clears it.

use std::{
    fs,
    io::BufRead,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, info, warn};

use crate::{
    aggregate::AggregationState,
    columns::ColumnMap,
    error::{ConfigError, IngestError, WriteError},
    options::IngestOptions,
    record::{NormalizedRecord, Normalizer},
    report,
    store::{ResultSink, RowStore, StatusInfo, StatusSink},
    tokenizer::Tokenizer,
};

/// Cooperative cancellation handle shared with the upload controller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub processed_rows: u64,
    pub rejected_rows: u64,
    pub batches_flushed: u64,
}

/// Pre-flight checks that reject an upload before any streaming begins.
/// Returns the file size for progress accounting.
pub fn validate_upload(path: &Path, options: &IngestOptions) -> Result<u64, ConfigError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    if !extension.eq_ignore_ascii_case("csv") && !extension.eq_ignore_ascii_case("tsv") {
        return Err(ConfigError::UnsupportedExtension {
            extension: extension.to_string(),
        });
    }
    let metadata = fs::metadata(path).map_err(|_| ConfigError::Unreadable {
        path: path.display().to_string(),
    })?;
    if metadata.len() > options.max_file_size {
        return Err(ConfigError::TooLarge {
            size: metadata.len(),
            limit: options.max_file_size,
        });
    }
    Ok(metadata.len())
}

pub struct Ingestor<'a> {
    options: &'a IngestOptions,
    store: &'a mut dyn RowStore,
    status: &'a mut dyn StatusSink,
    results: &'a mut dyn ResultSink,
    cancel: CancelFlag,
    processed: u64,
    batches_flushed: u64,
    last_progress: u8,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        options: &'a IngestOptions,
        store: &'a mut dyn RowStore,
        status: &'a mut dyn StatusSink,
        results: &'a mut dyn ResultSink,
    ) -> Self {
        Self {
            options,
            store,
            status,
            results,
            cancel: CancelFlag::default(),
            processed: 0,
            batches_flushed: 0,
            last_progress: 0,
        }
    }

    /// Handle for aborting this ingestion from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Stream one uploaded file through the pipeline. Side effects (rows,
    /// status, result) flow through the sinks; the returned outcome is a
    /// convenience summary for the caller.
    pub fn ingest<R: BufRead>(
        &mut self,
        source: R,
        file_size: u64,
        file_id: &str,
        file_name: &str,
        delimiter: u8,
    ) -> Result<IngestOutcome, IngestError> {
        self.processed = 0;
        self.batches_flushed = 0;
        self.last_progress = 0;
        match self.run_pipeline(source, file_size, file_id, file_name, delimiter) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let cause = err.to_string();
                if let Err(status_err) = self
                    .status
                    .update(file_id, &StatusInfo::failed(self.processed, &cause))
                {
                    warn!("failed to record failure status for {file_id}: {status_err}");
                }
                Err(err)
            }
        }
    }

    fn run_pipeline<R: BufRead>(
        &mut self,
        source: R,
        file_size: u64,
        file_id: &str,
        file_name: &str,
        delimiter: u8,
    ) -> Result<IngestOutcome, IngestError> {
        self.update_status(file_id, StatusInfo::processing(0, 0))?;

        let mut tokenizer = Tokenizer::new(source, delimiter);
        let header = match tokenizer.next() {
            Some(row) => row?,
            None => return Err(IngestError::EmptyInput),
        };
        let map = ColumnMap::from_headers(&header);
        let missing = map.missing_required();
        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(|field| field.name())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(IngestError::MissingColumns(names));
        }
        info!(
            "session {file_id}: mapped {} of {} header column(s)",
            map.mapped_count(),
            map.width()
        );

        let mut normalizer = Normalizer::new(map);
        let mut state = AggregationState::new(self.options.sample_size);
        let mut batch: Vec<NormalizedRecord> = Vec::with_capacity(self.options.batch_size);

        while let Some(row) = tokenizer.next() {
            if self.cancel.is_cancelled() {
                // The in-flight batch is discarded; flushed batches stay.
                return Err(IngestError::Cancelled);
            }
            let row = row?;
            match normalizer.normalize(&row) {
                Ok(record) => {
                    state.fold(&record);
                    batch.push(record);
                    self.processed += 1;
                    if batch.len() >= self.options.batch_size {
                        self.flush_batch(&mut batch)?;
                        self.report_progress(file_id, tokenizer.bytes_consumed(), file_size);
                    }
                }
                Err(reason) => {
                    debug!("session {file_id}: dropped row ({reason:?})");
                }
            }
        }
        self.flush_batch(&mut batch)?;

        let quality = normalizer.into_quality();
        let rejected = quality.rejected_rows.total();
        let result = report::build_result(file_id, file_name, &state, quality);
        self.results
            .persist(file_id, &result)
            .map_err(|source| IngestError::Write { attempts: 1, source })?;
        self.update_status(file_id, StatusInfo::completed(self.processed))?;
        info!(
            "session {file_id}: completed with {} row(s) aggregated, {} rejected, {} batch(es) flushed",
            self.processed, rejected, self.batches_flushed
        );

        Ok(IngestOutcome {
            processed_rows: self.processed,
            rejected_rows: rejected,
            batches_flushed: self.batches_flushed,
        })
    }

    /// Flush the batch buffer, re-issuing it in smaller sub-batches when the
    /// store times out. Re-issues repeat the whole batch, so duplicates are
    /// possible; the row store's idempotent insert absorbs them.
    fn flush_batch(&mut self, batch: &mut Vec<NormalizedRecord>) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut chunk = batch.len();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_chunks(batch, chunk) {
                Ok(()) => {
                    self.batches_flushed += 1;
                    batch.clear();
                    return Ok(());
                }
                Err(err) if attempt < self.options.write_retries && err.is_retryable() => {
                    chunk = (chunk / 2).max(1);
                    warn!(
                        "bulk write attempt {attempt} failed ({err}); retrying in sub-batches of {chunk}"
                    );
                }
                Err(source) => {
                    return Err(IngestError::Write {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    fn write_chunks(
        &mut self,
        records: &[NormalizedRecord],
        chunk: usize,
    ) -> Result<(), WriteError> {
        for part in records.chunks(chunk) {
            self.store.write_batch(part)?;
        }
        Ok(())
    }

    /// Throttled, monotonic progress. Only called after a batch flush, so a
    /// reported position never runs ahead of durable rows; capped at 99
    /// until the result itself is durable.
    fn report_progress(&mut self, file_id: &str, bytes_consumed: u64, file_size: u64) {
        if file_size == 0 {
            return;
        }
        // Decoded byte counts can overshoot the raw file size for non-UTF-8
        // inputs, so clamp before narrowing.
        let percent = (bytes_consumed.saturating_mul(100) / file_size).min(99) as u8;
        if percent < self.last_progress.saturating_add(self.options.progress_step) {
            return;
        }
        self.last_progress = percent;
        let status = StatusInfo::processing(percent, self.processed);
        if let Err(err) = self.status.update(file_id, &status) {
            warn!("failed to update progress for {file_id}: {err}");
        }
    }

    fn update_status(&mut self, file_id: &str, status: StatusInfo) -> Result<(), IngestError> {
        self.status
            .update(file_id, &status)
            .map_err(|source| IngestError::Write { attempts: 1, source })
    }
}

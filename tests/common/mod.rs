#![allow(dead_code)]

use std::io::Cursor;

use adx_ingest::{
    error::IngestError,
    ingest::{IngestOutcome, Ingestor},
    options::IngestOptions,
    store::{MemoryResultSink, MemoryRowStore, MemoryStatusSink},
};

pub const SESSION_ID: &str = "test-session";

/// Joins header and data rows into CSV text with a trailing newline.
pub fn csv_text(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Everything a pipeline run touched, for assertions.
pub struct PipelineRun {
    pub outcome: Result<IngestOutcome, IngestError>,
    pub store: MemoryRowStore,
    pub status: MemoryStatusSink,
    pub results: MemoryResultSink,
}

pub fn run_pipeline(input: &str, options: &IngestOptions) -> PipelineRun {
    run_pipeline_with(input, options, MemoryRowStore::default(), false, false)
}

pub fn run_pipeline_with(
    input: &str,
    options: &IngestOptions,
    mut store: MemoryRowStore,
    cancel_before_rows: bool,
    reject_result: bool,
) -> PipelineRun {
    let mut status = MemoryStatusSink::default();
    let mut results = MemoryResultSink {
        reject_next: reject_result,
        ..Default::default()
    };
    let outcome = {
        let mut ingestor = Ingestor::new(options, &mut store, &mut status, &mut results);
        if cancel_before_rows {
            ingestor.cancel_flag().cancel();
        }
        ingestor.ingest(
            Cursor::new(input.to_string()),
            input.len() as u64,
            SESSION_ID,
            "test.csv",
            b',',
        )
    };
    PipelineRun {
        outcome,
        store,
        status,
        results,
    }
}

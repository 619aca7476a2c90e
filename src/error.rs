//! Closed error kinds per pipeline boundary.
//!
//! Malformed-row conditions are recovered locally and never surface here;
//! [`ConfigError`] rejects an upload before streaming begins, [`WriteError`]
//! covers the row-store/status/result sinks, and [`IngestError`] is the
//! file-level outcome reported alongside a `failed` status.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read input file '{path}'")]
    Unreadable { path: String },
    #[error("unsupported file type '{extension}' (expected .csv or .tsv)")]
    UnsupportedExtension { extension: String },
    #[error("file is {size} bytes, exceeding the {limit}-byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("bulk write of {records} record(s) timed out")]
    Timeout { records: usize },
    #[error("sink rejected the write: {0}")]
    Rejected(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WriteError {
    /// Timeouts and transient I/O failures are worth re-issuing in smaller
    /// sub-batches; a rejection or serialization failure is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::Timeout { .. } | WriteError::Io(_))
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("input is empty")]
    EmptyInput,
    #[error("required column(s) missing from header: {0}")]
    MissingColumns(String),
    #[error("reading input failed: {0}")]
    Read(#[from] io::Error),
    #[error("bulk write failed after {attempts} attempt(s): {source}")]
    Write {
        attempts: usize,
        source: WriteError,
    },
    #[error("ingestion cancelled")]
    Cancelled,
}

//! Ingestion tuning knobs with defaults matching the production deployment;
//! a YAML file can override any subset.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SAMPLE_SIZE: usize = 20;
pub const DEFAULT_PROGRESS_STEP: u8 = 5;
pub const DEFAULT_WRITE_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Upload size ceiling in bytes; larger files are rejected before
    /// streaming begins.
    pub max_file_size: u64,
    /// Records buffered before a bulk write to the row store.
    pub batch_size: usize,
    /// Raw records retained for UI preview.
    pub sample_size: usize,
    /// Minimum progress-percent increase between status updates.
    pub progress_step: u8,
    /// Bulk-write attempts before a file is declared failed.
    pub write_retries: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            progress_step: DEFAULT_PROGRESS_STEP,
            write_retries: DEFAULT_WRITE_RETRIES,
        }
    }
}

impl IngestOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Reading options file {path:?}"))?;
        let options: IngestOptions =
            serde_yaml::from_str(&raw).with_context(|| format!("Parsing options {path:?}"))?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidOption(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.progress_step == 0 || self.progress_step > 100 {
            return Err(ConfigError::InvalidOption(
                "progress_step must be between 1 and 100".to_string(),
            ));
        }
        if self.write_retries == 0 {
            return Err(ConfigError::InvalidOption(
                "write_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

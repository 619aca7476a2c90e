use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Ingest and aggregate delimited ad-performance reports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stream a report file into the row store and build its analysis result
    Ingest(IngestArgs),
    /// Show the ingestion status of a session
    Status(StatusArgs),
    /// Print the analysis result of a completed session
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Input report file (.csv or .tsv)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Directory holding row, status, and result artifacts
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: PathBuf,
    /// Session identifier (defaults to a new UUID)
    #[arg(long)]
    pub id: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// YAML file overriding ingestion options
    #[arg(long = "options")]
    pub options: Option<PathBuf>,
    /// Records buffered per bulk write (overrides the options file)
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Session identifier returned by `ingest`
    #[arg(long)]
    pub id: String,
    /// Directory holding row, status, and result artifacts
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Session identifier returned by `ingest`
    #[arg(long)]
    pub id: String,
    /// Directory holding row, status, and result artifacts
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: PathBuf,
    /// Emit the raw JSON artifact instead of formatted tables
    #[arg(long)]
    pub json: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub mod aggregate;
pub mod cli;
pub mod columns;
pub mod error;
pub mod ingest;
pub mod io_utils;
pub mod options;
pub mod record;
pub mod report;
pub mod store;
pub mod table;
pub mod tokenizer;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};
use uuid::Uuid;

use crate::{
    cli::{Cli, Commands, IngestArgs, ReportArgs, StatusArgs},
    ingest::Ingestor,
    options::IngestOptions,
    report::{AnalysisResult, TopItem},
    store::{CsvRowStore, FsResultSink, FsStatusSink, StatusInfo, StatusSink},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("adx_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Status(args) => handle_status(&args),
        Commands::Report(args) => handle_report(&args),
    }
}

fn handle_ingest(args: &IngestArgs) -> Result<()> {
    let mut options = match &args.options {
        Some(path) => IngestOptions::load(path)?,
        None => IngestOptions::default(),
    };
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    options.validate()?;

    let file_size = ingest::validate_upload(&args.input, &options)?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let file_id = args
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let file_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(
        "Ingesting '{}' as session {} (delimiter '{}', {} bytes)",
        args.input.display(),
        file_id,
        io_utils::printable_delimiter(delimiter),
        file_size
    );

    let mut store = CsvRowStore::create(&args.data_dir.join("rows").join(format!("{file_id}.csv")))
        .context("Creating row store")?;
    let mut status = FsStatusSink::new(args.data_dir.join("status")).context("Creating status sink")?;
    let mut results =
        FsResultSink::new(args.data_dir.join("results")).context("Creating result sink")?;

    status
        .update(&file_id, &StatusInfo::uploading())
        .context("Recording upload status")?;

    let reader = io_utils::open_decoded_reader(&args.input, encoding)?;
    let mut ingestor = Ingestor::new(&options, &mut store, &mut status, &mut results);
    let outcome = ingestor.ingest(reader, file_size, &file_id, &file_name, delimiter)?;

    info!(
        "Session {} completed: {} row(s) aggregated, {} rejected, {} row(s) stored across {} batch(es)",
        file_id,
        outcome.processed_rows,
        outcome.rejected_rows,
        store.rows_written(),
        outcome.batches_flushed
    );
    println!("{file_id}");
    Ok(())
}

fn handle_status(args: &StatusArgs) -> Result<()> {
    let sink = FsStatusSink::new(args.data_dir.join("status"))?;
    let status = sink
        .load(&args.id)?
        .ok_or_else(|| anyhow!("No status recorded for session '{}'", args.id))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn handle_report(args: &ReportArgs) -> Result<()> {
    let sink = FsResultSink::new(args.data_dir.join("results"))?;
    let result = sink
        .load(&args.id)?
        .ok_or_else(|| anyhow!("No result available for session '{}'", args.id))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    print_report(&result);
    Ok(())
}

fn print_report(result: &AnalysisResult) {
    println!("Session {} ({})", result.file_id, result.file_name);
    println!();

    let summary_headers = vec![
        "rows".to_string(),
        "revenue".to_string(),
        "impressions".to_string(),
        "clicks".to_string(),
        "requests".to_string(),
        "avg_ecpm".to_string(),
        "avg_ctr".to_string(),
    ];
    let summary = &result.summary;
    let summary_row = vec![
        summary.total_rows.to_string(),
        format!("{:.2}", summary.total_revenue),
        summary.total_impressions.to_string(),
        summary.total_clicks.to_string(),
        summary.total_requests.to_string(),
        format!("{:.2}", summary.avg_ecpm),
        format!("{:.2}", summary.avg_ctr),
    ];
    table::print_table(&summary_headers, &[summary_row]);

    print_top_section("Top websites", &result.top_websites);
    print_top_section("Top countries", &result.top_countries);
    print_top_section("Devices", &result.devices);
    print_top_section("Ad formats", &result.ad_formats);

    if !result.daily_trend.is_empty() {
        println!();
        println!("Daily trend");
        let headers = vec![
            "date".to_string(),
            "revenue".to_string(),
            "impressions".to_string(),
            "avg_ecpm".to_string(),
            "ctr".to_string(),
        ];
        let rows = result
            .daily_trend
            .iter()
            .map(|point| {
                vec![
                    point.date.format("%Y-%m-%d").to_string(),
                    format!("{:.2}", point.revenue),
                    point.impressions.to_string(),
                    format!("{:.2}", point.avg_ecpm),
                    format!("{:.2}", point.ctr),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    }

    println!();
    println!("Fill-rate distribution");
    let distribution = &result.fill_rate_distribution;
    let headers = vec![
        "0-20%".to_string(),
        "20-40%".to_string(),
        "40-60%".to_string(),
        "60-80%".to_string(),
        "80-100%".to_string(),
    ];
    let row = vec![
        distribution.p0_20.to_string(),
        distribution.p20_40.to_string(),
        distribution.p40_60.to_string(),
        distribution.p60_80.to_string(),
        distribution.p80_100.to_string(),
    ];
    table::print_table(&headers, &[row]);
}

fn print_top_section(title: &str, items: &[TopItem]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("{title}");
    let headers = vec![
        "name".to_string(),
        "revenue".to_string(),
        "impressions".to_string(),
        "clicks".to_string(),
        "requests".to_string(),
        "avg_ecpm".to_string(),
        "ctr".to_string(),
    ];
    let rows = items
        .iter()
        .map(|item| {
            vec![
                item.name.clone(),
                format!("{:.2}", item.revenue),
                item.impressions.to_string(),
                item.clicks.to_string(),
                item.requests.to_string(),
                format!("{:.2}", item.avg_ecpm),
                format!("{:.2}", item.ctr),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
}

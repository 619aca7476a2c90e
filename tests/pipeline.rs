//! End-to-end orchestrator tests against the in-memory collaborator doubles:
//! the concrete scenarios from the product requirements, failure-path
//! behavior, and the completed-status/result pairing.

mod common;

use adx_ingest::{
    error::IngestError,
    options::IngestOptions,
    store::{IngestStatus, MemoryRowStore},
};
use common::{csv_text, run_pipeline, run_pipeline_with};

fn small_batches() -> IngestOptions {
    IngestOptions {
        batch_size: 2,
        progress_step: 1,
        ..IngestOptions::default()
    }
}

#[test]
fn aggregates_the_reference_scenario() {
    let input = csv_text(&[
        "Date,Website,Country,Revenue",
        "2024-01-01,a.com,US,10",
        "2024-01-01,a.com,US,20",
        "2024-01-02,b.com,CA,5",
    ]);
    let run = run_pipeline(&input, &IngestOptions::default());
    let outcome = run.outcome.expect("completed");
    assert_eq!(outcome.processed_rows, 3);
    assert_eq!(outcome.rejected_rows, 0);

    let (_, result) = run.results.result.expect("persisted result");
    assert_eq!(result.summary.total_rows, 3);
    assert_eq!(result.summary.total_revenue, 35.0);
    assert_eq!(result.top_websites[0].name, "a.com");
    assert_eq!(result.top_websites[0].revenue, 30.0);
    assert_eq!(result.top_websites[1].name, "b.com");

    assert_eq!(result.daily_trend.len(), 2);
    assert_eq!(result.daily_trend[0].date.to_string(), "2024-01-01");
    assert_eq!(result.daily_trend[0].revenue, 30.0);
    assert_eq!(result.daily_trend[1].date.to_string(), "2024-01-02");
    assert_eq!(result.daily_trend[1].revenue, 5.0);

    let last = run.status.updates.last().expect("status updates");
    assert_eq!(last.status, IngestStatus::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(last.processed_rows, 3);
}

#[test]
fn chinese_headers_produce_the_same_result_shape() {
    let english = csv_text(&[
        "Date,Website,Country,Revenue",
        "2024-01-01,a.com,US,10",
        "2024-01-02,b.com,CA,5",
    ]);
    let chinese = csv_text(&[
        "日期,网站,国家,收入",
        "2024-01-01,a.com,US,10",
        "2024-01-02,b.com,CA,5",
    ]);
    let english_run = run_pipeline(&english, &IngestOptions::default());
    let chinese_run = run_pipeline(&chinese, &IngestOptions::default());
    let (_, english_result) = english_run.results.result.expect("english result");
    let (_, chinese_result) = chinese_run.results.result.expect("chinese result");

    assert_eq!(english_result.summary, chinese_result.summary);
    assert_eq!(english_result.top_websites, chinese_result.top_websites);
    assert_eq!(english_result.top_countries, chinese_result.top_countries);
    assert_eq!(english_result.daily_trend, chinese_result.daily_trend);
}

#[test]
fn rows_missing_required_fields_touch_nothing() {
    let input = csv_text(&[
        "Date,Website,Revenue",
        "2024-01-01,a.com,10",
        ",a.com,999",
        "2024-01-02,,999",
        "2024-01-03,b.com,5",
    ]);
    let run = run_pipeline(&input, &IngestOptions::default());
    let outcome = run.outcome.expect("completed");
    assert_eq!(outcome.processed_rows, 2);
    assert_eq!(outcome.rejected_rows, 2);

    assert_eq!(run.store.rows.len(), 2);
    let (_, result) = run.results.result.expect("result");
    assert_eq!(result.summary.total_rows, 2);
    assert_eq!(result.summary.total_revenue, 15.0);
    assert_eq!(result.data_quality.rejected_rows.missing_date, 1);
    assert_eq!(result.data_quality.rejected_rows.missing_website, 1);
}

#[test]
fn mismatched_field_counts_are_dropped_silently() {
    let input = csv_text(&[
        "Date,Website,Revenue",
        "2024-01-01,a.com,10",
        "2024-01-01,a.com",
        "2024-01-01,a.com,10,extra",
        "",
    ]);
    let run = run_pipeline(&input, &IngestOptions::default());
    let outcome = run.outcome.expect("completed");
    assert_eq!(outcome.processed_rows, 1);
    assert_eq!(outcome.rejected_rows, 3);
    let (_, result) = run.results.result.expect("result");
    assert_eq!(result.data_quality.rejected_rows.field_count, 3);
}

#[test]
fn truncated_tail_still_completes() {
    // Final line is cut mid-quote with no trailing newline.
    let input = "Date,Website,Revenue\n2024-01-01,a.com,10\n2024-01-02,b.com,\"5";
    let run = run_pipeline(input, &IngestOptions::default());
    let outcome = run.outcome.expect("completed");
    assert_eq!(outcome.processed_rows, 2);
    let (_, result) = run.results.result.expect("result");
    assert_eq!(result.summary.total_revenue, 15.0);
    assert_eq!(
        run.status.updates.last().expect("status").status,
        IngestStatus::Completed
    );
}

#[test]
fn missing_required_header_fails_before_any_rows() {
    let input = csv_text(&["Country,Revenue", "US,10"]);
    let run = run_pipeline(&input, &IngestOptions::default());
    match run.outcome {
        Err(IngestError::MissingColumns(names)) => {
            assert!(names.contains("date"));
            assert!(names.contains("website"));
        }
        other => panic!("expected MissingColumns, got {other:?}"),
    }
    assert!(run.store.rows.is_empty());
    assert!(run.results.result.is_none());
    let last = run.status.updates.last().expect("status");
    assert_eq!(last.status, IngestStatus::Failed);
    assert!(last.error.as_deref().unwrap_or_default().contains("date"));
}

#[test]
fn batches_flush_at_the_configured_size() {
    let input = csv_text(&[
        "Date,Website,Revenue",
        "2024-01-01,a.com,1",
        "2024-01-01,b.com,1",
        "2024-01-01,c.com,1",
        "2024-01-01,d.com,1",
        "2024-01-01,e.com,1",
    ]);
    let run = run_pipeline(&input, &small_batches());
    let outcome = run.outcome.expect("completed");
    assert_eq!(outcome.processed_rows, 5);
    assert_eq!(outcome.batches_flushed, 3);
    assert_eq!(run.store.batch_sizes, vec![2, 2, 1]);
}

#[test]
fn write_timeout_retries_in_smaller_sub_batches() {
    let input = csv_text(&[
        "Date,Website,Revenue",
        "2024-01-01,a.com,1",
        "2024-01-01,b.com,1",
        "2024-01-01,c.com,1",
        "2024-01-01,d.com,1",
    ]);
    let mut store = MemoryRowStore::default();
    store.plan_timeout(1);
    let options = IngestOptions {
        batch_size: 4,
        ..IngestOptions::default()
    };
    let run = run_pipeline_with(&input, &options, store, false, false);
    let outcome = run.outcome.expect("completed after retry");
    assert_eq!(outcome.processed_rows, 4);
    // The timed-out batch of 4 was re-issued as two sub-batches of 2.
    assert_eq!(run.store.batch_sizes, vec![2, 2]);
    assert_eq!(run.store.rows.len(), 4);
}

#[test]
fn persistent_write_failure_fails_the_file_and_keeps_flushed_rows() {
    let input = csv_text(&[
        "Date,Website,Revenue",
        "2024-01-01,a.com,1",
        "2024-01-01,b.com,1",
        "2024-01-01,c.com,1",
        "2024-01-01,d.com,1",
    ]);
    let mut store = MemoryRowStore::default();
    store.plan_timeout(10);
    let options = IngestOptions {
        batch_size: 2,
        write_retries: 3,
        ..IngestOptions::default()
    };
    let run = run_pipeline_with(&input, &options, store, false, false);
    match run.outcome {
        Err(IngestError::Write { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected Write error, got {other:?}"),
    }
    assert!(run.results.result.is_none());
    let last = run.status.updates.last().expect("status");
    assert_eq!(last.status, IngestStatus::Failed);
    assert!(last.error.as_deref().unwrap_or_default().contains("write"));
}

#[test]
fn non_retryable_rejection_fails_without_sub_batching() {
    let input = csv_text(&["Date,Website,Revenue", "2024-01-01,a.com,1"]);
    let mut store = MemoryRowStore::default();
    store.plan_rejection(1, "constraint violation");
    let run = run_pipeline_with(&input, &IngestOptions::default(), store, false, false);
    match run.outcome {
        Err(IngestError::Write { attempts, .. }) => assert_eq!(attempts, 1),
        other => panic!("expected Write error, got {other:?}"),
    }
    assert!(run.store.rows.is_empty());
    assert_eq!(
        run.status.updates.last().expect("status").status,
        IngestStatus::Failed
    );
}

#[test]
fn cancellation_discards_in_flight_work_without_a_result() {
    let input = csv_text(&[
        "Date,Website,Revenue",
        "2024-01-01,a.com,1",
        "2024-01-01,b.com,1",
    ]);
    let run = run_pipeline_with(
        &input,
        &IngestOptions::default(),
        MemoryRowStore::default(),
        true,
        false,
    );
    assert!(matches!(run.outcome, Err(IngestError::Cancelled)));
    assert!(run.store.rows.is_empty());
    assert!(run.results.result.is_none());
    assert_eq!(
        run.status.updates.last().expect("status").status,
        IngestStatus::Failed
    );
}

#[test]
fn completed_status_is_never_written_without_a_result() {
    let input = csv_text(&["Date,Website,Revenue", "2024-01-01,a.com,1"]);
    let run = run_pipeline_with(
        &input,
        &IngestOptions::default(),
        MemoryRowStore::default(),
        false,
        true,
    );
    assert!(matches!(run.outcome, Err(IngestError::Write { .. })));
    assert!(run.results.result.is_none());
    assert!(
        run.status
            .updates
            .iter()
            .all(|status| status.status != IngestStatus::Completed)
    );
}

#[test]
fn progress_is_monotonic_and_trails_flushed_batches() {
    let mut lines = vec!["Date,Website,Revenue".to_string()];
    for i in 0..200 {
        lines.push(format!("2024-01-01,site-{i}.example.com,1"));
    }
    let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let input = csv_text(&line_refs);
    let run = run_pipeline(&input, &small_batches());
    run.outcome.expect("completed");

    let progress: Vec<u8> = run
        .status
        .updates
        .iter()
        .filter(|status| status.status == IngestStatus::Processing)
        .map(|status| status.progress)
        .collect();
    assert!(progress.len() > 2, "expected throttled updates, got {progress:?}");
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(progress.iter().all(|p| *p <= 99));
    assert_eq!(
        run.status.updates.last().expect("status").progress,
        100
    );
}

#[test]
fn empty_input_reports_failure() {
    let run = run_pipeline("", &IngestOptions::default());
    assert!(matches!(run.outcome, Err(IngestError::EmptyInput)));
    let run = run_pipeline("Date,Website\n", &IngestOptions::default());
    let outcome = run.outcome.expect("header-only input completes");
    assert_eq!(outcome.processed_rows, 0);
    let (_, result) = run.results.result.expect("result");
    assert_eq!(result.summary.total_rows, 0);
    assert!(result.top_websites.is_empty());
}

#[test]
fn sample_preview_is_bounded_and_fill_rates_distributed() {
    let mut lines = vec!["Date,Website,Requests,Impressions".to_string()];
    for i in 0..40 {
        // Fill rates sweep 0..100 in steps of 2.5 percent.
        lines.push(format!("2024-01-01,s{i}.com,1000,{}", i * 25));
    }
    let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let input = csv_text(&line_refs);
    let options = IngestOptions {
        sample_size: 10,
        ..IngestOptions::default()
    };
    let run = run_pipeline(&input, &options);
    run.outcome.expect("completed");
    let (_, result) = run.results.result.expect("result");
    assert_eq!(result.sample_preview.len(), 10);
    let distribution = &result.fill_rate_distribution;
    let total = distribution.p0_20
        + distribution.p20_40
        + distribution.p40_60
        + distribution.p60_80
        + distribution.p80_100;
    assert_eq!(total, 40);
    assert_eq!(distribution.p0_20, 8);
    assert_eq!(distribution.p80_100, 8);
}

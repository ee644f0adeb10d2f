use crate::infra::{build_engine, open_store, Coordinator, Engine};
use chrono::{Local, NaiveDate};
use checkup_engine::config::AppConfig;
use checkup_engine::error::AppError;
use checkup_engine::reference::catalog::standard_snapshot;
use checkup_engine::store::{records, reference};
use checkup_engine::workflows::demographics::{spawn_aggregator, BucketSink};
use checkup_engine::workflows::ingestion::parser::parse_upload;
use checkup_engine::workflows::ingestion::{
    BatchServiceError, ExecutionMode, ValidationReport, Validator,
};
use checkup_engine::workflows::jobs::{JobReceivers, ProcessBatchJob};
use clap::Args;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Args, Debug)]
pub(crate) struct ValidateArgs {
    /// CSV upload to check
    #[arg(long)]
    pub(crate) csv: PathBuf,
    /// Evaluation date for test-date checks (defaults to today)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct IngestArgs {
    /// CSV upload to submit
    #[arg(long)]
    pub(crate) csv: PathBuf,
    /// Recorded as the uploader of the batch
    #[arg(long)]
    pub(crate) uploaded_by: String,
    /// Approve the batch as this user right after validation
    #[arg(long)]
    pub(crate) approve: Option<String>,
}

pub(crate) fn run_validate(args: ValidateArgs) -> Result<(), AppError> {
    let ValidateArgs { csv, today } = args;
    let config = AppConfig::load()?;
    let store = open_store(&config.database)?;
    let snapshot = store.with_connection(reference::load_snapshot)?;

    let submission =
        parse_upload(File::open(&csv)?, "cli").map_err(BatchServiceError::from)?;
    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let report = Validator::new(&snapshot, today).validate(&submission);

    println!("Validation of {}", csv.display());
    render_validation(&report);
    Ok(())
}

pub(crate) async fn run_ingest(args: IngestArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let Engine {
        store,
        coordinator,
        receivers,
    } = build_engine(&config)?;
    let JobReceivers {
        batches,
        observations,
    } = receivers;

    let aggregator = spawn_aggregator(
        observations,
        store.clone() as Arc<dyn BucketSink>,
        config.aggregation,
    );
    // The coordinator moves into the blocking task; dropping it there closes
    // the observation channel so the aggregator flushes and stops.
    tokio::task::spawn_blocking(move || ingest(args, &coordinator, batches)).await??;
    aggregator.await?;

    let buckets = store.with_connection(|conn| records::count_rows(conn, "demographic_averages"))?;
    println!("Demographics: {buckets} bucket(s) on record");
    Ok(())
}

fn ingest(
    args: IngestArgs,
    coordinator: &Coordinator,
    mut batches: mpsc::Receiver<ProcessBatchJob>,
) -> Result<(), AppError> {
    let IngestArgs {
        csv,
        uploaded_by,
        approve,
    } = args;

    let accepted = match coordinator.submit_csv(File::open(&csv)?, &uploaded_by) {
        Ok(accepted) => accepted,
        Err(BatchServiceError::Validation(report)) => {
            println!("Batch rejected at validation");
            render_validation(&report);
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    let batch_id = accepted.record.id.clone();
    println!(
        "Batch {batch_id} validated: {} employee(s), {} parameter row(s), {} warning(s)",
        accepted.record.counts.total_records,
        accepted.record.counts.parameter_rows,
        accepted.warnings.len()
    );

    let Some(approver) = approve else {
        println!("Approve with POST /api/v1/batches/{batch_id}/approve or rerun with --approve");
        return Ok(());
    };

    let outcome = coordinator.approve(&batch_id, &approver)?;
    if outcome.mode == ExecutionMode::Queued {
        // No batch worker runs in the CLI; drain the queued job inline.
        while let Ok(job) = batches.try_recv() {
            coordinator.process_queued(&job)?;
        }
    }

    let batch = coordinator.get(&batch_id)?;
    println!("Batch {batch_id} is {}: {}", batch.status.label(), outcome.message);
    for report in coordinator.reports(&batch_id)? {
        println!(
            "- {} report {}: health index {} ({}), biological age {:.1} (chronological {})",
            report.employee_id,
            report.report_id,
            report.health_score,
            report.health_index_version.as_str(),
            report.biological_age,
            report.chronological_age
        );
        for flag in &report.flags.safety {
            println!("  ! {}: {}", flag.code, flag.message);
        }
        if let Some(reason) = &report.flags.bio_age_skipped {
            println!("  biological age not estimated: {reason}");
        }
    }

    Ok(())
}

pub(crate) fn run_seed() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let store = open_store(&config.database)?;
    store.seed_reference(&standard_snapshot())?;

    let parameters = store.with_connection(|conn| records::count_rows(conn, "parameters"))?;
    let companies = store.with_connection(|conn| records::count_rows(conn, "companies"))?;
    println!(
        "Reference catalog written to {}: {parameters} parameter(s), {companies} company record(s)",
        config.database.path.display()
    );
    Ok(())
}

fn render_validation(report: &ValidationReport) {
    let counts = &report.counts;
    println!(
        "- {} employee(s): {} valid, {} with errors | {} parameter row(s) | {} warning(s)",
        counts.total_records,
        counts.valid_records,
        counts.error_records,
        counts.parameter_rows,
        counts.warnings
    );

    for issue in &report.structural {
        println!("! {}", issue.summary());
    }
    for row in &report.rows {
        println!("Row {} ({}):", row.row_number, row.employee_id);
        for error in &row.errors {
            println!("  - {} = '{}': {}", error.field, error.value, error.message);
        }
    }
    for warning in &report.warnings {
        println!(
            "Warning row {} ({}): {} = '{}': {}",
            warning.row_number, warning.employee_id, warning.field, warning.value, warning.message
        );
    }

    if report.is_admissible() {
        println!("Upload is admissible.");
    } else {
        println!("Upload would be rejected ({} error(s)).", report.error_count());
    }
}

use std::io::Read;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::alerts::{BatchAlert, BatchNotifier};
use super::chunking::group_rows;
use super::domain::{
    BatchFailure, BatchId, BatchRecord, BatchRow, BatchStatus, BatchSubmission,
};
use super::parser::parse_upload;
use super::validation::{ValidationReport, ValidationWarning, Validator};
use super::writer::{ChunkedWriter, WriteError, WriteSummary};
use crate::config::IngestionConfig;
use crate::reference::{ReferenceCache, ReferenceSnapshot};
use crate::store::records::{self, ReportRecord};
use crate::store::{batches, RepositoryError, SqliteStore};
use crate::workflows::jobs::{EngineJob, JobQueue, ProcessBatchJob, QueueError};

/// Submit, approve, reject, and process batches against one store.
pub struct BatchCoordinator<Q, N> {
    store: Arc<SqliteStore>,
    reference: Arc<ReferenceCache>,
    queue: Arc<Q>,
    notifier: Arc<N>,
    settings: IngestionConfig,
    fixed_date: Option<NaiveDate>,
}

/// A batch admitted in `validated` state, plus any non-blocking warnings.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedBatch {
    pub record: BatchRecord,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Synchronous,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub batch_id: BatchId,
    pub mode: ExecutionMode,
    pub status: BatchStatus,
    pub message: String,
}

impl<Q, N> BatchCoordinator<Q, N>
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    pub fn new(
        store: Arc<SqliteStore>,
        reference: Arc<ReferenceCache>,
        queue: Arc<Q>,
        notifier: Arc<N>,
        settings: IngestionConfig,
    ) -> Self {
        Self {
            store,
            reference,
            queue,
            notifier,
            settings,
            fixed_date: None,
        }
    }

    /// Pins "today" for validation and staleness checks.
    pub fn with_fixed_date(mut self, today: NaiveDate) -> Self {
        self.fixed_date = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.fixed_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Parses a CSV upload and submits it.
    pub fn submit_csv<R: Read>(
        &self,
        reader: R,
        uploaded_by: &str,
    ) -> Result<AcceptedBatch, BatchServiceError> {
        let submission = parse_upload(reader, uploaded_by)?;
        self.submit(submission)
    }

    /// Validates and, when admissible, persists the batch as `validated`.
    /// Nothing is stored for a rejected submission.
    pub fn submit(&self, submission: BatchSubmission) -> Result<AcceptedBatch, BatchServiceError> {
        let snapshot = self.reference.snapshot()?;
        let report = Validator::new(&snapshot, self.today()).validate(&submission);
        if !report.is_admissible() {
            info!(
                uploaded_by = %submission.uploaded_by,
                errors = report.error_count(),
                "batch rejected at validation"
            );
            return Err(BatchServiceError::Validation(Box::new(report)));
        }

        let now = Utc::now();
        let record = BatchRecord {
            id: BatchId::generate(),
            status: BatchStatus::Validated,
            source: submission.source,
            uploaded_by: submission.uploaded_by.clone(),
            approved_by: None,
            rejection_reason: None,
            columns: submission.columns.clone(),
            counts: report.counts,
            error_detail: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .with_transaction(|tx| batches::insert_batch(tx, &record, &submission.rows))?;

        info!(
            batch_id = %record.id,
            records = record.counts.total_records,
            warnings = record.counts.warnings,
            "batch validated"
        );
        Ok(AcceptedBatch {
            record,
            warnings: report.warnings,
        })
    }

    /// Re-validates against current reference data, then writes the batch
    /// inline when small or hands it to the queue otherwise.
    pub fn approve(
        &self,
        batch_id: &BatchId,
        approved_by: &str,
    ) -> Result<ApprovalOutcome, BatchServiceError> {
        let record = self.get(batch_id)?;
        if record.status != BatchStatus::Validated {
            return Err(BatchServiceError::InvalidState {
                batch_id: batch_id.clone(),
                status: record.status,
            });
        }

        let snapshot = self.reference.snapshot()?;
        let rows = self.store.with_connection(|conn| batches::load_rows(conn, batch_id))?;
        self.revalidate(&snapshot, &record, &rows)?;

        let claimed = self.store.with_connection(|conn| {
            batches::claim_for_processing(conn, batch_id, approved_by, Utc::now())
        })?;
        if !claimed {
            let current = self.get(batch_id)?;
            return Err(BatchServiceError::InvalidState {
                batch_id: batch_id.clone(),
                status: current.status,
            });
        }

        let employees = group_rows(&rows).len();
        if employees < self.settings.sync_employee_threshold {
            let outcome = match self.write(&snapshot, batch_id, &rows) {
                Ok(summary) => ApprovalOutcome {
                    batch_id: batch_id.clone(),
                    mode: ExecutionMode::Synchronous,
                    status: BatchStatus::Completed,
                    message: format!(
                        "processed {} employee(s) into {} report(s)",
                        summary.employees, summary.reports
                    ),
                },
                Err(error) => ApprovalOutcome {
                    batch_id: batch_id.clone(),
                    mode: ExecutionMode::Synchronous,
                    status: BatchStatus::Failed,
                    message: error.to_string(),
                },
            };
            return Ok(outcome);
        }

        let job = EngineJob::ProcessBatch(ProcessBatchJob {
            batch_id: batch_id.clone(),
            approved_by: approved_by.to_string(),
        });
        if let Err(error) = self.queue.enqueue(job) {
            self.record_failure(batch_id, "queue_error", &error.to_string(), serde_json::Value::Null)?;
            return Err(error.into());
        }

        info!(batch_id = %batch_id, employees, "batch queued for processing");
        Ok(ApprovalOutcome {
            batch_id: batch_id.clone(),
            mode: ExecutionMode::Queued,
            status: BatchStatus::Processing,
            message: format!("{employees} employee(s) queued for background processing"),
        })
    }

    pub fn reject(&self, batch_id: &BatchId, reason: &str) -> Result<BatchRecord, BatchServiceError> {
        let rejected = self
            .store
            .with_connection(|conn| batches::reject(conn, batch_id, reason, Utc::now()))?;
        let record = self.get(batch_id)?;
        if !rejected {
            return Err(BatchServiceError::InvalidState {
                batch_id: batch_id.clone(),
                status: record.status,
            });
        }
        info!(batch_id = %batch_id, "batch rejected");
        Ok(record)
    }

    /// Worker entry point for queued batches. Re-validates before writing so
    /// reference changes since approval are honoured.
    pub fn process_queued(&self, job: &ProcessBatchJob) -> Result<WriteSummary, BatchServiceError> {
        let record = self.get(&job.batch_id)?;
        match record.status {
            BatchStatus::Processing => {}
            BatchStatus::Validated => {
                let claimed = self.store.with_connection(|conn| {
                    batches::claim_for_processing(conn, &job.batch_id, &job.approved_by, Utc::now())
                })?;
                if !claimed {
                    return Err(BatchServiceError::InvalidState {
                        batch_id: job.batch_id.clone(),
                        status: self.get(&job.batch_id)?.status,
                    });
                }
            }
            status => {
                return Err(BatchServiceError::InvalidState {
                    batch_id: job.batch_id.clone(),
                    status,
                })
            }
        }

        let snapshot = self.reference.snapshot()?;
        let rows = self
            .store
            .with_connection(|conn| batches::load_rows(conn, &job.batch_id))?;
        self.revalidate(&snapshot, &record, &rows)?;

        Ok(self.write(&snapshot, &job.batch_id, &rows)?)
    }

    pub fn get(&self, batch_id: &BatchId) -> Result<BatchRecord, BatchServiceError> {
        self.store
            .with_connection(|conn| batches::get_batch(conn, batch_id))?
            .ok_or_else(|| BatchServiceError::NotFound(batch_id.clone()))
    }

    pub fn reports(&self, batch_id: &BatchId) -> Result<Vec<ReportRecord>, BatchServiceError> {
        self.get(batch_id)?;
        Ok(self
            .store
            .with_connection(|conn| records::reports_for_batch(conn, batch_id))?)
    }

    fn revalidate(
        &self,
        snapshot: &ReferenceSnapshot,
        record: &BatchRecord,
        rows: &[BatchRow],
    ) -> Result<(), BatchServiceError> {
        let submission = BatchSubmission {
            uploaded_by: record.uploaded_by.clone(),
            source: record.source,
            columns: record.columns.clone(),
            rows: rows.to_vec(),
            empty_rows: Vec::new(),
        };
        let report = Validator::new(snapshot, self.today()).validate(&submission);
        if report.is_admissible() {
            return Ok(());
        }

        let details = serde_json::to_value(&report).map_err(RepositoryError::from)?;
        self.record_failure(
            &record.id,
            "validation_failed",
            &format!("re-validation found {} error(s)", report.error_count()),
            details,
        )?;
        Err(BatchServiceError::Validation(Box::new(report)))
    }

    fn write(
        &self,
        snapshot: &ReferenceSnapshot,
        batch_id: &BatchId,
        rows: &[BatchRow],
    ) -> Result<WriteSummary, WriteError> {
        let writer = ChunkedWriter::new(snapshot, self.settings.chunk_rows, self.today());
        match writer.write(&self.store, batch_id, rows) {
            Ok(summary) => {
                self.publish_observations(&summary);
                Ok(summary)
            }
            Err(error) => {
                self.alert(BatchAlert::failed(batch_id, error.kind(), &error.to_string()));
                Err(error)
            }
        }
    }

    fn publish_observations(&self, summary: &WriteSummary) {
        for job in &summary.observation_jobs {
            if job.records.is_empty() {
                continue;
            }
            if let Err(error) = self.queue.publish(job.clone()) {
                warn!(job_key = %job.job_key, %error, "observation job not delivered");
            }
        }
    }

    fn record_failure(
        &self,
        batch_id: &BatchId,
        kind: &str,
        message: &str,
        details: serde_json::Value,
    ) -> Result<(), BatchServiceError> {
        let failure = BatchFailure {
            kind: kind.to_string(),
            message: message.to_string(),
            failed_at: Utc::now(),
            details,
        };
        self.store
            .with_connection(|conn| batches::mark_failed(conn, batch_id, &failure))?;
        self.alert(BatchAlert::failed(batch_id, kind, message));
        Ok(())
    }

    fn alert(&self, alert: BatchAlert) {
        let batch_id = alert.batch_id.clone();
        if let Err(error) = self.notifier.notify(alert) {
            warn!(batch_id = %batch_id, %error, "batch notification failed");
        }
    }
}

/// Error raised by the batch coordinator.
#[derive(Debug, thiserror::Error)]
pub enum BatchServiceError {
    #[error("batch failed validation with {} error(s)", .0.error_count())]
    Validation(Box<ValidationReport>),
    #[error("batch {0} not found")]
    NotFound(BatchId),
    #[error("batch {batch_id} is {}, expected validated", .status.label())]
    InvalidState { batch_id: BatchId, status: BatchStatus },
    #[error("upload could not be parsed: {0}")]
    Parse(#[from] csv::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::config::IngestionConfig;
use crate::reference::catalog::standard_snapshot;
use crate::reference::{ReferenceCache, ReferenceSource};
use crate::store::{batches, records, SqliteStore};
use crate::workflows::ingestion::alerts::{AlertError, BatchAlert, BatchNotifier};
use crate::workflows::ingestion::domain::{
    BatchCounts, BatchId, BatchRecord, BatchRow, BatchSource, BatchStatus, BatchSubmission,
};
use crate::workflows::ingestion::service::BatchCoordinator;
use crate::workflows::jobs::{ChannelJobQueue, JobReceivers};

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
}

/// One parameter row for `employee_id` with stable demographics.
pub(super) fn row(employee_id: &str, row_number: u32, parameter: &str, value: &str) -> BatchRow {
    BatchRow {
        row_number,
        employee_id: employee_id.to_string(),
        name: format!("Employee {employee_id}"),
        date_of_birth: "1985-03-14".to_string(),
        gender: "Male".to_string(),
        email: format!("{}@acme.test", employee_id.to_lowercase()),
        phone: Some("+91 98450 12345".to_string()),
        test_date: "2024-05-20".to_string(),
        company_id: "ACME".to_string(),
        location: "Pune".to_string(),
        parameter_name: parameter.to_string(),
        parameter_value: value.to_string(),
    }
}

pub(super) fn employee(employee_id: &str, row_number: u32, values: &[(&str, &str)]) -> Vec<BatchRow> {
    values
        .iter()
        .map(|(parameter, value)| row(employee_id, row_number, parameter, value))
        .collect()
}

/// Eight numeric parameters, enough for a biological age estimate.
pub(super) fn full_panel(employee_id: &str, row_number: u32) -> Vec<BatchRow> {
    employee(
        employee_id,
        row_number,
        &[
            ("Fasting Glucose", "92"),
            ("HbA1c", "5.4"),
            ("Total Cholesterol", "180"),
            ("LDL", "95"),
            ("HDL", "52"),
            ("Triglycerides", "120"),
            ("Hemoglobin", "14.2"),
            ("BMI", "23.1"),
        ],
    )
}

pub(super) fn with_email(rows: Vec<BatchRow>, email: &str) -> Vec<BatchRow> {
    rows.into_iter()
        .map(|row| BatchRow {
            email: email.to_string(),
            ..row
        })
        .collect()
}

pub(super) fn submission(rows: Vec<BatchRow>) -> BatchSubmission {
    BatchSubmission {
        uploaded_by: "hr@acme.test".to_string(),
        source: BatchSource::Manual,
        columns: Vec::new(),
        rows,
        empty_rows: Vec::new(),
    }
}

pub(super) fn seeded_store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().expect("open store");
    store
        .seed_reference(&standard_snapshot())
        .expect("seed reference data");
    Arc::new(store)
}

/// Inserts a batch and claims it so the writer can run against it directly.
pub(super) fn processing_batch(store: &SqliteStore, rows: &[BatchRow]) -> BatchId {
    let now = Utc::now();
    let record = BatchRecord {
        id: BatchId::generate(),
        status: BatchStatus::Validated,
        source: BatchSource::Manual,
        uploaded_by: "hr@acme.test".to_string(),
        approved_by: None,
        rejection_reason: None,
        columns: Vec::new(),
        counts: BatchCounts::default(),
        error_detail: None,
        created_at: now,
        updated_at: now,
    };
    store
        .with_transaction(|tx| batches::insert_batch(tx, &record, rows))
        .expect("insert batch");
    let claimed = store
        .with_connection(|conn| batches::claim_for_processing(conn, &record.id, "lead@acme.test", now))
        .expect("claim batch");
    assert!(claimed);
    record.id
}

pub(super) fn count(store: &SqliteStore, table: &'static str) -> i64 {
    store
        .with_connection(|conn| records::count_rows(conn, table))
        .expect("count rows")
}

pub(super) fn settings(chunk_rows: usize, sync_employee_threshold: usize) -> IngestionConfig {
    IngestionConfig {
        chunk_rows,
        sync_employee_threshold,
        queue_capacity: 16,
    }
}

pub(super) type TestCoordinator = BatchCoordinator<ChannelJobQueue, MemoryNotifier>;

pub(super) struct Harness {
    pub(super) coordinator: Arc<TestCoordinator>,
    pub(super) store: Arc<SqliteStore>,
    pub(super) reference: Arc<ReferenceCache>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) receivers: JobReceivers,
}

pub(super) fn harness(config: IngestionConfig) -> Harness {
    let store = seeded_store();
    let reference = Arc::new(ReferenceCache::new(
        store.clone() as Arc<dyn ReferenceSource>,
        Duration::from_secs(300),
    ));
    let (queue, receivers) = ChannelJobQueue::bounded(config.queue_capacity);
    let notifier = Arc::new(MemoryNotifier::default());
    let coordinator = BatchCoordinator::new(
        store.clone(),
        reference.clone(),
        Arc::new(queue),
        notifier.clone(),
        config,
    )
    .with_fixed_date(today());

    Harness {
        coordinator: Arc::new(coordinator),
        store,
        reference,
        notifier,
        receivers,
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    alerts: Mutex<Vec<BatchAlert>>,
}

impl MemoryNotifier {
    pub(super) fn alerts(&self) -> Vec<BatchAlert> {
        self.alerts.lock().expect("notifier mutex poisoned").clone()
    }
}

impl BatchNotifier for MemoryNotifier {
    fn notify(&self, alert: BatchAlert) -> Result<(), AlertError> {
        self.alerts
            .lock()
            .expect("notifier mutex poisoned")
            .push(alert);
        Ok(())
    }
}

pub(super) struct OfflineNotifier;

impl BatchNotifier for OfflineNotifier {
    fn notify(&self, _alert: BatchAlert) -> Result<(), AlertError> {
        Err(AlertError::Transport("smtp relay offline".to_string()))
    }
}

pub(super) async fn json_body(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).expect("json body");
    (status, value)
}

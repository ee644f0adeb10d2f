use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schema::{self, BATCH_ROW_COLUMNS};
use super::{decode, RepositoryError};
use crate::workflows::ingestion::domain::{
    BatchCounts, BatchFailure, BatchId, BatchRecord, BatchRow, BatchSource, BatchStatus,
};

const BATCH_SELECT: &str = "SELECT batch_id, status, source, uploaded_by, approved_by, rejection_reason, \
     columns, parameter_rows, total_records, valid_records, error_records, warnings, \
     error_detail, created_at, updated_at FROM batches";

pub fn insert_batch(
    conn: &Connection,
    record: &BatchRecord,
    rows: &[BatchRow],
) -> Result<(), RepositoryError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO batches (batch_id, status, source, uploaded_by, approved_by, \
         rejection_reason, columns, parameter_rows, total_records, valid_records, error_records, \
         warnings, error_detail, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            record.id.as_str(),
            record.status.label(),
            record.source.label(),
            record.uploaded_by,
            record.approved_by,
            record.rejection_reason,
            serde_json::to_string(&record.columns)?,
            record.counts.parameter_rows as i64,
            record.counts.total_records as i64,
            record.counts.valid_records as i64,
            record.counts.error_records as i64,
            record.counts.warnings as i64,
            record
                .error_detail
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )?;
    if inserted == 0 {
        return Err(RepositoryError::Conflict);
    }

    let staged: Vec<Vec<Value>> = rows
        .iter()
        .enumerate()
        .map(|(seq, row)| {
            vec![
                schema::text(record.id.as_str()),
                Value::Integer(seq as i64),
                Value::Integer(i64::from(row.row_number)),
                schema::text(row.employee_id.as_str()),
                schema::text(row.name.as_str()),
                schema::text(row.date_of_birth.as_str()),
                schema::text(row.gender.as_str()),
                schema::text(row.email.as_str()),
                schema::optional_text(row.phone.as_deref()),
                schema::text(row.test_date.as_str()),
                schema::text(row.company_id.as_str()),
                schema::text(row.location.as_str()),
                schema::text(row.parameter_name.as_str()),
                schema::text(row.parameter_value.as_str()),
            ]
        })
        .collect();
    schema::bulk_insert(conn, "batch_rows", BATCH_ROW_COLUMNS, &staged)?;
    Ok(())
}

pub fn get_batch(conn: &Connection, id: &BatchId) -> Result<Option<BatchRecord>, RepositoryError> {
    let raw = conn
        .query_row(
            &format!("{BATCH_SELECT} WHERE batch_id = ?1"),
            [id.as_str()],
            StoredBatch::from_row,
        )
        .optional()?;
    raw.map(StoredBatch::into_record).transpose()
}

/// Original rows in submission order.
pub fn load_rows(conn: &Connection, id: &BatchId) -> Result<Vec<BatchRow>, RepositoryError> {
    let mut statement = conn.prepare_cached(
        "SELECT row_number, employee_id, name, date_of_birth, gender, email, phone, test_date, \
         company_id, location, parameter_name, parameter_value \
         FROM batch_rows WHERE batch_id = ?1 ORDER BY seq",
    )?;
    let rows = statement
        .query_map([id.as_str()], |row| {
            Ok(BatchRow {
                row_number: row.get(0)?,
                employee_id: row.get(1)?,
                name: row.get(2)?,
                date_of_birth: row.get(3)?,
                gender: row.get(4)?,
                email: row.get(5)?,
                phone: row.get(6)?,
                test_date: row.get(7)?,
                company_id: row.get(8)?,
                location: row.get(9)?,
                parameter_name: row.get(10)?,
                parameter_value: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves a validated batch to processing and records the approver.
pub fn claim_for_processing(
    conn: &Connection,
    id: &BatchId,
    approved_by: &str,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let changed = conn.execute(
        "UPDATE batches SET status = 'processing', approved_by = ?2, updated_at = ?3 \
         WHERE batch_id = ?1 AND status = 'validated'",
        params![id.as_str(), approved_by, now.to_rfc3339()],
    )?;
    Ok(changed > 0)
}

pub fn reject(
    conn: &Connection,
    id: &BatchId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let changed = conn.execute(
        "UPDATE batches SET status = 'rejected', rejection_reason = ?2, updated_at = ?3 \
         WHERE batch_id = ?1 AND status = 'validated'",
        params![id.as_str(), reason, now.to_rfc3339()],
    )?;
    Ok(changed > 0)
}

pub fn mark_completed(
    conn: &Connection,
    id: &BatchId,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let changed = conn.execute(
        "UPDATE batches SET status = 'completed', error_detail = NULL, updated_at = ?2 \
         WHERE batch_id = ?1 AND status = 'processing'",
        params![id.as_str(), now.to_rfc3339()],
    )?;
    Ok(changed > 0)
}

/// Records a failure on a batch that has not reached a terminal state.
pub fn mark_failed(
    conn: &Connection,
    id: &BatchId,
    failure: &BatchFailure,
) -> Result<bool, RepositoryError> {
    let changed = conn.execute(
        "UPDATE batches SET status = 'failed', error_detail = ?2, updated_at = ?3 \
         WHERE batch_id = ?1 AND status IN ('validated', 'processing')",
        params![
            id.as_str(),
            serde_json::to_string(failure)?,
            failure.failed_at.to_rfc3339()
        ],
    )?;
    Ok(changed > 0)
}

struct StoredBatch {
    id: String,
    status: String,
    source: String,
    uploaded_by: String,
    approved_by: Option<String>,
    rejection_reason: Option<String>,
    columns: String,
    counts: [i64; 5],
    error_detail: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StoredBatch {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            source: row.get(2)?,
            uploaded_by: row.get(3)?,
            approved_by: row.get(4)?,
            rejection_reason: row.get(5)?,
            columns: row.get(6)?,
            counts: [row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?],
            error_detail: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<BatchRecord, RepositoryError> {
        let [parameter_rows, total_records, valid_records, error_records, warnings] =
            self.counts.map(|count| usize::try_from(count).unwrap_or(0));
        Ok(BatchRecord {
            id: BatchId(self.id),
            status: decode("batch status", self.status, BatchStatus::parse)?,
            source: decode("batch source", self.source, BatchSource::parse)?,
            uploaded_by: self.uploaded_by,
            approved_by: self.approved_by,
            rejection_reason: self.rejection_reason,
            columns: serde_json::from_str(&self.columns)?,
            counts: BatchCounts {
                parameter_rows,
                total_records,
                valid_records,
                error_records,
                warnings,
            },
            error_detail: self
                .error_detail
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: timestamp("batch created_at", self.created_at)?,
            updated_at: timestamp("batch updated_at", self.updated_at)?,
        })
    }
}

pub(crate) fn timestamp(field: &'static str, raw: String) -> Result<DateTime<Utc>, RepositoryError> {
    decode(field, raw, |value| {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc))
    })
}

//! All-or-nothing materialisation of a validated batch.
//!
//! Rows are grouped into employee occurrences, packed into chunks that never
//! split an employee, and written chunk by chunk inside a single transaction.
//! Any failure rolls the whole batch back and leaves it `failed` with a typed
//! payload; observation jobs are only handed out once the commit succeeded.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{ffi, Connection, ErrorCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::chunking::{group_rows, partition, EmployeeRows};
use super::domain::{BatchFailure, BatchId, BatchRow};
use super::values::{age_in_years, parse_blood_pressure, parse_date, parse_numeric};
use crate::reference::{
    Gender, ParameterDefinition, ParameterKind, ReferenceSnapshot, DIASTOLIC_KEY, SYSTOLIC_KEY,
};
use crate::store::records::{
    self, LabParameterRecord, PersonRecord, ReportFlags, ReportRecord,
};
use crate::store::{batches, RepositoryError, SqliteStore};
use crate::workflows::demographics::{AgeBracket, ObservationJob, ObservationRecord};
use crate::workflows::scoring::bio_age::BioAgeSkip;
use crate::workflows::scoring::deviation::classify;
use crate::workflows::scoring::{
    BioAgeEstimator, BioAgeInput, HealthIndexEngine, ParameterValues,
};

const REPORT_ID_LENGTH: usize = 8;
const REPORT_ID_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteSummary {
    pub chunks: usize,
    pub employees: usize,
    pub reports: usize,
    pub lab_parameters: usize,
    /// One per chunk, ready for the aggregator once the batch is committed.
    #[serde(skip)]
    pub observation_jobs: Vec<ObservationJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityKind {
    ForeignKey,
    Unique,
    NotNull,
    Check,
    Other,
}

impl IntegrityKind {
    fn from_extended_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Self::ForeignKey,
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Self::Unique,
            ffi::SQLITE_CONSTRAINT_NOTNULL => Self::NotNull,
            ffi::SQLITE_CONSTRAINT_CHECK => Self::Check,
            _ => Self::Other,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::ForeignKey => "a referenced company or record does not exist",
            Self::Unique => "a record with the same identity already exists",
            Self::NotNull => "a required value was missing",
            Self::Check => "a value was outside the allowed range",
            Self::Other => "a storage constraint was violated",
        }
    }
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(
        "duplicate email {email}: employee {employee_id} conflicts with existing employee {existing_employee_id}"
    )]
    IdentityConflict {
        employee_id: String,
        email: String,
        existing_employee_id: String,
    },
    #[error("integrity violation: {kind}")]
    Integrity { kind: IntegrityKind, detail: String },
    #[error("processing failed: {0}")]
    Processing(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for WriteError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(rusqlite::Error::SqliteFailure(failure, message))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                WriteError::Integrity {
                    kind: IntegrityKind::from_extended_code(failure.extended_code),
                    detail: message.unwrap_or_else(|| failure.to_string()),
                }
            }
            other => WriteError::Repository(other),
        }
    }
}

impl WriteError {
    pub const fn kind(&self) -> &'static str {
        match self {
            WriteError::IdentityConflict { .. } => "identity_conflict",
            WriteError::Integrity { .. } => "integrity_error",
            WriteError::Processing(_) | WriteError::Repository(_) => "processing_error",
        }
    }

    /// Payload persisted on the failed batch.
    pub fn to_failure(&self, failed_at: DateTime<Utc>) -> BatchFailure {
        let details = match self {
            WriteError::IdentityConflict {
                employee_id,
                email,
                existing_employee_id,
            } => json!({
                "employee_id": employee_id,
                "email": email,
                "existing_employee_id": existing_employee_id,
            }),
            WriteError::Integrity { kind, detail } => json!({
                "constraint": kind,
                "detail": detail,
            }),
            WriteError::Processing(_) | WriteError::Repository(_) => json!({}),
        };
        BatchFailure {
            kind: self.kind().to_string(),
            message: self.to_string(),
            failed_at,
            details,
        }
    }
}

/// Turns validated rows into persons, reports, and lab parameters.
pub struct ChunkedWriter<'a> {
    snapshot: &'a ReferenceSnapshot,
    chunk_rows: usize,
    evaluated_on: NaiveDate,
}

impl<'a> ChunkedWriter<'a> {
    pub fn new(snapshot: &'a ReferenceSnapshot, chunk_rows: usize, evaluated_on: NaiveDate) -> Self {
        Self {
            snapshot,
            chunk_rows,
            evaluated_on,
        }
    }

    /// Writes a batch already claimed as `processing`. On failure the
    /// transaction is rolled back and the batch is marked `failed`.
    pub fn write(
        &self,
        store: &SqliteStore,
        batch_id: &BatchId,
        rows: &[BatchRow],
    ) -> Result<WriteSummary, WriteError> {
        let chunks = partition(group_rows(rows), self.chunk_rows);
        debug!(batch_id = %batch_id, chunks = chunks.len(), rows = rows.len(), "writing batch");

        let outcome = store.with_transaction(|tx| self.write_chunks(tx, batch_id, &chunks));

        match outcome {
            Ok(summary) => {
                info!(
                    batch_id = %batch_id,
                    chunks = summary.chunks,
                    reports = summary.reports,
                    lab_parameters = summary.lab_parameters,
                    "batch committed"
                );
                Ok(summary)
            }
            Err(error) => {
                let failure = error.to_failure(Utc::now());
                warn!(batch_id = %batch_id, kind = %failure.kind, %error, "batch rolled back");
                if let Err(mark_error) =
                    store.with_connection(|conn| batches::mark_failed(conn, batch_id, &failure))
                {
                    warn!(batch_id = %batch_id, error = %mark_error, "could not record batch failure");
                }
                Err(error)
            }
        }
    }

    fn write_chunks(
        &self,
        conn: &Connection,
        batch_id: &BatchId,
        chunks: &[Vec<EmployeeRows>],
    ) -> Result<WriteSummary, WriteError> {
        let now = Utc::now();
        let mut issued_ids = HashSet::new();
        let mut summary = WriteSummary {
            chunks: chunks.len(),
            ..WriteSummary::default()
        };

        for (index, chunk) in chunks.iter().enumerate() {
            let mut reports = Vec::with_capacity(chunk.len());
            let mut lab_parameters = Vec::new();
            let mut observations = Vec::with_capacity(chunk.len());

            for employee in chunk {
                let staged = self.stage_employee(conn, batch_id, employee, &mut issued_ids, now)?;
                reports.push(staged.report);
                lab_parameters.extend(staged.lab_parameters);
                observations.extend(staged.observation);
            }

            records::insert_reports(conn, &reports)?;
            records::insert_lab_parameters(conn, &lab_parameters)?;
            debug!(
                batch_id = %batch_id,
                chunk = index,
                employees = chunk.len(),
                lab_parameters = lab_parameters.len(),
                "chunk staged"
            );

            summary.employees += chunk.len();
            summary.reports += reports.len();
            summary.lab_parameters += lab_parameters.len();
            summary.observation_jobs.push(ObservationJob {
                job_key: ObservationJob::key_for(batch_id, index),
                batch_id: batch_id.clone(),
                records: observations,
            });
        }

        if !batches::mark_completed(conn, batch_id, now)? {
            return Err(WriteError::Processing(format!(
                "batch {batch_id} was not in processing state at commit"
            )));
        }
        Ok(summary)
    }

    fn stage_employee(
        &self,
        conn: &Connection,
        batch_id: &BatchId,
        employee: &EmployeeRows,
        issued_ids: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<StagedEmployee, WriteError> {
        let first = employee.first().ok_or_else(|| {
            WriteError::Processing(format!("employee {} has no rows", employee.employee_id))
        })?;
        let person = person_from_row(first)?;
        resolve_identity(conn, &person, now)?;

        let test_date = parse_date(&first.test_date).ok_or_else(|| {
            WriteError::Processing(format!("unreadable test date for {}", person.employee_id))
        })?;
        let chronological_age = age_in_years(person.date_of_birth, test_date).ok_or_else(|| {
            WriteError::Processing(format!(
                "test date precedes date of birth for {}",
                person.employee_id
            ))
        })?;

        let report_id = next_report_id(conn, issued_ids)?;
        let facts = self.collect_facts(&report_id, person.gender, &employee.rows);

        let health = HealthIndexEngine::new(self.snapshot).evaluate(&facts.values, person.gender);
        let bio_age = BioAgeEstimator::new(self.snapshot, self.evaluated_on).estimate(&BioAgeInput {
            chronological_age: f64::from(chronological_age),
            gender: person.gender,
            test_date,
            values: &facts.values,
        });

        let report = ReportRecord {
            report_id,
            employee_id: person.employee_id.clone(),
            batch_id: batch_id.clone(),
            row_number: employee.row_number,
            test_date,
            chronological_age,
            health_score: health.score,
            health_index_version: health.version,
            biological_age: bio_age.biological_age,
            flags: ReportFlags {
                safety: health.flags,
                review: bio_age.review_flags,
                low_confidence: health.low_confidence,
                completeness: health.completeness,
                bio_age_skipped: bio_age.skipped.as_ref().map(skip_reason),
            },
            created_at: now,
        };

        let observation = person.company_id.clone().map(|company_id| ObservationRecord {
            company_id,
            location: person.location.clone().unwrap_or_default(),
            age_bracket: AgeBracket::for_age(chronological_age),
            gender: person.gender,
            values: facts.observed,
        });

        Ok(StagedEmployee {
            report,
            lab_parameters: facts.lab_parameters,
            observation,
        })
    }

    /// Expands an employee's rows into scoring values, lab rows, and raw observations.
    fn collect_facts(&self, report_id: &str, gender: Gender, rows: &[BatchRow]) -> EmployeeFacts {
        let mut facts = EmployeeFacts::default();

        for row in rows {
            let Some(definition) = self.snapshot.resolve_parameter(&row.parameter_name) else {
                warn!(parameter = %row.parameter_name, "parameter vanished from reference data; skipped");
                continue;
            };

            match definition.kind {
                ParameterKind::Numeric => {
                    if let Some(value) = parse_numeric(&row.parameter_value) {
                        facts.numeric(report_id, definition, gender, value);
                    }
                }
                ParameterKind::CombinedBloodPressure => {
                    let Some((systolic, diastolic)) = parse_blood_pressure(&row.parameter_value) else {
                        continue;
                    };
                    for (key, value) in [(SYSTOLIC_KEY, systolic), (DIASTOLIC_KEY, diastolic)] {
                        match self.snapshot.parameter(key) {
                            Some(component) => facts.numeric(report_id, component, gender, value),
                            None => warn!(parameter = key, "blood pressure component not configured"),
                        }
                    }
                }
                ParameterKind::Text => {
                    let text = row.parameter_value.trim();
                    if text.is_empty() {
                        continue;
                    }
                    facts.lab_parameters.push(LabParameterRecord {
                        report_id: report_id.to_string(),
                        parameter_key: definition.key.clone(),
                        value_numeric: None,
                        value_text: Some(text.to_string()),
                        unit: definition.unit.clone(),
                        reference_min: None,
                        reference_max: None,
                        status: None,
                        category: definition.category.clone(),
                    });
                }
            }
        }

        facts
    }
}

struct StagedEmployee {
    report: ReportRecord,
    lab_parameters: Vec<LabParameterRecord>,
    observation: Option<ObservationRecord>,
}

#[derive(Default)]
struct EmployeeFacts {
    values: ParameterValues,
    lab_parameters: Vec<LabParameterRecord>,
    observed: BTreeMap<String, String>,
}

impl EmployeeFacts {
    fn numeric(&mut self, report_id: &str, definition: &ParameterDefinition, gender: Gender, value: f64) {
        let range = definition.range_for(gender);
        self.values.insert(definition.key.clone(), value);
        self.observed.insert(definition.key.clone(), value.to_string());
        self.lab_parameters.push(LabParameterRecord {
            report_id: report_id.to_string(),
            parameter_key: definition.key.clone(),
            value_numeric: Some(value),
            value_text: None,
            unit: definition.unit.clone(),
            reference_min: range.map(|range| range.min),
            reference_max: range.map(|range| range.max),
            status: range.map(|range| classify(value, &range)),
            category: definition.category.clone(),
        });
    }
}

fn person_from_row(row: &BatchRow) -> Result<PersonRecord, WriteError> {
    let date_of_birth = parse_date(&row.date_of_birth).ok_or_else(|| {
        WriteError::Processing(format!("unreadable date of birth for {}", row.employee_id))
    })?;
    let gender = Gender::parse(row.gender.trim()).ok_or_else(|| {
        WriteError::Processing(format!("unknown gender for {}", row.employee_id))
    })?;

    Ok(PersonRecord {
        employee_id: row.employee_id.trim().to_string(),
        email: row.email.trim().to_string(),
        name: row.name.trim().to_string(),
        date_of_birth,
        gender,
        phone: row
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .map(str::to_string),
        company_id: non_empty(&row.company_id),
        location: non_empty(&row.location),
    })
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Existing ids are updated in place; an email owned by another id aborts the batch.
fn resolve_identity(
    conn: &Connection,
    person: &PersonRecord,
    now: DateTime<Utc>,
) -> Result<(), WriteError> {
    if records::find_person(conn, &person.employee_id)?.is_none() {
        if let Some(owner) = records::email_owner(conn, &person.email)? {
            return Err(WriteError::IdentityConflict {
                employee_id: person.employee_id.clone(),
                email: person.email.clone(),
                existing_employee_id: owner,
            });
        }
    }
    // An existing id adopting another person's email trips the UNIQUE index.
    records::upsert_person(conn, person, now)?;
    Ok(())
}

fn next_report_id(conn: &Connection, issued: &mut HashSet<String>) -> Result<String, WriteError> {
    let mut rng = rand::thread_rng();
    for _ in 0..REPORT_ID_ATTEMPTS {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(REPORT_ID_LENGTH)
            .map(|byte| char::from(byte).to_ascii_uppercase())
            .collect();
        if issued.contains(&candidate) || records::report_id_exists(conn, &candidate)? {
            continue;
        }
        issued.insert(candidate.clone());
        return Ok(candidate);
    }
    Err(WriteError::Processing(
        "could not allocate a unique report id".to_string(),
    ))
}

fn skip_reason(skip: &BioAgeSkip) -> String {
    match skip {
        BioAgeSkip::InsufficientParameters { present, required } => {
            format!("insufficient_parameters ({present} of {required})")
        }
        BioAgeSkip::StaleTest { age_days } => format!("stale_test ({age_days} days)"),
        BioAgeSkip::NonFinite => "non_finite".to_string(),
    }
}

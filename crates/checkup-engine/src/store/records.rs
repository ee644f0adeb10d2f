//! Persons, reports, and lab parameter rows derived from processed batches.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::batches::timestamp;
use super::schema::{self, LAB_PARAMETER_COLUMNS, REPORT_COLUMNS};
use super::{decode, RepositoryError};
use crate::reference::Gender;
use crate::workflows::ingestion::domain::BatchId;
use crate::workflows::scoring::health_index::{HealthIndexVersion, SafetyFlag};
use crate::workflows::scoring::LabStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub employee_id: String,
    pub email: String,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub company_id: Option<String>,
    pub location: Option<String>,
}

/// Everything a report raises for review, stored as one JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFlags {
    #[serde(default)]
    pub safety: Vec<SafetyFlag>,
    /// Parameters whose deviation reached the extreme bio-age threshold.
    #[serde(default)]
    pub review: Vec<String>,
    #[serde(default)]
    pub low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio_age_skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub report_id: String,
    pub employee_id: String,
    pub batch_id: BatchId,
    pub row_number: u32,
    pub test_date: NaiveDate,
    pub chronological_age: u32,
    pub health_score: u16,
    pub health_index_version: HealthIndexVersion,
    pub biological_age: f64,
    pub flags: ReportFlags,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabParameterRecord {
    pub report_id: String,
    pub parameter_key: String,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub unit: Option<String>,
    pub reference_min: Option<f64>,
    pub reference_max: Option<f64>,
    pub status: Option<LabStatus>,
    pub category: Option<String>,
}

pub fn find_person(conn: &Connection, employee_id: &str) -> Result<Option<PersonRecord>, RepositoryError> {
    let raw = conn
        .query_row(
            "SELECT employee_id, email, name, date_of_birth, gender, phone, company_id, location \
             FROM persons WHERE employee_id = ?1",
            [employee_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;

    raw.map(
        |(employee_id, email, name, date_of_birth, gender, phone, company_id, location)| {
            Ok(PersonRecord {
                employee_id,
                email,
                name,
                date_of_birth: date("person date_of_birth", date_of_birth)?,
                gender: decode("person gender", gender, Gender::parse)?,
                phone,
                company_id,
                location,
            })
        },
    )
    .transpose()
}

/// Employee id currently owning `email`, if any.
pub fn email_owner(conn: &Connection, email: &str) -> Result<Option<String>, RepositoryError> {
    Ok(conn
        .query_row(
            "SELECT employee_id FROM persons WHERE email = ?1",
            [email],
            |row| row.get(0),
        )
        .optional()?)
}

/// Inserts a new person or updates every demographic field of an existing one.
pub fn upsert_person(
    conn: &Connection,
    person: &PersonRecord,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO persons (employee_id, email, name, date_of_birth, gender, phone, company_id, \
         location, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
         ON CONFLICT(employee_id) DO UPDATE SET email = excluded.email, name = excluded.name, \
         date_of_birth = excluded.date_of_birth, gender = excluded.gender, phone = excluded.phone, \
         company_id = excluded.company_id, location = excluded.location, \
         updated_at = excluded.updated_at",
        params![
            person.employee_id,
            person.email,
            person.name,
            person.date_of_birth.to_string(),
            person.gender.label(),
            person.phone,
            person.company_id,
            person.location,
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn report_id_exists(conn: &Connection, report_id: &str) -> Result<bool, RepositoryError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM reports WHERE report_id = ?1",
            [report_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn insert_reports(conn: &Connection, reports: &[ReportRecord]) -> Result<usize, RepositoryError> {
    let rows = reports
        .iter()
        .map(|report| {
            Ok(vec![
                schema::text(report.report_id.as_str()),
                schema::text(report.employee_id.as_str()),
                schema::text(report.batch_id.as_str()),
                Value::Integer(i64::from(report.row_number)),
                schema::text(report.test_date.to_string()),
                Value::Integer(i64::from(report.chronological_age)),
                Value::Integer(i64::from(report.health_score)),
                schema::text(report.health_index_version.as_str()),
                Value::Real(report.biological_age),
                schema::text(serde_json::to_string(&report.flags)?),
                schema::text(report.created_at.to_rfc3339()),
            ])
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;
    Ok(schema::bulk_insert(conn, "reports", REPORT_COLUMNS, &rows)?)
}

pub fn insert_lab_parameters(
    conn: &Connection,
    parameters: &[LabParameterRecord],
) -> Result<usize, RepositoryError> {
    let rows: Vec<Vec<Value>> = parameters
        .iter()
        .map(|parameter| {
            vec![
                schema::text(parameter.report_id.as_str()),
                schema::text(parameter.parameter_key.as_str()),
                schema::real(parameter.value_numeric),
                schema::optional_text(parameter.value_text.as_deref()),
                schema::optional_text(parameter.unit.as_deref()),
                schema::real(parameter.reference_min),
                schema::real(parameter.reference_max),
                schema::optional_text(parameter.status.map(LabStatus::as_str)),
                schema::optional_text(parameter.category.as_deref()),
            ]
        })
        .collect();
    Ok(schema::bulk_insert(conn, "lab_parameters", LAB_PARAMETER_COLUMNS, &rows)?)
}

/// Reports written by `batch_id`, in row order.
pub fn reports_for_batch(conn: &Connection, batch_id: &BatchId) -> Result<Vec<ReportRecord>, RepositoryError> {
    let mut statement = conn.prepare_cached(
        "SELECT report_id, employee_id, batch_id, row_number, test_date, chronological_age, \
         health_score, health_index_version, biological_age, flags, created_at \
         FROM reports WHERE batch_id = ?1 ORDER BY row_number, employee_id",
    )?;
    let raw = statement
        .query_map([batch_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, u16>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, f64>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(
                report_id,
                employee_id,
                batch_id,
                row_number,
                test_date,
                chronological_age,
                health_score,
                version,
                biological_age,
                flags,
                created_at,
            )| {
                Ok(ReportRecord {
                    report_id,
                    employee_id,
                    batch_id: BatchId(batch_id),
                    row_number,
                    test_date: date("report test_date", test_date)?,
                    chronological_age,
                    health_score,
                    health_index_version: decode(
                        "health index version",
                        version,
                        HealthIndexVersion::parse,
                    )?,
                    biological_age,
                    flags: serde_json::from_str(&flags)?,
                    created_at: timestamp("report created_at", created_at)?,
                })
            },
        )
        .collect()
}

pub fn lab_parameters_for_report(
    conn: &Connection,
    report_id: &str,
) -> Result<Vec<LabParameterRecord>, RepositoryError> {
    let mut statement = conn.prepare_cached(
        "SELECT report_id, parameter_key, value_numeric, value_text, unit, reference_min, \
         reference_max, status, category FROM lab_parameters WHERE report_id = ?1 \
         ORDER BY parameter_key",
    )?;
    let raw = statement
        .query_map([report_id], |row| {
            Ok((
                LabParameterRecord {
                    report_id: row.get(0)?,
                    parameter_key: row.get(1)?,
                    value_numeric: row.get(2)?,
                    value_text: row.get(3)?,
                    unit: row.get(4)?,
                    reference_min: row.get(5)?,
                    reference_max: row.get(6)?,
                    status: None,
                    category: row.get(8)?,
                },
                row.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(mut record, status)| {
            record.status = status
                .map(|status| decode("lab status", status, LabStatus::parse))
                .transpose()?;
            Ok(record)
        })
        .collect()
}

pub fn count_rows(conn: &Connection, table: &'static str) -> Result<i64, RepositoryError> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

fn date(field: &'static str, raw: String) -> Result<NaiveDate, RepositoryError> {
    decode(field, raw, |value| value.parse::<NaiveDate>().ok())
}

//! Column lists for bulk inserts and the multi-row statement builder.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` since 3.32.
pub(crate) const MAX_VARIABLES: usize = 32_766;

pub(crate) const BATCH_ROW_COLUMNS: &[&str] = &[
    "batch_id",
    "seq",
    "row_number",
    "employee_id",
    "name",
    "date_of_birth",
    "gender",
    "email",
    "phone",
    "test_date",
    "company_id",
    "location",
    "parameter_name",
    "parameter_value",
];

pub(crate) const REPORT_COLUMNS: &[&str] = &[
    "report_id",
    "employee_id",
    "batch_id",
    "row_number",
    "test_date",
    "chronological_age",
    "health_score",
    "health_index_version",
    "biological_age",
    "flags",
    "created_at",
];

pub(crate) const LAB_PARAMETER_COLUMNS: &[&str] = &[
    "report_id",
    "parameter_key",
    "value_numeric",
    "value_text",
    "unit",
    "reference_min",
    "reference_max",
    "status",
    "category",
];

pub(crate) fn rows_per_statement(columns: usize) -> usize {
    (MAX_VARIABLES / columns.max(1)).max(1)
}

pub(crate) fn insert_statement(table: &str, columns: &[&str], rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders.as_str(); rows].join(", ");
    format!("INSERT INTO {table} ({}) VALUES {values}", columns.join(", "))
}

/// Inserts `rows` with as few statements as the variable limit allows.
/// Returns the number of statements executed.
pub(crate) fn bulk_insert(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<Value>],
) -> Result<usize, rusqlite::Error> {
    let mut statements = 0;
    for group in rows.chunks(rows_per_statement(columns.len())) {
        let sql = insert_statement(table, columns, group.len());
        let mut statement = conn.prepare_cached(&sql)?;
        statement.execute(params_from_iter(group.iter().flatten()))?;
        statements += 1;
    }
    Ok(statements)
}

pub(crate) fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub(crate) fn optional_text(value: Option<impl Into<String>>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.into()))
}

pub(crate) fn real(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

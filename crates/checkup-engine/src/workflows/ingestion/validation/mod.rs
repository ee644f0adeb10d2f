//! Two-phase admission gate for uploaded batches.
//!
//! Phase A looks at the batch as a whole (companies, columns, duplicate
//! parameters). Phase B checks every row's fields and parameter values and only
//! runs when Phase A found nothing. Any finding in either phase rejects the
//! whole batch; warnings never do.

mod fields;
mod structural;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{BatchCounts, BatchSubmission};
use crate::reference::ReferenceSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub row_number: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateParameter {
    pub employee_id: String,
    pub parameter: String,
    pub occurrences: Vec<Occurrence>,
}

/// Batch-level rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuralIssue {
    UnknownCompany { company_ids: Vec<String> },
    UnknownColumn { columns: Vec<String> },
    DuplicateParameter { duplicates: Vec<DuplicateParameter> },
}

impl StructuralIssue {
    pub fn summary(&self) -> String {
        match self {
            StructuralIssue::UnknownCompany { company_ids } => {
                format!("unknown company id(s): {}", company_ids.join(", "))
            }
            StructuralIssue::UnknownColumn { columns } => {
                format!("unknown column(s): {}", columns.join(", "))
            }
            StructuralIssue::DuplicateParameter { duplicates } => {
                format!("{} duplicate employee/parameter pair(s)", duplicates.len())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub value: String,
    pub message: String,
}

/// All field errors found on one employee occurrence (one spreadsheet line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowErrors {
    pub row_number: u32,
    pub employee_id: String,
    pub employee_name: String,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub row_number: u32,
    pub employee_id: String,
    pub field: String,
    pub value: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub structural: Vec<StructuralIssue>,
    pub rows: Vec<RowErrors>,
    pub warnings: Vec<ValidationWarning>,
    pub counts: BatchCounts,
}

impl ValidationReport {
    pub fn is_admissible(&self) -> bool {
        self.structural.is_empty() && self.rows.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.structural.len() + self.rows.iter().map(|row| row.errors.len()).sum::<usize>()
    }
}

/// Validates submissions against one reference snapshot as of `today`.
pub struct Validator<'a> {
    snapshot: &'a ReferenceSnapshot,
    today: NaiveDate,
}

impl<'a> Validator<'a> {
    pub fn new(snapshot: &'a ReferenceSnapshot, today: NaiveDate) -> Self {
        Self { snapshot, today }
    }

    pub fn validate(&self, submission: &BatchSubmission) -> ValidationReport {
        let total_records = submission
            .rows
            .iter()
            .map(|row| row.occurrence_key())
            .collect::<BTreeSet<_>>()
            .len()
            + submission.empty_rows.len();

        let structural = structural::check(self.snapshot, submission);

        let (rows, mut warnings) = if structural.is_empty() {
            fields::check(self.snapshot, self.today, &submission.rows)
        } else {
            (Vec::new(), Vec::new())
        };

        for row_number in &submission.empty_rows {
            warnings.push(ValidationWarning {
                row_number: *row_number,
                employee_id: String::new(),
                field: "parameters".to_string(),
                value: String::new(),
                message: "row has no parameter values and will be ignored".to_string(),
            });
        }

        let error_records = rows.len();
        let counts = BatchCounts {
            parameter_rows: submission.rows.len(),
            total_records,
            valid_records: total_records.saturating_sub(error_records),
            error_records,
            warnings: warnings.len(),
        };

        ValidationReport {
            structural,
            rows,
            warnings,
            counts,
        }
    }
}

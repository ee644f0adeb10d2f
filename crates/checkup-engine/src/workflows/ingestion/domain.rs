use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for uploaded batches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        Self(format!("batch-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Batch lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validated,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl BatchStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "validated" => Some(Self::Validated),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSource {
    Upload,
    Manual,
}

impl BatchSource {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upload" => Some(Self::Upload),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One (employee occurrence, parameter) observation with the employee's demographics
/// repeated on every row. Every field is kept as the raw submitted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRow {
    pub row_number: u32,
    pub employee_id: String,
    pub name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub test_date: String,
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub location: String,
    pub parameter_name: String,
    pub parameter_value: String,
}

impl BatchRow {
    /// Rows sharing this key belong to the same employee occurrence.
    pub fn occurrence_key(&self) -> (u32, &str) {
        (self.row_number, self.employee_id.as_str())
    }

    pub(crate) fn same_demographics(&self, other: &BatchRow) -> bool {
        self.employee_id == other.employee_id
            && self.name == other.name
            && self.date_of_birth == other.date_of_birth
            && self.gender == other.gender
            && self.email == other.email
            && self.phone == other.phone
            && self.test_date == other.test_date
            && self.company_id == other.company_id
            && self.location == other.location
    }
}

/// Parsed dataset handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub uploaded_by: String,
    pub source: BatchSource,
    /// Raw column headers of the upload; empty for row-shaped manual entry.
    #[serde(default)]
    pub columns: Vec<String>,
    pub rows: Vec<BatchRow>,
    /// Spreadsheet lines that carried demographics but no parameter values.
    #[serde(default)]
    pub empty_rows: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Parameter rows in the batch.
    pub parameter_rows: usize,
    /// Employee occurrences.
    pub total_records: usize,
    pub valid_records: usize,
    pub error_records: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub status: BatchStatus,
    pub source: BatchSource,
    pub uploaded_by: String,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub columns: Vec<String>,
    pub counts: BatchCounts,
    pub error_detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    pub fn status_view(&self) -> BatchStatusView {
        BatchStatusView {
            batch_id: self.id.clone(),
            status: self.status.label(),
            counts: self.counts,
            approved_by: self.approved_by.clone(),
            rejection_reason: self.rejection_reason.clone(),
            error_detail: self.error_detail.clone(),
        }
    }
}

/// Externally visible batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusView {
    pub batch_id: BatchId,
    pub status: &'static str,
    pub counts: BatchCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<serde_json::Value>,
}

/// Typed payload persisted on a failed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

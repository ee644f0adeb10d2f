//! Population statistics: per-bucket running averages fed by observation jobs
//! the writer emits after each committed batch.

pub mod aggregator;
pub mod bucket;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reference::Gender;
use crate::workflows::ingestion::domain::BatchId;

pub use aggregator::{spawn_aggregator, BucketSink, MergeSummary, ObservationBuffer};
pub use bucket::{collect_deltas, BucketKey, BucketStat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "10-20")]
    Teens,
    #[serde(rename = "20-30")]
    Twenties,
    #[serde(rename = "30-40")]
    Thirties,
    #[serde(rename = "40-50")]
    Forties,
    #[serde(rename = "50-60")]
    Fifties,
    #[serde(rename = "60+")]
    SixtyPlus,
}

impl AgeBracket {
    /// Ages under 20 share the youngest bracket.
    pub fn for_age(age: u32) -> Self {
        match age {
            0..=19 => Self::Teens,
            20..=29 => Self::Twenties,
            30..=39 => Self::Thirties,
            40..=49 => Self::Forties,
            50..=59 => Self::Fifties,
            _ => Self::SixtyPlus,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Teens => "10-20",
            Self::Twenties => "20-30",
            Self::Thirties => "30-40",
            Self::Forties => "40-50",
            Self::Fifties => "50-60",
            Self::SixtyPlus => "60+",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "10-20" => Some(Self::Teens),
            "20-30" => Some(Self::Twenties),
            "30-40" => Some(Self::Thirties),
            "40-50" => Some(Self::Forties),
            "50-60" => Some(Self::Fifties),
            "60+" => Some(Self::SixtyPlus),
            _ => None,
        }
    }
}

/// One employee occurrence's contribution to the population statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub company_id: String,
    pub location: String,
    pub age_bracket: AgeBracket,
    pub gender: Gender,
    /// Parameter key to raw value; non-numeric values are ignored at merge time.
    pub values: BTreeMap<String, String>,
}

/// Observations from one committed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationJob {
    pub job_key: String,
    pub batch_id: BatchId,
    pub records: Vec<ObservationRecord>,
}

impl ObservationJob {
    pub fn key_for(batch_id: &BatchId, chunk_index: usize) -> String {
        format!("{batch_id}:{chunk_index}")
    }

    /// Number of parameter observations carried, the unit the drain trigger counts in.
    pub fn observation_count(&self) -> usize {
        self.records.iter().map(|record| record.values.len()).sum()
    }
}

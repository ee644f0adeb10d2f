//! Health Index and Biological Age computation.
//!
//! Nothing in here performs I/O: every engine is a pure function of a
//! [`ParameterValues`] map and the reference snapshot it was built from.

pub mod bio_age;
pub mod deviation;
pub mod expression;
pub mod health_index;

use std::collections::BTreeMap;

pub use bio_age::{BioAgeEstimator, BioAgeInput, BioAgeOutcome};
pub use deviation::LabStatus;
pub use expression::RuleExpr;
pub use health_index::{HealthIndexEngine, HealthIndexOutcome, HealthIndexVersion};

/// Numeric observations keyed by canonical parameter key.
pub type ParameterValues = BTreeMap<String, f64>;

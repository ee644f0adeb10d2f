//! Batch ingestion and health scoring for corporate checkup uploads.

pub mod config;
pub mod error;
pub mod reference;
pub mod store;
pub mod telemetry;
pub mod workflows;

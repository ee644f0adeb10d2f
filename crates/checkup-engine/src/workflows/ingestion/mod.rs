//! Batch intake: parse, validate, approve, and write health checkup uploads.

pub mod alerts;
pub mod chunking;
pub mod domain;
pub(crate) mod mapping;
pub mod normalizer;
pub mod parser;
pub mod router;
pub mod service;
pub mod validation;
pub mod values;
pub mod worker;
pub mod writer;

#[cfg(test)]
mod tests;

pub use alerts::{AlertError, BatchAlert, BatchNotifier};
pub use domain::{
    BatchCounts, BatchFailure, BatchId, BatchRecord, BatchRow, BatchSource, BatchStatus,
    BatchStatusView, BatchSubmission,
};
pub use router::batch_router;
pub use service::{AcceptedBatch, ApprovalOutcome, BatchCoordinator, BatchServiceError, ExecutionMode};
pub use validation::{ValidationReport, Validator};
pub use worker::spawn_batch_worker;
pub use writer::{ChunkedWriter, IntegrityKind, WriteError, WriteSummary};

pub mod demographics;
pub mod ingestion;
pub mod jobs;
pub mod scoring;

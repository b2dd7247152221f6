use thiserror::Error;

use crate::mapping::MappingError;
use crate::normalize::RecordError;
use crate::smoothing::SmoothingError;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum BhulanError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Smoothing error: {0}")]
    Smoothing(#[from] SmoothingError),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid input file {path}: {reason}")]
    InvalidInputFile { path: String, reason: String },

    #[error("Too many ingestion jobs in flight (limit {0})")]
    TooManyInflightJobs(usize),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Logging initialisation failed: {0}")]
    Logging(String),
}

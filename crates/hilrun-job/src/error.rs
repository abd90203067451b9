//! Error types for job and device descriptions

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading a job or device description
#[derive(Debug, Error)]
pub enum JobSpecError {
    /// Document could not be parsed
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Document could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("invalid value for field '{field}': {message}")]
    InvalidFieldValue { field: String, message: String },
}

/// Result type for job description operations
pub type Result<T> = std::result::Result<T, JobSpecError>;

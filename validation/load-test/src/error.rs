//! Error types for the load test harness.
//!
//! Only errors raised before dispatch starts end up here. Failures of
//! individual jobs are recorded in the aggregate stats instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::preprocess::PreprocessError;

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum LoadTestError {
    #[error("Job source unavailable at {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("Failed to preprocess texture {path}: {source}")]
    Preprocess {
        path: PathBuf,
        #[source]
        source: PreprocessError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for harness setup.
pub type Result<T> = std::result::Result<T, LoadTestError>;

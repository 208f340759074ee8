//! Error types for request construction.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using BuildError.
pub type BuildResult<T> = Result<T, BuildError>;

/// Failure to turn a job into a request. Aborts only the job it belongs to.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to read model file {path}: {source}")]
    ModelRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid output dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid content type '{content_type}' for part '{part}': {message}")]
    InvalidContentType {
        part: String,
        content_type: String,
        message: String,
    },
}

impl BuildError {
    /// Short reason used in per-job failure lines.
    pub fn reason(&self) -> String {
        match self {
            BuildError::ModelRead { path, .. } => format!("model unreadable: {}", path.display()),
            BuildError::InvalidDimensions { width, height } => {
                format!("invalid size {}x{}", width, height)
            }
            BuildError::InvalidContentType { part, .. } => {
                format!("invalid content type for {}", part)
            }
        }
    }
}

//! Error types for the autotuning engine.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = TuneError> = std::result::Result<T, E>;

/// Failures surfaced by declarations, the loader, the result cache and the
/// search driver.
#[derive(Debug, Error)]
pub enum TuneError {
    /// Malformed declaration or entry-point argument.
    #[error("{0}")]
    Validation(String),

    #[error("could not load transform space from {path}: {reason}")]
    Loader { path: PathBuf, reason: String },

    #[error("result cache error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("failed to encode cache fields: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("could not create cache directory: {0}")]
    Io(#[from] std::io::Error),

    /// Any measurement failure other than an invalid parameter. Fatal.
    #[error("measurement failed: {0:#}")]
    Measurement(#[source] anyhow::Error),
}

impl TuneError {
    pub fn loader(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TuneError::Loader {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Raised by a kernel transformation or by the measurement collaborator.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The parameter values are not valid for this particular problem.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl KernelError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        KernelError::InvalidParameter(reason.into())
    }
}

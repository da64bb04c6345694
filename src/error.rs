use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a verification, or part of one.
///
/// Only `ArtifactLoad`, `Setup` and `Contract` abort a run outright. An
/// `UnsupportedLayout` or `Inference` error is recorded in the report and the
/// descriptors gathered so far are still printed.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to load artifact {}: {reason}", path.display())]
    ArtifactLoad { path: PathBuf, reason: String },

    #[error("output `{name}` has shape {shape:?}, expected a rank-3 [batch, anchors, features] tensor")]
    UnsupportedLayout { name: String, shape: Vec<i64> },

    #[error(
        "inference failed for {}: {reason} (declared input shape {declared:?}, bound tensor shape {bound:?})",
        path.display()
    )]
    Inference {
        path: PathBuf,
        declared: Vec<i64>,
        bound: Vec<usize>,
        reason: String,
    },

    #[error("cannot verify {}: {reason}", path.display())]
    Setup { path: PathBuf, reason: String },

    #[error("invalid contract: {reason}")]
    Contract { reason: String },

    #[error("verification worker for {} stopped: {reason}", path.display())]
    Worker { path: PathBuf, reason: String },
}

impl VerifyError {
    /// Whether this error kind ends the process with a non-zero status.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VerifyError::UnsupportedLayout { .. })
    }
}

pub type Result<T, E = VerifyError> = std::result::Result<T, E>;

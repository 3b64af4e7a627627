//! Error types for stage execution.

use std::path::PathBuf;

use treegen_core::FailureKind;

/// Errors that prevent a stage from running to completion under supervision.
///
/// A stage that runs but produces nothing, or is killed at its CPU ceiling, is
/// not an error here; that is reported through `StageResult`.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("display {display} is not available")]
    DisplayUnavailable { display: String },

    #[error("io error while supervising stage: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// All stage errors need operator attention and fail the submission as a
    /// launch failure.
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::Launch
    }
}

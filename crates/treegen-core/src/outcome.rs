//! Aggregate result of one submission's pipeline run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactSet, BaseId};

/// Why a submission failed. Operator-facing only; never reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Identifier or storage exhaustion before any stage ran.
    Allocation,
    /// A stage binary or its display could not be launched.
    Launch,
    /// A stage exceeded its CPU-time ceiling and was killed.
    TimeoutKilled,
    /// A stage completed without producing its output file.
    MissingArtifact,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Allocation => "allocation",
            FailureKind::Launch => "launch",
            FailureKind::TimeoutKilled => "timeout_killed",
            FailureKind::MissingArtifact => "missing_artifact",
        };
        f.write_str(s)
    }
}

/// Outcome of a pipeline run.
///
/// `mesh` and `image` hold the exposable subset of the artifact set and are
/// only populated on success; a mesh left behind by a failed render stays on
/// disk but is not surfaced here.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// `None` when allocation itself failed.
    pub base_id: Option<BaseId>,
    pub success: bool,
    pub elapsed: Duration,
    pub failure: Option<FailureKind>,
    /// Name of the stage that failed, if a stage was reached.
    pub failed_stage: Option<String>,
    pub mesh: Option<PathBuf>,
    pub image: Option<PathBuf>,
}

impl PipelineOutcome {
    pub fn succeeded(set: &ArtifactSet, elapsed: Duration) -> Self {
        Self {
            base_id: Some(set.base_id.clone()),
            success: true,
            elapsed,
            failure: None,
            failed_stage: None,
            mesh: Some(set.mesh.clone()),
            image: Some(set.image.clone()),
        }
    }

    pub fn failed(
        base_id: Option<BaseId>,
        failure: FailureKind,
        failed_stage: Option<&str>,
        elapsed: Duration,
    ) -> Self {
        Self {
            base_id,
            success: false,
            elapsed,
            failure: Some(failure),
            failed_stage: failed_stage.map(str::to_string),
            mesh: None,
            image: None,
        }
    }
}

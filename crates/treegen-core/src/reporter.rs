//! Caller-facing result of a submission.
//!
//! A [`Report`] carries only what an untrusted caller may see: a success flag,
//! elapsed time and, on success, opaque references for the serving endpoint.
//! Failure details stay in the operator logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::outcome::PipelineOutcome;

pub const MESSAGE_GENERATED: &str = "generated";
pub const MESSAGE_FAILED: &str = "generation failed";

/// Externally visible result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub success: bool,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_ref: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<ArtifactRef>,
    pub message: String,
    pub generated_at: DateTime<Utc>,
}

/// Convert a pipeline outcome into its caller-facing report.
///
/// References are derived from the base identifier, never from the raw paths
/// in the outcome, and are emitted only for successful runs.
pub fn report(outcome: &PipelineOutcome) -> Report {
    let refs = match (&outcome.base_id, outcome.success) {
        (Some(base_id), true) => Some((ArtifactRef::mesh(base_id), ArtifactRef::image(base_id))),
        _ => None,
    };
    let success = refs.is_some();
    let (mesh_ref, image_ref) = refs.unzip();

    Report {
        success,
        elapsed_seconds: outcome.elapsed.as_secs_f64(),
        mesh_ref,
        image_ref,
        message: if success {
            MESSAGE_GENERATED
        } else {
            MESSAGE_FAILED
        }
        .to_string(),
        generated_at: Utc::now(),
    }
}

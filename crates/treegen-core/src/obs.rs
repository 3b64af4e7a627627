//! Structured lifecycle events for submissions.
//!
//! Every event carries an `event` field so log pipelines can filter on it.
//! Tool diagnostics are logged at `debug` and never leave the operator side.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Span that tags every log line emitted during a submission with its base
/// identifier. Attach with `tracing::Instrument` so the submission future
/// stays `Send`.
pub fn submission_span(base_id: &str) -> tracing::Span {
    tracing::info_span!("treegen.submission", base_id = %base_id)
}

/// Short content digest of a submission, for correlating logs without
/// logging the grammar itself.
pub fn submission_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}

pub fn emit_submission_started(base_id: &str, digest: &str, bytes: usize) {
    info!(event = "submission.started", base_id = %base_id, digest = %digest, bytes = bytes);
}

pub fn emit_stage_finished(
    stage: &str,
    duration_ms: u64,
    exit: &str,
    artifact_exists: bool,
    truncated: bool,
) {
    info!(
        event = "stage.finished",
        stage = %stage,
        duration_ms = duration_ms,
        exit = %exit,
        artifact_exists = artifact_exists,
        truncated = truncated,
    );
}

pub fn emit_stage_diagnostics(stage: &str, output: &str) {
    if !output.is_empty() {
        debug!(event = "stage.diagnostics", stage = %stage, output = %output);
    }
}

pub fn emit_stage_skipped(stage: &str, reason: &str) {
    info!(event = "stage.skipped", stage = %stage, reason = %reason);
}

pub fn emit_stage_error(stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "stage.error", stage = %stage, error = %error);
}

pub fn emit_submission_finished(success: bool, elapsed_ms: u64, failure: Option<&str>) {
    info!(
        event = "submission.finished",
        success = success,
        elapsed_ms = elapsed_ms,
        failure = failure.unwrap_or("none"),
    );
}

pub fn emit_artifacts_purged(root: &str, removed: usize) {
    info!(event = "artifacts.purged", root = %root, removed = removed);
}

//! Generation pipeline orchestration.
//!
//! One submission flows through:
//!
//! 1. allocate a base identifier and derive the artifact paths
//! 2. write the grammar text verbatim to the source path
//! 3. build stage (source -> mesh) under its CPU ceiling
//! 4. short-circuit to failure if no mesh exists; render is never launched
//! 5. render stage (mesh -> image) under its own CPU ceiling
//! 6. success iff the image exists
//!
//! Every failure is absorbed here and turned into a [`PipelineOutcome`]; no
//! error detail crosses into the caller-facing report.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, Instrument};
use treegen_core::obs;
use treegen_core::{
    ArtifactError, ArtifactSet, ArtifactStore, FailureKind, PipelineConfig, PipelineOutcome,
};

use crate::runner::StageExecutor;
use crate::stage::StageConfig;

/// Orchestrates the build and render stages for each submission.
///
/// Holds no per-submission state, so one instance can serve any number of
/// concurrent submissions.
pub struct GenerationPipeline {
    store: ArtifactStore,
    executor: Arc<dyn StageExecutor>,
    build: StageConfig,
    render: StageConfig,
}

impl GenerationPipeline {
    /// Create a pipeline from configuration, opening the artifact store.
    pub fn new(
        config: &PipelineConfig,
        executor: Arc<dyn StageExecutor>,
    ) -> Result<Self, ArtifactError> {
        let store = ArtifactStore::open(&config.artifact_dir)?;
        Ok(Self::from_parts(
            store,
            executor,
            StageConfig::build(config),
            StageConfig::render(config),
        ))
    }

    pub fn from_parts(
        store: ArtifactStore,
        executor: Arc<dyn StageExecutor>,
        build: StageConfig,
        render: StageConfig,
    ) -> Self {
        Self {
            store,
            executor,
            build,
            render,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run one submission through both stages.
    pub async fn run(&self, submission: &str) -> PipelineOutcome {
        let start = Instant::now();

        let outcome = match self.store.allocate() {
            Ok(set) => {
                let span = obs::submission_span(set.base_id.as_str());
                self.run_allocated(&set, submission, start)
                    .instrument(span)
                    .await
            }
            Err(e) => {
                error!(error = %e, "artifact allocation failed");
                PipelineOutcome::failed(None, FailureKind::Allocation, None, start.elapsed())
            }
        };

        obs::emit_submission_finished(
            outcome.success,
            outcome.elapsed.as_millis() as u64,
            outcome.failure.map(|f| f.to_string()).as_deref(),
        );
        outcome
    }

    async fn run_allocated(
        &self,
        set: &ArtifactSet,
        submission: &str,
        start: Instant,
    ) -> PipelineOutcome {
        let base_id = Some(set.base_id.clone());
        obs::emit_submission_started(
            set.base_id.as_str(),
            &obs::submission_digest(submission),
            submission.len(),
        );

        if let Err(e) = tokio::fs::write(&set.source, submission).await {
            error!(error = %e, path = %set.source.display(), "failed to write grammar source");
            return PipelineOutcome::failed(base_id, FailureKind::Allocation, None, start.elapsed());
        }

        if let Err(kind) = self.run_stage(&self.build, set).await {
            obs::emit_stage_skipped(self.render.name(), "build stage produced no mesh");
            return PipelineOutcome::failed(
                base_id,
                kind,
                Some(self.build.name()),
                start.elapsed(),
            );
        }

        if let Err(kind) = self.run_stage(&self.render, set).await {
            return PipelineOutcome::failed(
                base_id,
                kind,
                Some(self.render.name()),
                start.elapsed(),
            );
        }

        PipelineOutcome::succeeded(set, start.elapsed())
    }

    async fn run_stage(&self, config: &StageConfig, set: &ArtifactSet) -> Result<(), FailureKind> {
        let invocation = config.invocation(set);

        match self.executor.execute(&invocation).await {
            Ok(result) => {
                obs::emit_stage_finished(
                    &result.stage_name,
                    result.duration_ms,
                    &result.exit.to_string(),
                    result.artifact_exists,
                    result.truncated,
                );
                obs::emit_stage_diagnostics(&result.stage_name, &result.output);
                match result.failure() {
                    None => Ok(()),
                    Some(kind) => Err(kind),
                }
            }
            Err(e) => {
                obs::emit_stage_error(config.name(), &e);
                Err(e.failure_kind())
            }
        }
    }
}

//! In-memory stage executor (testing only).
//!
//! `ScriptedExecutor` never launches a process. It records every invocation
//! and, per stage name, either writes the expected output file or simulates
//! one of the failure modes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StageError;
use crate::runner::{ExitOutcome, StageExecutor, StageResult};
use crate::stage::StageInvocation;

/// What a scripted stage does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Write the expected output file and exit 0.
    Produce,
    /// Exit 0 without writing anything.
    Omit,
    /// Report a CPU-ceiling kill.
    Timeout,
    /// Fail to launch.
    LaunchFailure,
}

/// Stage executor driven by a per-stage behavior table.
///
/// Stages without an explicit behavior default to [`Behavior::Produce`].
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    behaviors: HashMap<String, Behavior>,
    invocations: Mutex<Vec<StageInvocation>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the behavior for a stage (builder pattern).
    pub fn with(mut self, stage: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(stage.to_string(), behavior);
        self
    }

    /// Every invocation received so far, in order.
    pub fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Whether the named stage was ever invoked.
    pub fn launched(&self, stage: &str) -> bool {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .any(|inv| inv.stage_name == stage)
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageResult, StageError> {
        self.invocations.lock().unwrap().push(invocation.clone());

        let behavior = self
            .behaviors
            .get(&invocation.stage_name)
            .copied()
            .unwrap_or(Behavior::Produce);

        let exit = match behavior {
            Behavior::Produce => {
                let body = format!("fake {} output\n", invocation.stage_name);
                tokio::fs::write(&invocation.expected_output, body).await?;
                ExitOutcome::Exited(0)
            }
            Behavior::Omit => ExitOutcome::Exited(0),
            Behavior::Timeout => ExitOutcome::TimeoutKilled,
            Behavior::LaunchFailure => {
                return Err(StageError::Launch {
                    program: invocation.program.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
        };

        Ok(StageResult {
            stage_name: invocation.stage_name.clone(),
            exit,
            output: String::new(),
            truncated: false,
            duration_ms: 0,
            artifact_exists: tokio::fs::metadata(&invocation.expected_output)
                .await
                .is_ok(),
        })
    }
}

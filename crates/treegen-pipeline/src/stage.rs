//! Stage definitions and the concrete invocations derived from them.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use treegen_core::{ArtifactRole, ArtifactSet, PipelineConfig};

/// The two external tools the pipeline drives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// Grammar text -> mesh.
    Build,

    /// Mesh -> preview image, rendered headlessly.
    Render,
}

impl BuiltinStage {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Build => "build",
            BuiltinStage::Render => "render",
        }
    }

    pub fn input_role(&self) -> ArtifactRole {
        match self {
            BuiltinStage::Build => ArtifactRole::Source,
            BuiltinStage::Render => ArtifactRole::Mesh,
        }
    }

    /// The artifact whose existence signals that the stage succeeded.
    pub fn output_role(&self) -> ArtifactRole {
        match self {
            BuiltinStage::Build => ArtifactRole::Mesh,
            BuiltinStage::Render => ArtifactRole::Image,
        }
    }
}

/// Configuration for one stage, independent of any submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    pub stage: BuiltinStage,

    /// Executable to launch.
    pub program: PathBuf,

    /// CPU-time ceiling in seconds.
    pub cpu_limit_secs: u64,

    /// Supervisory wall-clock deadline in seconds.
    pub wall_limit_secs: u64,

    /// Maximum captured diagnostic bytes.
    pub capture_limit_bytes: usize,

    /// Iteration override (build stage only).
    pub iterations: Option<u32>,

    /// X display required by the stage (render stage only).
    pub display: Option<String>,
}

impl StageConfig {
    pub fn build(config: &PipelineConfig) -> Self {
        Self {
            stage: BuiltinStage::Build,
            program: config.build_command.clone(),
            cpu_limit_secs: config.cpu_limit_secs,
            wall_limit_secs: config.wall_limit().as_secs(),
            capture_limit_bytes: config.capture_limit_bytes,
            iterations: config.build_iterations,
            display: None,
        }
    }

    pub fn render(config: &PipelineConfig) -> Self {
        Self {
            stage: BuiltinStage::Render,
            program: config.render_command.clone(),
            cpu_limit_secs: config.cpu_limit_secs,
            wall_limit_secs: config.wall_limit().as_secs(),
            capture_limit_bytes: config.capture_limit_bytes,
            iterations: None,
            display: Some(config.display.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.stage.name()
    }

    /// Build the argument vector for this stage against a submission's
    /// artifact paths. Arguments are discrete; no shell is involved.
    pub fn args(&self, set: &ArtifactSet) -> Vec<OsString> {
        let input = set.path(self.stage.input_role()).as_os_str().to_owned();
        let output = set.path(self.stage.output_role()).as_os_str().to_owned();

        match self.stage {
            BuiltinStage::Build => {
                let mut args = vec![input];
                if let Some(iterations) = self.iterations {
                    args.push(iterations.to_string().into());
                }
                args.push(output);
                args
            }
            BuiltinStage::Render => vec![
                input,
                "-exit_immediately".into(),
                "-output_image".into(),
                output,
            ],
        }
    }

    /// Resolve this stage into a concrete invocation for one submission.
    pub fn invocation(&self, set: &ArtifactSet) -> StageInvocation {
        let env = self
            .display
            .iter()
            .map(|d| ("DISPLAY".to_string(), d.clone()))
            .collect();

        StageInvocation {
            stage_name: self.name().to_string(),
            program: self.program.clone(),
            args: self.args(set),
            env,
            display: self.display.clone(),
            cpu_limit: Duration::from_secs(self.cpu_limit_secs),
            wall_limit: Duration::from_secs(self.wall_limit_secs.max(self.cpu_limit_secs)),
            capture_limit: self.capture_limit_bytes,
            expected_output: set.path(self.stage.output_role()).to_path_buf(),
        }
    }
}

/// Everything needed to launch one stage for one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct StageInvocation {
    pub stage_name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Display that must be reachable before launch.
    pub display: Option<String>,
    pub cpu_limit: Duration,
    pub wall_limit: Duration,
    pub capture_limit: usize,
    /// File whose existence after exit marks the stage as successful.
    pub expected_output: PathBuf,
}

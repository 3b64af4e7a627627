//! Pipeline configuration loaded from `TREEGEN_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_CPU_LIMIT_SECS: &str = "TREEGEN_CPU_LIMIT_SECS";
pub const ENV_WALL_FACTOR: &str = "TREEGEN_WALL_FACTOR";
pub const ENV_ARTIFACT_DIR: &str = "TREEGEN_ARTIFACT_DIR";
pub const ENV_BUILD_CMD: &str = "TREEGEN_BUILD_CMD";
pub const ENV_RENDER_CMD: &str = "TREEGEN_RENDER_CMD";
pub const ENV_BUILD_ITERATIONS: &str = "TREEGEN_BUILD_ITERATIONS";
pub const ENV_DISPLAY: &str = "TREEGEN_DISPLAY";
pub const ENV_CAPTURE_LIMIT: &str = "TREEGEN_CAPTURE_LIMIT";

const DEFAULT_CPU_LIMIT_SECS: u64 = 15;
const DEFAULT_WALL_FACTOR: u32 = 3;
const DEFAULT_BUILD_CMD: &str = "meshpro";
const DEFAULT_RENDER_CMD: &str = "meshview";
const DEFAULT_DISPLAY: &str = ":1";
const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Settings shared by every submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// CPU-time ceiling applied to each stage independently.
    pub cpu_limit_secs: u64,
    /// The supervisory wall-clock deadline is `cpu_limit_secs * wall_factor`.
    pub wall_factor: u32,
    /// Root of the artifact namespace.
    pub artifact_dir: PathBuf,
    /// Build stage executable (grammar -> mesh).
    pub build_command: PathBuf,
    /// Render stage executable (mesh -> image).
    pub render_command: PathBuf,
    /// Optional iteration override forwarded to the build tool.
    pub build_iterations: Option<u32>,
    /// X display the render stage draws on.
    pub display: String,
    /// Maximum bytes of tool output kept per stage.
    pub capture_limit_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cpu_limit_secs: DEFAULT_CPU_LIMIT_SECS,
            wall_factor: DEFAULT_WALL_FACTOR,
            artifact_dir: std::env::temp_dir().join("treegen"),
            build_command: PathBuf::from(DEFAULT_BUILD_CMD),
            render_command: PathBuf::from(DEFAULT_RENDER_CMD),
            build_iterations: None,
            display: DEFAULT_DISPLAY.to_string(),
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    ///
    /// `DISPLAY` is honoured when `TREEGEN_DISPLAY` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            cpu_limit_secs: parse_var(&lookup, ENV_CPU_LIMIT_SECS)?
                .unwrap_or(defaults.cpu_limit_secs),
            wall_factor: parse_var(&lookup, ENV_WALL_FACTOR)?.unwrap_or(defaults.wall_factor),
            artifact_dir: lookup(ENV_ARTIFACT_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            build_command: lookup(ENV_BUILD_CMD)
                .map(PathBuf::from)
                .unwrap_or(defaults.build_command),
            render_command: lookup(ENV_RENDER_CMD)
                .map(PathBuf::from)
                .unwrap_or(defaults.render_command),
            build_iterations: parse_var(&lookup, ENV_BUILD_ITERATIONS)?,
            display: lookup(ENV_DISPLAY)
                .or_else(|| lookup("DISPLAY"))
                .unwrap_or(defaults.display),
            capture_limit_bytes: parse_var(&lookup, ENV_CAPTURE_LIMIT)?
                .unwrap_or(defaults.capture_limit_bytes),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a safety bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_limit_secs == 0 {
            return Err(invalid(ENV_CPU_LIMIT_SECS, "must be at least 1 second"));
        }
        if self.wall_factor == 0 {
            return Err(invalid(ENV_WALL_FACTOR, "must be at least 1"));
        }
        if self.capture_limit_bytes == 0 {
            return Err(invalid(ENV_CAPTURE_LIMIT, "must be at least 1 byte"));
        }
        if self.display.trim().is_empty() {
            return Err(invalid(ENV_DISPLAY, "must not be empty"));
        }
        Ok(())
    }

    pub fn cpu_limit(&self) -> Duration {
        Duration::from_secs(self.cpu_limit_secs)
    }

    /// Wall-clock deadline after which the supervisor kills a stage that is
    /// not burning CPU (blocked on I/O, sleeping, waiting on the display).
    pub fn wall_limit(&self) -> Duration {
        self.cpu_limit() * self.wall_factor
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &e.to_string())),
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

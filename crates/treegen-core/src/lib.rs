//! treegen core
//!
//! Shared building blocks for the tree generation pipeline:
//! - artifact identity and the on-disk artifact namespace
//! - the pipeline outcome model and the caller-facing reporter
//! - configuration, error taxonomy and tracing setup

pub mod artifact;
pub mod config;
pub mod error;
pub mod obs;
pub mod outcome;
pub mod reporter;
pub mod telemetry;

pub use artifact::{ArtifactRef, ArtifactRole, ArtifactSet, ArtifactStore, BaseId};
pub use config::PipelineConfig;
pub use error::{ArtifactError, ConfigError};
pub use outcome::{FailureKind, PipelineOutcome};
pub use reporter::{report, Report};
pub use telemetry::init_tracing;

/// treegen version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! treegen pipeline
//!
//! Turns one grammar submission into a mesh and a preview image by driving
//! two external tools:
//! - `build`: grammar source -> mesh
//! - `render`: mesh -> preview image (headless, needs an X display)
//!
//! Each stage runs under its own CPU-time ceiling. A stage succeeds only if
//! its output file exists afterwards.

pub mod display;
pub mod error;
pub mod fakes;
pub mod pipeline;
pub mod runner;
pub mod stage;

pub use display::DisplayProbe;
pub use error::StageError;
pub use pipeline::GenerationPipeline;
pub use runner::{ExitOutcome, ProcessRunner, StageExecutor, StageResult};
pub use stage::{BuiltinStage, StageConfig, StageInvocation};

//! Tracing setup for the `treegen` binary.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored since
//! the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets that log at the requested level; everything else stays at `warn`.
const TREEGEN_TARGETS: [&str; 3] = ["treegen", "treegen_core", "treegen_pipeline"];

/// Default filter when `RUST_LOG` is unset: `level` for treegen's own crates,
/// `warn` for dependencies.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(TREEGEN_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json` - newline-delimited JSON instead of human-readable lines.
/// * `level` - verbosity for treegen targets when `RUST_LOG` is not set.
///
/// Logs go to stderr; stdout carries the generation report.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

//! Display availability check for the headless render stage.
//!
//! The virtual framebuffer is provisioned outside treegen (e.g. `Xvfb :1`).
//! For local display names the probe looks for the X server's socket; remote
//! displays (`host:N`) cannot be checked this way and are assumed reachable.

use std::path::{Path, PathBuf};

use crate::error::StageError;

pub const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

/// How the runner verifies the display before launching a stage that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayProbe {
    /// Look for `X<n>` in the given socket directory.
    X11Socket(PathBuf),
    /// Trust that the display exists.
    Skip,
}

impl Default for DisplayProbe {
    fn default() -> Self {
        DisplayProbe::X11Socket(PathBuf::from(X11_SOCKET_DIR))
    }
}

impl DisplayProbe {
    pub fn check(&self, display: &str) -> Result<(), StageError> {
        match self {
            DisplayProbe::X11Socket(dir) => probe_in(dir, display),
            DisplayProbe::Skip => Ok(()),
        }
    }
}

/// Check that a local display's socket exists in the default socket directory.
pub fn probe(display: &str) -> Result<(), StageError> {
    probe_in(Path::new(X11_SOCKET_DIR), display)
}

/// Check a display against an explicit socket directory.
pub fn probe_in(socket_dir: &Path, display: &str) -> Result<(), StageError> {
    let unavailable = || StageError::DisplayUnavailable {
        display: display.to_string(),
    };

    let (host, rest) = display.rsplit_once(':').ok_or_else(unavailable)?;
    let number = rest.split('.').next().unwrap_or_default();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unavailable());
    }

    if !host.is_empty() && host != "unix" {
        return Ok(());
    }

    if socket_dir.join(format!("X{number}")).exists() {
        Ok(())
    } else {
        Err(unavailable())
    }
}

//! Error taxonomy for treegen core.

use std::path::PathBuf;

/// Errors produced by the artifact store.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("could not allocate artifact identifier under {root}: {reason}")]
    Allocation { root: PathBuf, reason: String },

    #[error("invalid artifact reference: {0}")]
    InvalidReference(String),

    #[error("artifact path escapes the artifact root: {0}")]
    OutsideNamespace(PathBuf),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Result type for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_error_display() {
        let err = ArtifactError::Allocation {
            root: PathBuf::from("/var/treegen"),
            reason: "read-only file system".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/treegen"));
        assert!(msg.contains("read-only"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "TREEGEN_CPU_LIMIT_SECS".to_string(),
            reason: "must be positive".to_string(),
        };
        assert!(err.to_string().contains("TREEGEN_CPU_LIMIT_SECS"));
    }
}

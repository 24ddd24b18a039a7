//! Bootstrap error types.

use thiserror::Error;

use rootsize_core::{ConfigError, FailureKind};
use rootsize_executor::ExecutorError;
use rootsize_metadata::MetadataError;
use rootsize_policy::RuleError;

/// Anything that ends a run early.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid rule table: {0}")]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("metadata not resolved before the run deadline ({waited_ms} ms)")]
    MetadataDeadline { waited_ms: u64 },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl BootstrapError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BootstrapError::Config(_) | BootstrapError::Rules(_) => FailureKind::ConfigurationError,
            BootstrapError::Metadata(e) => e.kind(),
            BootstrapError::MetadataDeadline { .. } => FailureKind::MetadataUnavailable,
            BootstrapError::Executor(e) => e.kind(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_source_maps_to_its_exit_code() {
        let cases: Vec<(BootstrapError, u8)> = vec![
            (
                ConfigError::Invalid {
                    field: "root_device",
                    reason: "must be under /dev/".to_string(),
                }
                .into(),
                12,
            ),
            (RuleError::EmptyPattern.into(), 12),
            (
                MetadataError::Unavailable {
                    attempts: 5,
                    reason: "connection refused".to_string(),
                }
                .into(),
                10,
            ),
            (BootstrapError::MetadataDeadline { waited_ms: 300_000 }, 10),
            (MetadataError::Malformed("instance type \"\"".to_string()).into(), 11),
            (
                ExecutorError::ResizeTimeout {
                    volume_id: "vol-0abc".to_string(),
                    target_gib: 300,
                    waited_ms: 300_000,
                    last_state: "modifying".to_string(),
                }
                .into(),
                13,
            ),
            (
                ExecutorError::FilesystemExtend {
                    device: "/dev/nvme0n1".to_string(),
                    reason: "xfs_growfs failed".to_string(),
                }
                .into(),
                14,
            ),
            (ExecutorError::Provider("UnauthorizedOperation".to_string()).into(), 15),
        ];

        for (err, code) in cases {
            assert_eq!(err.exit_code(), code, "{err}");
        }
    }
}

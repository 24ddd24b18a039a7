//! Failure kinds and configuration errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a bootstrap run can end other than `Done`.
///
/// Each kind maps to its own process exit code so the node-init system can
/// tell them apart without parsing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Metadata service unreachable after bounded retry.
    MetadataUnavailable,
    /// Metadata reachable but not in the expected shape.
    MalformedMetadata,
    /// Bad config file or ambiguous rule table.
    ConfigurationError,
    /// Grow/poll exceeded the run deadline. Safe to rerun.
    ResizeTimeout,
    /// The volume grew but the filesystem did not follow.
    FilesystemExtendFailed,
    /// The provider API rejected or failed a call.
    ProviderError,
}

impl FailureKind {
    pub fn exit_code(&self) -> u8 {
        match self {
            FailureKind::MetadataUnavailable => 10,
            FailureKind::MalformedMetadata => 11,
            FailureKind::ConfigurationError => 12,
            FailureKind::ResizeTimeout => 13,
            FailureKind::FilesystemExtendFailed => 14,
            FailureKind::ProviderError => 15,
        }
    }

    /// Whether rerunning the bootstrap step can succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FailureKind::MetadataUnavailable
                | FailureKind::ResizeTimeout
                | FailureKind::FilesystemExtendFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MetadataUnavailable => "MetadataUnavailable",
            FailureKind::MalformedMetadata => "MalformedMetadata",
            FailureKind::ConfigurationError => "ConfigurationError",
            FailureKind::ResizeTimeout => "ResizeTimeout",
            FailureKind::FilesystemExtendFailed => "FilesystemExtendFailed",
            FailureKind::ProviderError => "ProviderError",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while loading `rootsize.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            FailureKind::MetadataUnavailable,
            FailureKind::MalformedMetadata,
            FailureKind::ConfigurationError,
            FailureKind::ResizeTimeout,
            FailureKind::FilesystemExtendFailed,
            FailureKind::ProviderError,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn recoverable_kinds() {
        assert!(FailureKind::ResizeTimeout.is_recoverable());
        assert!(FailureKind::FilesystemExtendFailed.is_recoverable());
        assert!(!FailureKind::ConfigurationError.is_recoverable());
        assert!(!FailureKind::MalformedMetadata.is_recoverable());
    }
}

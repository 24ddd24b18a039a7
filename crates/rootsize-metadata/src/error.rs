//! Metadata error types.

use thiserror::Error;

use rootsize_core::FailureKind;

/// Errors surfaced by the resolver.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata service unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("malformed metadata: {0}")]
    Malformed(String),
}

impl MetadataError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MetadataError::Unavailable { .. } => FailureKind::MetadataUnavailable,
            MetadataError::Malformed(_) => FailureKind::MalformedMetadata,
        }
    }
}

/// Outcome of a single metadata read, before retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Worth retrying: connection refused, timeout, 5xx, expired token.
    #[error("{0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("{0}")]
    Malformed(String),
}

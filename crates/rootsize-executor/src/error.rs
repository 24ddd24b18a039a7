//! Executor error types.

use thiserror::Error;

use rootsize_core::FailureKind;

/// Errors that can occur while applying a resize.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("volume {volume_id}: modification failed ({detail})")]
    ModificationFailed { volume_id: String, detail: String },

    #[error("volume {volume_id}: not ready at {target_gib} GiB after {waited_ms} ms (last state: {last_state})")]
    ResizeTimeout {
        volume_id: String,
        target_gib: u64,
        waited_ms: u64,
        last_state: String,
    },

    #[error("filesystem extend failed on {device}: {reason}")]
    FilesystemExtend { device: String, reason: String },
}

impl ExecutorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutorError::Provider(_) | ExecutorError::ModificationFailed { .. } => {
                FailureKind::ProviderError
            }
            ExecutorError::ResizeTimeout { .. } => FailureKind::ResizeTimeout,
            ExecutorError::FilesystemExtend { .. } => FailureKind::FilesystemExtendFailed,
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

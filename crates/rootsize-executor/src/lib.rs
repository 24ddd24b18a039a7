//! rootsize-executor: apply a resize decision to the live root volume.
//!
//! # Resize Sequence
//!
//! ```text
//! Skip                         → Noop (no provider call)
//! Resize(target), target <= current        (no grow is ever issued)
//!     modification in flight?  → wait for it, then extend
//!     filesystem lags device?  → extend only   (recovery after a crash)
//!     lag cannot be measured   → Noop, with a warning
//!     otherwise                → Noop
//! Resize(target), target > current
//!     modification in flight?  → wait for it
//!     otherwise                → grow_volume(target)
//!     poll describe_volume     → 2s, 4s, .. capped at 30s, until deadline
//!     extend_filesystem(root)
//!     → Applied(ResizeOutcome)
//! ```
//!
//! Branching always follows live provider and filesystem state. The executor
//! keeps no record of earlier runs, so rerunning after any failure picks up
//! wherever the volume actually is.

pub mod error;
pub mod executor;
pub mod filesystem;
pub mod provider;

pub use error::ExecutorError;
pub use executor::{PollConfig, ResizeExecutor};
pub use filesystem::{FilesystemExtender, GrowpartExtender};
pub use provider::{AwsCliVolumeApi, Modification, ModificationState, Readiness, VolumeApi, VolumeStatus};

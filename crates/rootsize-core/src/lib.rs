pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

pub use backoff::Backoff;
pub use config::RootsizeConfig;
pub use error::{ConfigError, FailureKind};
pub use types::*;

//! rootsize-bootstrap: one bootstrap run, start to exit code.
//!
//! The `Orchestrator` chains the other crates:
//!
//! ```text
//! Start ─▶ Resolving ─▶ Deciding ─┬─▶ Skipping ─┬─▶ Done
//!                                 └─▶ Resizing ─┘
//!   any state ──────────────────────────────────────▶ Failed(kind)
//! ```
//!
//! Every run ends in exactly one `OutcomeRecord`, handed to each configured
//! `OutcomeSink`, and one process exit code.

pub mod error;
pub mod orchestrator;
pub mod record;

pub use error::BootstrapError;
pub use orchestrator::{Orchestrator, Phase, RunReport};
pub use record::{JsonLinesSink, OutcomeRecord, OutcomeSink, TracingSink};

//! rootsize-policy: instance-type to root-volume sizing.
//!
//! Builds a validated `RuleTable` from configured `VolumeSizingRule` rows and
//! maps an `InstanceDescriptor` to exactly one `ResizeDecision`. Everything
//! here is pure: no metadata reads, no provider calls.
//!
//! # Decision Algorithm
//!
//! ```text
//! if any attached disk is local ephemeral:
//!     Skip(local-ephemeral-present)
//!
//! rule = exact match on instance type
//!     ?? longest prefix match ("c6i" → "c6i.", "c6*" → "c6")
//!
//! if rule:
//!     Resize(rule.target)
//! else:
//!     Skip(no-matching-rule)   // never guess a size
//! ```
//!
//! Duplicate keys after normalization are rejected when the table is built,
//! so a lookup never has to break a tie.

pub mod engine;
pub mod rules;

pub use engine::decide;
pub use rules::{RuleError, RuleKey, RuleTable, SizingRule};

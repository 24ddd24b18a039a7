//! The per-run outcome record and where it goes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use rootsize_core::{ApplyResult, FailureKind, ResizeDecision, SkipReason};

/// One structured line per run, success or failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ResizeDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApplyResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub dry_run: bool,
    pub duration_ms: u64,
    pub exit_code: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeRecord {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for the outcome record.
pub trait OutcomeSink: Send + Sync {
    fn emit(&self, record: &OutcomeRecord) -> std::io::Result<()>;
}

/// Logs the record at info level on target `rootsize::outcome`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn emit(&self, record: &OutcomeRecord) -> std::io::Result<()> {
        let decision = record.decision.as_ref().map(ToString::to_string);
        let record_json = record.to_json().map_err(std::io::Error::other)?;
        info!(
            target: "rootsize::outcome",
            instance = record.instance_id.as_deref().unwrap_or("-"),
            instance_type = record.instance_type.as_deref().unwrap_or("-"),
            decision = decision.as_deref().unwrap_or("-"),
            exit_code = record.exit_code,
            duration_ms = record.duration_ms,
            error = record.error.as_deref().unwrap_or(""),
            record = %record_json,
            "bootstrap finished"
        );
        Ok(())
    }
}

/// Appends the record as one JSON line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutcomeSink for JsonLinesSink {
    fn emit(&self, record: &OutcomeRecord) -> std::io::Result<()> {
        let mut line = record.to_json().map_err(std::io::Error::other)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

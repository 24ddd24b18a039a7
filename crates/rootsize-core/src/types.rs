//! Shared types used across rootsize crates.

use serde::{Deserialize, Serialize};

/// Identifier of the running instance (e.g. `i-0abc123`).
pub type InstanceId = String;

/// Identifier of an EBS volume (e.g. `vol-0abc123`).
pub type VolumeId = String;

// ── Inventory ──────────────────────────────────────────────────────

/// A block device attached to the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Device node, e.g. `/dev/nvme1n1`.
    pub device_path: String,
    /// NVMe instance-store disk. Never a resize target.
    pub is_local_ephemeral: bool,
    pub size_gib: u64,
}

/// Snapshot of the instance, fetched once per bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub instance_id: InstanceId,
    pub instance_type: String,
    /// Every attached block device, ordered by device path.
    pub attached_local_disks: Vec<BlockDevice>,
    pub root_volume_id: VolumeId,
    /// Device node backing the root volume.
    pub root_device: String,
}

impl InstanceDescriptor {
    /// Whether any attached disk is local instance storage.
    pub fn has_local_ephemeral(&self) -> bool {
        self.attached_local_disks.iter().any(|d| d.is_local_ephemeral)
    }
}

// ── Sizing ─────────────────────────────────────────────────────────

/// One row of the sizing table as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSizingRule {
    /// Exact type (`c6i.2xlarge`), family (`c6i`), or prefix (`c6*`).
    #[serde(rename = "instance_type")]
    pub instance_type_pattern: String,
    #[serde(rename = "size_gib")]
    pub target_size_gib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<u32>,
}

impl VolumeSizingRule {
    pub fn new(pattern: &str, target_size_gib: u64) -> Self {
        Self {
            instance_type_pattern: pattern.to_string(),
            target_size_gib,
            iops: None,
            throughput_mbps: None,
        }
    }

    pub fn target(&self) -> VolumeTarget {
        VolumeTarget {
            size_gib: self.target_size_gib,
            iops: self.iops,
            throughput_mbps: self.throughput_mbps,
        }
    }
}

/// Desired root volume shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTarget {
    pub size_gib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<u32>,
}

impl VolumeTarget {
    /// A size-only target with the volume's current performance class.
    pub fn size(size_gib: u64) -> Self {
        Self {
            size_gib,
            iops: None,
            throughput_mbps: None,
        }
    }
}

/// Why a run leaves the root volume alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Instance storage is present and takes the kubelet/containerd load.
    LocalEphemeralPresent,
    /// The instance type is not in the sizing table.
    NoMatchingRule,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::LocalEphemeralPresent => "local-ephemeral-present",
            SkipReason::NoMatchingRule => "no-matching-rule",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single decision produced per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResizeDecision {
    /// Grow the root volume to `target`. `rule` is the pattern that matched.
    Resize { target: VolumeTarget, rule: String },
    /// Leave the root volume at its launch size.
    Skip { reason: SkipReason },
}

impl ResizeDecision {
    pub fn skip(reason: SkipReason) -> Self {
        ResizeDecision::Skip { reason }
    }

    pub fn target(&self) -> Option<&VolumeTarget> {
        match self {
            ResizeDecision::Resize { target, .. } => Some(target),
            ResizeDecision::Skip { .. } => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ResizeDecision::Resize { .. } => None,
            ResizeDecision::Skip { reason } => Some(*reason),
        }
    }
}

impl std::fmt::Display for ResizeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResizeDecision::Resize { target, rule } => {
                write!(f, "resize to {} GiB (rule {rule})", target.size_gib)
            }
            ResizeDecision::Skip { reason } => write!(f, "skip ({reason})"),
        }
    }
}

// ── Execution ──────────────────────────────────────────────────────

/// What a resize actually did. Emitted to the log sink, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeOutcome {
    pub previous_size_gib: u64,
    pub new_size_gib: u64,
    pub filesystem_grown: bool,
    pub duration_ms: u64,
}

/// Result of applying a decision to the live volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyResult {
    Applied(ResizeOutcome),
    /// Nothing to do: skipped, or the volume and filesystem already fit.
    Noop,
}

impl ApplyResult {
    pub fn outcome(&self) -> Option<&ResizeOutcome> {
        match self {
            ApplyResult::Applied(outcome) => Some(outcome),
            ApplyResult::Noop => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(path: &str, ephemeral: bool) -> BlockDevice {
        BlockDevice {
            device_path: path.to_string(),
            is_local_ephemeral: ephemeral,
            size_gib: 100,
        }
    }

    #[test]
    fn descriptor_detects_local_ephemeral() {
        let mut descriptor = InstanceDescriptor {
            instance_id: "i-0abc".to_string(),
            instance_type: "c6id.2xlarge".to_string(),
            attached_local_disks: vec![disk("/dev/nvme0n1", false)],
            root_volume_id: "vol-0abc".to_string(),
            root_device: "/dev/nvme0n1".to_string(),
        };
        assert!(!descriptor.has_local_ephemeral());

        descriptor.attached_local_disks.push(disk("/dev/nvme1n1", true));
        assert!(descriptor.has_local_ephemeral());
    }

    #[test]
    fn skip_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&ResizeDecision::skip(SkipReason::NoMatchingRule)).unwrap();
        assert_eq!(json, r#"{"action":"skip","reason":"no-matching-rule"}"#);
    }

    #[test]
    fn rule_parses_from_toml_field_names() {
        let rule: VolumeSizingRule = toml::from_str(
            r#"
instance_type = "c6i.2xlarge"
size_gib = 300
iops = 6000
"#,
        )
        .unwrap();
        assert_eq!(rule.instance_type_pattern, "c6i.2xlarge");
        assert_eq!(rule.target().size_gib, 300);
        assert_eq!(rule.target().iops, Some(6000));
        assert_eq!(rule.target().throughput_mbps, None);
    }

    #[test]
    fn decision_display() {
        let decision = ResizeDecision::Resize {
            target: VolumeTarget::size(300),
            rule: "c6i.2xlarge".to_string(),
        };
        assert_eq!(decision.to_string(), "resize to 300 GiB (rule c6i.2xlarge)");
        assert_eq!(
            ResizeDecision::skip(SkipReason::LocalEphemeralPresent).to_string(),
            "skip (local-ephemeral-present)"
        );
    }
}

//! Provider volume API.
//!
//! `VolumeApi` is the seam to the cloud provider. The production
//! implementation drives the AWS CLI that ships on EKS-optimized AMIs, using
//! the node's instance profile for credentials.

use std::future::Future;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::debug;

use rootsize_core::VolumeTarget;

use crate::error::{ExecutorError, ExecutorResult};

/// State of an EBS volume modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationState {
    Modifying,
    /// New size is usable; performance is still being tuned.
    Optimizing,
    Completed,
    Failed,
}

impl ModificationState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "modifying" => Some(ModificationState::Modifying),
            "optimizing" => Some(ModificationState::Optimizing),
            "completed" => Some(ModificationState::Completed),
            "failed" => Some(ModificationState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationState::Modifying => "modifying",
            ModificationState::Optimizing => "optimizing",
            ModificationState::Completed => "completed",
            ModificationState::Failed => "failed",
        }
    }
}

/// The latest modification the provider knows about for a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modification {
    pub state: ModificationState,
    pub target_size_gib: u64,
}

/// Live view of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStatus {
    pub size_gib: u64,
    pub modification: Option<Modification>,
}

/// Where a volume stands relative to a target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
    Failed,
}

impl VolumeStatus {
    pub fn readiness(&self, target_gib: u64) -> Readiness {
        match self.modification {
            Some(m) if m.state == ModificationState::Failed && m.target_size_gib >= target_gib => {
                Readiness::Failed
            }
            Some(m) if m.state == ModificationState::Modifying => Readiness::Pending,
            _ if self.size_gib >= target_gib => Readiness::Ready,
            _ => Readiness::Pending,
        }
    }

    /// A modification to at least `target_gib` is already underway.
    pub fn in_flight_to(&self, target_gib: u64) -> bool {
        matches!(
            self.modification,
            Some(Modification {
                state: ModificationState::Modifying | ModificationState::Optimizing,
                target_size_gib,
            }) if target_size_gib >= target_gib
        )
    }

    pub fn state_label(&self) -> String {
        match self.modification {
            Some(m) => format!("{} to {} GiB, size {} GiB", m.state.as_str(), m.target_size_gib, self.size_gib),
            None => format!("size {} GiB", self.size_gib),
        }
    }
}

/// Provider operations the executor needs.
pub trait VolumeApi {
    fn describe_volume(
        &self,
        volume_id: &str,
    ) -> impl Future<Output = ExecutorResult<VolumeStatus>> + Send;

    /// Request an online grow. Returns once the provider accepted it.
    fn grow_volume(
        &self,
        volume_id: &str,
        target: &VolumeTarget,
    ) -> impl Future<Output = ExecutorResult<()>> + Send;
}

/// `VolumeApi` backed by the `aws` command line.
#[derive(Debug, Clone)]
pub struct AwsCliVolumeApi {
    program: String,
    region: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumesOutput {
    volumes: Vec<VolumeEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeEntry {
    size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeModificationsOutput {
    volumes_modifications: Vec<ModificationEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModificationEntry {
    modification_state: String,
    target_size: u64,
}

impl AwsCliVolumeApi {
    pub fn new(program: &str, region: Option<&str>) -> Self {
        Self {
            program: program.to_string(),
            region: region.map(str::to_string),
        }
    }

    async fn ec2(&self, args: &[String]) -> anyhow::Result<std::process::Output> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("ec2").args(args).arg("--output").arg("json");
        if let Some(region) = &self.region {
            cmd.arg("--region").arg(region);
        }
        // The run deadline drops this future; take the child down with it.
        cmd.kill_on_drop(true);

        debug!("Running: {:?}", cmd);

        cmd.output()
            .await
            .with_context(|| format!("failed to execute {}", self.program))
    }

    async fn describe(&self, volume_id: &str) -> anyhow::Result<VolumeStatus> {
        let output = self
            .ec2(&["describe-volumes".to_string(), "--volume-ids".to_string(), volume_id.to_string()])
            .await?;
        if !output.status.success() {
            bail!(
                "describe-volumes {volume_id} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let size_gib = parse_volume_size(&output.stdout)?;

        let output = self
            .ec2(&[
                "describe-volumes-modifications".to_string(),
                "--volume-ids".to_string(),
                volume_id.to_string(),
            ])
            .await?;
        let modification = if output.status.success() {
            parse_modification(&output.stdout)?
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A volume that was never modified has no modification record.
            if stderr.contains("InvalidVolumeModification.NotFound") {
                None
            } else {
                bail!("describe-volumes-modifications {volume_id} failed: {}", stderr.trim());
            }
        };

        Ok(VolumeStatus {
            size_gib,
            modification,
        })
    }

    async fn modify(&self, volume_id: &str, target: &VolumeTarget) -> anyhow::Result<()> {
        let mut args = vec![
            "modify-volume".to_string(),
            "--volume-id".to_string(),
            volume_id.to_string(),
            "--size".to_string(),
            target.size_gib.to_string(),
        ];
        if let Some(iops) = target.iops {
            args.push("--iops".to_string());
            args.push(iops.to_string());
        }
        if let Some(mbps) = target.throughput_mbps {
            args.push("--throughput".to_string());
            args.push(mbps.to_string());
        }

        let output = self.ec2(&args).await?;
        if !output.status.success() {
            bail!(
                "modify-volume {volume_id} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl VolumeApi for AwsCliVolumeApi {
    async fn describe_volume(&self, volume_id: &str) -> ExecutorResult<VolumeStatus> {
        self.describe(volume_id)
            .await
            .map_err(|e| ExecutorError::Provider(format!("{e:#}")))
    }

    async fn grow_volume(&self, volume_id: &str, target: &VolumeTarget) -> ExecutorResult<()> {
        self.modify(volume_id, target)
            .await
            .map_err(|e| ExecutorError::Provider(format!("{e:#}")))
    }
}

fn parse_volume_size(stdout: &[u8]) -> anyhow::Result<u64> {
    let parsed: DescribeVolumesOutput =
        serde_json::from_slice(stdout).context("unexpected describe-volumes output")?;
    parsed
        .volumes
        .first()
        .map(|v| v.size)
        .context("describe-volumes returned no volume")
}

fn parse_modification(stdout: &[u8]) -> anyhow::Result<Option<Modification>> {
    let parsed: DescribeModificationsOutput = serde_json::from_slice(stdout)
        .context("unexpected describe-volumes-modifications output")?;
    let Some(entry) = parsed.volumes_modifications.first() else {
        return Ok(None);
    };
    let state = ModificationState::parse(&entry.modification_state)
        .with_context(|| format!("unknown modification state {:?}", entry.modification_state))?;
    Ok(Some(Modification {
        state,
        target_size_gib: entry.target_size,
    }))
}

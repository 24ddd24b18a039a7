//! Online root filesystem extend.
//!
//! Pipeline:
//! 1. Locate the root mount's source and type with `findmnt`
//! 2. If the source is a partition of the root device, `growpart` it
//! 3. Grow the filesystem in place: `resize2fs` (ext2/3/4) or `xfs_growfs` (xfs)
//!
//! Every step is a no-op when there is nothing to grow, so the whole
//! sequence can be repeated safely.

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::{debug, info};

use crate::error::{ExecutorError, ExecutorResult};

const SECTOR_BYTES: u64 = 512;
const GIB: u64 = 1024 * 1024 * 1024;

/// Share of the container a filesystem may keep for its own metadata before
/// we consider it un-grown.
const FS_OVERHEAD_SLACK_PERCENT: u64 = 3;

/// Local OS operations on the root filesystem.
pub trait FilesystemExtender {
    /// Whole GiB of space on `device` the root filesystem does not cover yet.
    fn pending_growth_gib(&self, device: &str) -> impl Future<Output = ExecutorResult<u64>> + Send;

    /// Grow the root partition and filesystem to fill `device`.
    fn extend_filesystem(&self, device: &str) -> impl Future<Output = ExecutorResult<()>> + Send;
}

/// `FilesystemExtender` using cloud-utils `growpart` and the filesystem's
/// own grow tool.
#[derive(Debug, Clone)]
pub struct GrowpartExtender {
    mount_point: PathBuf,
    sysfs_root: PathBuf,
}

/// Source and type of a mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountInfo {
    source: String,
    fstype: String,
}

impl GrowpartExtender {
    pub fn new(mount_point: impl Into<PathBuf>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    async fn mount_info(&self) -> anyhow::Result<MountInfo> {
        let stdout = run("findmnt", &[
            OsStr::new("-n"),
            OsStr::new("-o"),
            OsStr::new("SOURCE,FSTYPE"),
            OsStr::new("--target"),
            self.mount_point.as_os_str(),
        ])
        .await?;
        parse_findmnt(&stdout)
    }

    async fn filesystem_bytes(&self) -> anyhow::Result<u64> {
        let stdout = run("df", &[
            OsStr::new("--block-size=1"),
            OsStr::new("--output=size"),
            self.mount_point.as_os_str(),
        ])
        .await?;
        parse_df_size(&stdout)
    }

    fn sectors(&self, name: &str, attr: &str) -> anyhow::Result<u64> {
        let path = self.sysfs_root.join("class").join("block").join(name).join(attr);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        raw.trim()
            .parse()
            .with_context(|| format!("{} is not a number", path.display()))
    }

    async fn pending(&self, device: &str) -> anyhow::Result<u64> {
        let disk_sectors = self.sectors(device_name(device), "size")?;
        let mount = self.mount_info().await?;

        let (partition_gap, container_bytes) = if mount.source == device {
            (0, disk_sectors * SECTOR_BYTES)
        } else {
            let part = device_name(&mount.source);
            let start = self.sectors(part, "start")?;
            let size = self.sectors(part, "size")?;
            (partition_gap_gib(disk_sectors, start, size), size * SECTOR_BYTES)
        };

        let fs_bytes = self.filesystem_bytes().await?;
        let fs_gap = filesystem_gap_gib(container_bytes, fs_bytes);
        debug!(%device, source = %mount.source, partition_gap, fs_gap, "root filesystem growth check");
        Ok(partition_gap + fs_gap)
    }

    async fn extend(&self, device: &str) -> anyhow::Result<()> {
        let mount = self.mount_info().await?;

        if mount.source != device {
            let part = device_name(&mount.source);
            let number = self.sectors(part, "partition")?.to_string();
            grow_partition(device, &number).await?;
        }

        match mount.fstype.as_str() {
            "ext2" | "ext3" | "ext4" => {
                run("resize2fs", &[OsStr::new(&mount.source)]).await?;
            }
            "xfs" => {
                run("xfs_growfs", &[OsStr::new("-d"), self.mount_point.as_os_str()]).await?;
            }
            other => bail!("unsupported root filesystem type {other:?}"),
        }

        info!(%device, source = %mount.source, fstype = %mount.fstype, "root filesystem extended");
        Ok(())
    }
}

impl FilesystemExtender for GrowpartExtender {
    async fn pending_growth_gib(&self, device: &str) -> ExecutorResult<u64> {
        self.pending(device).await.map_err(|e| ExecutorError::FilesystemExtend {
            device: device.to_string(),
            reason: format!("{e:#}"),
        })
    }

    async fn extend_filesystem(&self, device: &str) -> ExecutorResult<()> {
        self.extend(device).await.map_err(|e| ExecutorError::FilesystemExtend {
            device: device.to_string(),
            reason: format!("{e:#}"),
        })
    }
}

/// `growpart` exits 1 with `NOCHANGE` when the partition already fills the disk.
async fn grow_partition(device: &str, number: &str) -> anyhow::Result<()> {
    let output = tokio::process::Command::new("growpart")
        .arg(device)
        .arg(number)
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to execute growpart")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        debug!(%device, partition = %number, "partition grown");
        Ok(())
    } else if stdout.contains("NOCHANGE") {
        debug!(%device, partition = %number, "partition already fills device");
        Ok(())
    } else {
        bail!(
            "growpart {device} {number} failed: {}{}",
            stdout.trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}

async fn run(program: &str, args: &[&OsStr]) -> anyhow::Result<String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).kill_on_drop(true);

    debug!("Running: {:?}", cmd);

    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to execute {program}"))?;
    if !output.status.success() {
        bail!(
            "{program} failed (exit code: {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn device_name(device: &str) -> &str {
    Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(device)
}

fn parse_findmnt(stdout: &str) -> anyhow::Result<MountInfo> {
    let mut fields = stdout.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(source), Some(fstype)) => Ok(MountInfo {
            source: source.to_string(),
            fstype: fstype.to_string(),
        }),
        _ => bail!("unexpected findmnt output {stdout:?}"),
    }
}

/// `df --output=size` prints a header line, then the size.
fn parse_df_size(stdout: &str) -> anyhow::Result<u64> {
    stdout
        .lines()
        .nth(1)
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("unexpected df output {stdout:?}"))
}

/// Unpartitioned space after the root partition, in whole GiB.
fn partition_gap_gib(disk_sectors: u64, start: u64, size: u64) -> u64 {
    disk_sectors.saturating_sub(start + size) * SECTOR_BYTES / GIB
}

/// Space inside the partition the filesystem does not use, beyond metadata slack.
fn filesystem_gap_gib(container_bytes: u64, fs_bytes: u64) -> u64 {
    let slack = container_bytes * FS_OVERHEAD_SLACK_PERCENT / 100;
    container_bytes.saturating_sub(fs_bytes).saturating_sub(slack) / GIB
}

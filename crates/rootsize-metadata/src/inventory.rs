//! Block-device inventory from sysfs.
//!
//! On Nitro instances every disk is an NVMe controller and the controller
//! model tells EBS volumes apart from instance storage. EBS controllers also
//! carry the volume id in their serial number (`vol0abc…` for `vol-0abc…`).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use rootsize_core::VolumeId;

use crate::error::MetadataError;

pub const EBS_MODEL: &str = "Amazon Elastic Block Store";
pub const INSTANCE_STORE_MODEL: &str = "Amazon EC2 NVMe Instance Storage";

const SECTOR_BYTES: u64 = 512;
const GIB: u64 = 1024 * 1024 * 1024;

/// What kind of disk a device is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    LocalEphemeral,
    Ebs { volume_id: VolumeId },
    Other { model: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub device_path: String,
    pub kind: DeviceKind,
    pub size_gib: u64,
}

/// Source of the attached block devices.
pub trait BlockInventory {
    /// Devices ordered by device path.
    fn devices(&self) -> Result<Vec<DiscoveredDevice>, MetadataError>;
}

/// Reads `<sysfs_root>/block/*`.
#[derive(Debug, Clone)]
pub struct SysfsInventory {
    sysfs_root: PathBuf,
}

impl SysfsInventory {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    fn read_device(&self, dir: &Path, name: &str) -> Result<Option<DiscoveredDevice>, MetadataError> {
        let model_path = dir.join("device").join("model");
        // Virtual devices (loop, ram, zram) have no controller model.
        if !model_path.is_file() {
            return Ok(None);
        }

        let model = read_attr(&model_path)?;
        let sectors: u64 = read_attr(&dir.join("size"))?.parse().map_err(|_| {
            MetadataError::Malformed(format!("{}: size is not a sector count", dir.display()))
        })?;

        let kind = match model.as_str() {
            INSTANCE_STORE_MODEL => DeviceKind::LocalEphemeral,
            EBS_MODEL => {
                let serial = read_attr(&dir.join("device").join("serial"))?;
                DeviceKind::Ebs {
                    volume_id: volume_id_from_serial(&serial)?,
                }
            }
            _ => DeviceKind::Other { model },
        };

        Ok(Some(DiscoveredDevice {
            device_path: format!("/dev/{name}"),
            kind,
            size_gib: sectors * SECTOR_BYTES / GIB,
        }))
    }
}

impl BlockInventory for SysfsInventory {
    fn devices(&self) -> Result<Vec<DiscoveredDevice>, MetadataError> {
        let block_dir = self.sysfs_root.join("block");
        let entries = fs::read_dir(&block_dir).map_err(|e| {
            MetadataError::Malformed(format!("cannot list {}: {e}", block_dir.display()))
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MetadataError::Malformed(format!("cannot list {}: {e}", block_dir.display()))
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(device) = self.read_device(&entry.path(), &name)? {
                debug!(device = %device.device_path, kind = ?device.kind, size_gib = device.size_gib, "block device");
                devices.push(device);
            }
        }

        devices.sort_by(|a, b| a.device_path.cmp(&b.device_path));
        Ok(devices)
    }
}

fn read_attr(path: &Path) -> Result<String, MetadataError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| MetadataError::Malformed(format!("cannot read {}: {e}", path.display())))
}

/// `vol0123abcd` → `vol-0123abcd`. Serials already in dashed form pass through.
pub fn volume_id_from_serial(serial: &str) -> Result<VolumeId, MetadataError> {
    let serial = serial.trim();
    if serial.starts_with("vol-") {
        return Ok(serial.to_string());
    }
    match serial.strip_prefix("vol") {
        Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            Ok(format!("vol-{hex}"))
        }
        _ => Err(MetadataError::Malformed(format!(
            "EBS serial {serial:?} does not carry a volume id"
        ))),
    }
}

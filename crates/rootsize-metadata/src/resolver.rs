//! Instance metadata resolver.
//!
//! Combines the metadata source and block inventory into one immutable
//! `InstanceDescriptor`, retrying transient metadata failures.

use std::future::Future;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use rootsize_core::config::MetadataConfig;
use rootsize_core::{Backoff, BlockDevice, InstanceDescriptor, InstanceId};

use crate::error::{FetchError, MetadataError};
use crate::imds::MetadataSource;
use crate::inventory::{BlockInventory, DeviceKind};

pub struct Resolver<M, B> {
    source: M,
    inventory: B,
    root_device: String,
    attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    /// First identity the source reported; later calls reuse it.
    reported_id: OnceCell<InstanceId>,
}

impl<M: MetadataSource, B: BlockInventory> Resolver<M, B> {
    pub fn new(source: M, inventory: B, root_device: &str, config: &MetadataConfig) -> Self {
        Self {
            source,
            inventory,
            root_device: root_device.to_string(),
            attempts: config.attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            reported_id: OnceCell::new(),
        }
    }

    /// Identity of the running instance, as reported by the environment.
    pub async fn instance_id(&self) -> Result<InstanceId, MetadataError> {
        self.reported_id
            .get_or_try_init(|| async {
                let id = self.with_retry("instance-id", || self.source.instance_id()).await?;
                if !id.starts_with("i-") || id.len() < 3 {
                    return Err(MetadataError::Malformed(format!("instance id {id:?}")));
                }
                Ok(id)
            })
            .await
            .cloned()
    }

    /// Build the descriptor for `instance_id`.
    pub async fn resolve(&self, instance_id: &str) -> Result<InstanceDescriptor, MetadataError> {
        let reported = self.instance_id().await?;
        if reported != instance_id {
            return Err(MetadataError::Malformed(format!(
                "metadata describes {reported}, expected {instance_id}"
            )));
        }

        let instance_type = self
            .with_retry("instance-type", || self.source.instance_type())
            .await?;
        validate_instance_type(&instance_type)?;

        let devices = self.inventory.devices()?;
        let root = devices
            .iter()
            .find(|d| d.device_path == self.root_device)
            .ok_or_else(|| {
                MetadataError::Malformed(format!("root device {} not found", self.root_device))
            })?;
        let root_volume_id = match &root.kind {
            DeviceKind::Ebs { volume_id } => volume_id.clone(),
            other => {
                return Err(MetadataError::Malformed(format!(
                    "root device {} is not an EBS volume ({other:?})",
                    self.root_device
                )));
            }
        };

        let attached_local_disks = devices
            .iter()
            .map(|d| BlockDevice {
                device_path: d.device_path.clone(),
                is_local_ephemeral: d.kind == DeviceKind::LocalEphemeral,
                size_gib: d.size_gib,
            })
            .collect::<Vec<_>>();

        info!(
            instance = %instance_id,
            %instance_type,
            root_volume = %root_volume_id,
            disks = attached_local_disks.len(),
            "instance resolved"
        );

        Ok(InstanceDescriptor {
            instance_id: instance_id.to_string(),
            instance_type,
            attached_local_disks,
            root_volume_id,
            root_device: self.root_device.clone(),
        })
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, MetadataError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut backoff = Backoff::new(self.initial_backoff, self.max_backoff);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%what, attempt, "metadata read succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(FetchError::Malformed(reason)) => {
                    return Err(MetadataError::Malformed(format!("{what}: {reason}")));
                }
                Err(FetchError::Transient(reason)) => {
                    if attempt >= self.attempts {
                        return Err(MetadataError::Unavailable {
                            attempts: attempt,
                            reason: format!("{what}: {reason}"),
                        });
                    }
                    let delay = backoff.next_delay();
                    warn!(%what, attempt, error = %reason, delay_ms = delay.as_millis() as u64, "metadata read failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Instance types look like `family.size`, e.g. `c6i.2xlarge`, `u-6tb1.metal`.
fn validate_instance_type(instance_type: &str) -> Result<(), MetadataError> {
    let valid_part = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    };
    match instance_type.split_once('.') {
        Some((family, size)) if valid_part(family) && valid_part(size) => Ok(()),
        _ => Err(MetadataError::Malformed(format!(
            "instance type {instance_type:?} is not family.size"
        ))),
    }
}

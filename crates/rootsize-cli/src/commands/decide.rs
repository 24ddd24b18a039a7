use std::path::Path;

use anyhow::Context;

use rootsize_core::{BlockDevice, InstanceDescriptor, ResizeDecision, RootsizeConfig};
use rootsize_policy::RuleTable;

pub fn decide(
    instance_type: &str,
    local_disk: bool,
    config: Option<&Path>,
    format: &str,
) -> anyhow::Result<()> {
    let config = RootsizeConfig::load(config)?;
    let decision = decision_for(&config, instance_type, local_disk)?;
    println!("{}", render(instance_type, &decision, format)?);
    Ok(())
}

fn render(instance_type: &str, decision: &ResizeDecision, format: &str) -> anyhow::Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(decision)?),
        "text" => Ok(format!("{instance_type}: {decision}")),
        other => anyhow::bail!("unknown output format {other:?} (expected text or json)"),
    }
}

fn decision_for(
    config: &RootsizeConfig,
    instance_type: &str,
    local_disk: bool,
) -> anyhow::Result<ResizeDecision> {
    let rules = config.effective_rules()?;
    let table = RuleTable::new(&rules).context("invalid sizing table")?;

    let mut attached_local_disks = vec![BlockDevice {
        device_path: config.root_device.clone(),
        is_local_ephemeral: false,
        size_gib: 0,
    }];
    if local_disk {
        attached_local_disks.push(BlockDevice {
            device_path: "/dev/nvme1n1".to_string(),
            is_local_ephemeral: true,
            size_gib: 0,
        });
    }

    let descriptor = InstanceDescriptor {
        instance_id: String::new(),
        instance_type: instance_type.trim().to_ascii_lowercase(),
        attached_local_disks,
        root_volume_id: String::new(),
        root_device: config.root_device.clone(),
    };
    Ok(rootsize_policy::decide(&descriptor, &table))
}

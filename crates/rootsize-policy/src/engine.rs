//! The resize decision.

use tracing::debug;

use rootsize_core::{InstanceDescriptor, ResizeDecision, SkipReason};

use crate::rules::RuleTable;

/// Map an instance snapshot to exactly one decision.
///
/// Local instance storage always wins over the table: those nodes keep
/// kubelet, containerd and logs on NVMe, so the EBS root stays at its
/// launch size.
pub fn decide(descriptor: &InstanceDescriptor, rules: &RuleTable) -> ResizeDecision {
    if let Some(disk) = descriptor
        .attached_local_disks
        .iter()
        .find(|d| d.is_local_ephemeral)
    {
        debug!(
            instance_type = %descriptor.instance_type,
            device = %disk.device_path,
            "local instance storage present"
        );
        return ResizeDecision::skip(SkipReason::LocalEphemeralPresent);
    }

    match rules.lookup(&descriptor.instance_type) {
        Some(rule) => {
            debug!(
                instance_type = %descriptor.instance_type,
                rule = %rule.pattern,
                size_gib = rule.target.size_gib,
                "sizing rule matched"
            );
            ResizeDecision::Resize {
                target: rule.target,
                rule: rule.pattern.clone(),
            }
        }
        None => {
            debug!(instance_type = %descriptor.instance_type, "no sizing rule");
            ResizeDecision::skip(SkipReason::NoMatchingRule)
        }
    }
}

use std::path::Path;

use tracing::warn;

use rootsize_bootstrap::{
    BootstrapError, JsonLinesSink, Orchestrator, OutcomeRecord, OutcomeSink, TracingSink,
};
use rootsize_core::RootsizeConfig;
use rootsize_executor::{AwsCliVolumeApi, GrowpartExtender, PollConfig, ResizeExecutor};
use rootsize_metadata::{ImdsClient, Resolver, SysfsInventory};

/// Full bootstrap run. Returns the process exit code.
pub async fn run(config_path: Option<&Path>, dry_run: bool) -> u8 {
    let config = match RootsizeConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => return startup_failure(e.into(), dry_run),
    };
    let rules = match config.effective_rules() {
        Ok(rules) => rules,
        Err(e) => return startup_failure(e.into(), dry_run),
    };

    let resolver = Resolver::new(
        ImdsClient::new(&config.metadata),
        SysfsInventory::new(config.sysfs_root.clone()),
        &config.root_device,
        &config.metadata,
    );
    let executor = ResizeExecutor::new(
        AwsCliVolumeApi::new(&config.resize.aws_cli, config.resize.region.as_deref()),
        GrowpartExtender::new(config.root_mount.clone(), config.sysfs_root.clone()),
        &config.root_device,
        PollConfig::from(&config.resize),
    );

    let mut orchestrator = Orchestrator::new(resolver, executor, rules, config.resize.timeout)
        .dry_run(dry_run)
        .with_sink(TracingSink);
    if let Some(path) = &config.log.record_path {
        orchestrator = orchestrator.with_sink(JsonLinesSink::new(path));
    }

    orchestrator.run().await.exit_code()
}

/// The orchestrator never got built; still emit the one record.
fn startup_failure(err: BootstrapError, dry_run: bool) -> u8 {
    let kind = err.kind();
    let record = OutcomeRecord {
        dry_run,
        exit_code: kind.exit_code(),
        failure: Some(kind),
        error: Some(err.to_string()),
        ..OutcomeRecord::default()
    };
    if let Err(e) = TracingSink.emit(&record) {
        warn!(error = %e, "failed to write outcome record");
    }
    kind.exit_code()
}

//! Bootstrap orchestrator: drives one run through its phases.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use rootsize_core::{FailureKind, SkipReason, VolumeSizingRule};
use rootsize_executor::{FilesystemExtender, ResizeExecutor, VolumeApi};
use rootsize_metadata::{BlockInventory, MetadataError, MetadataSource, Resolver};
use rootsize_policy::{RuleTable, decide};

use crate::error::BootstrapError;
use crate::record::{OutcomeRecord, OutcomeSink};

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Resolving,
    Deciding,
    Skipping,
    Resizing,
    Done,
    Failed(FailureKind),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Start => f.write_str("start"),
            Phase::Resolving => f.write_str("resolving"),
            Phase::Deciding => f.write_str("deciding"),
            Phase::Skipping => f.write_str("skipping"),
            Phase::Resizing => f.write_str("resizing"),
            Phase::Done => f.write_str("done"),
            Phase::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub phase: Phase,
    pub record: OutcomeRecord,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.record.exit_code
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self.phase {
            Phase::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Phase tracking plus the record being filled in.
struct RunState {
    phase: Phase,
    record: OutcomeRecord,
}

impl RunState {
    fn enter(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }
}

/// Sequences resolver, policy and executor for a single boot.
pub struct Orchestrator<M, B, V, F> {
    resolver: Resolver<M, B>,
    executor: ResizeExecutor<V, F>,
    rules: Vec<VolumeSizingRule>,
    timeout: Duration,
    dry_run: bool,
    sinks: Vec<Box<dyn OutcomeSink>>,
}

impl<M, B, V, F> Orchestrator<M, B, V, F>
where
    M: MetadataSource,
    B: BlockInventory,
    V: VolumeApi,
    F: FilesystemExtender,
{
    /// `timeout` bounds the whole run, metadata included.
    pub fn new(
        resolver: Resolver<M, B>,
        executor: ResizeExecutor<V, F>,
        rules: Vec<VolumeSizingRule>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            executor,
            rules,
            timeout,
            dry_run: false,
            sinks: Vec::new(),
        }
    }

    /// Resolve and decide, but never touch the volume.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_sink(mut self, sink: impl OutcomeSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Run once and report. Never panics on a failed step; the failure is
    /// in the report and the record.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut state = RunState {
            phase: Phase::Start,
            record: OutcomeRecord {
                dry_run: self.dry_run,
                ..OutcomeRecord::default()
            },
        };

        match self.drive(&mut state, deadline).await {
            Ok(()) => state.enter(Phase::Done),
            Err(e) => {
                let kind = e.kind();
                error!(phase = %state.phase, failure = %kind, error = %e, "bootstrap failed");
                state.record.failure = Some(kind);
                state.record.error = Some(e.to_string());
                state.record.exit_code = kind.exit_code();
                state.enter(Phase::Failed(kind));
            }
        }
        state.record.duration_ms = started.elapsed().as_millis() as u64;

        for sink in &self.sinks {
            if let Err(e) = sink.emit(&state.record) {
                warn!(error = %e, "failed to write outcome record");
            }
        }

        RunReport {
            phase: state.phase,
            record: state.record,
        }
    }

    async fn drive(&self, state: &mut RunState, deadline: Instant) -> Result<(), BootstrapError> {
        // An ambiguous table fails the run before anything is queried.
        let table = RuleTable::new(&self.rules)?;

        state.enter(Phase::Resolving);
        let instance_id = self.metadata_before(deadline, self.resolver.instance_id()).await?;
        state.record.instance_id = Some(instance_id.clone());

        let descriptor = self
            .metadata_before(deadline, self.resolver.resolve(&instance_id))
            .await?;
        state.record.instance_type = Some(descriptor.instance_type.clone());
        state.record.volume_id = Some(descriptor.root_volume_id.clone());

        state.enter(Phase::Deciding);
        let decision = decide(&descriptor, &table);
        state.record.decision = Some(decision.clone());
        state.record.skip_reason = decision.skip_reason();

        if let Some(reason) = decision.skip_reason() {
            state.enter(Phase::Skipping);
            match reason {
                SkipReason::NoMatchingRule => warn!(
                    instance_type = %descriptor.instance_type,
                    "no sizing rule for instance type, root volume left at launch size"
                ),
                SkipReason::LocalEphemeralPresent => info!(
                    instance_type = %descriptor.instance_type,
                    "local instance storage present, root volume left at launch size"
                ),
            }
            return Ok(());
        }

        if self.dry_run {
            info!(
                instance_type = %descriptor.instance_type,
                volume = %descriptor.root_volume_id,
                %decision,
                "dry run, volume not modified"
            );
            return Ok(());
        }

        state.enter(Phase::Resizing);
        let current = self
            .executor
            .current_size_gib(&descriptor.root_volume_id, deadline)
            .await?;
        let result = self
            .executor
            .apply(&descriptor.root_volume_id, current, &decision, deadline)
            .await?;
        state.record.outcome = Some(result);
        Ok(())
    }

    async fn metadata_before<T>(
        &self,
        deadline: Instant,
        fut: impl Future<Output = Result<T, MetadataError>>,
    ) -> Result<T, BootstrapError> {
        let started = Instant::now();
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BootstrapError::MetadataDeadline {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

//! Resize executor: grow, wait, extend.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use rootsize_core::config::ResizeConfig;
use rootsize_core::{ApplyResult, Backoff, ResizeDecision, ResizeOutcome, VolumeTarget};

use crate::error::{ExecutorError, ExecutorResult};
use crate::filesystem::FilesystemExtender;
use crate::provider::{Readiness, VolumeApi, VolumeStatus};

/// Backoff bounds for the modification poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(30),
        }
    }
}

impl From<&ResizeConfig> for PollConfig {
    fn from(config: &ResizeConfig) -> Self {
        Self {
            initial: config.poll_initial,
            max: config.poll_max,
        }
    }
}

/// Applies a `ResizeDecision` to the root volume.
///
/// Must not run concurrently against the same volume; node init ordering
/// guarantees a single bootstrap process.
pub struct ResizeExecutor<V, F> {
    volumes: V,
    filesystem: F,
    root_device: String,
    poll: PollConfig,
}

impl<V: VolumeApi, F: FilesystemExtender> ResizeExecutor<V, F> {
    pub fn new(volumes: V, filesystem: F, root_device: &str, poll: PollConfig) -> Self {
        Self {
            volumes,
            filesystem,
            root_device: root_device.to_string(),
            poll,
        }
    }

    pub fn volumes(&self) -> &V {
        &self.volumes
    }

    pub fn filesystem(&self) -> &F {
        &self.filesystem
    }

    /// Live size of the volume as the provider reports it.
    pub async fn current_size_gib(&self, volume_id: &str, deadline: Instant) -> ExecutorResult<u64> {
        let status = self
            .before_deadline(volume_id, 0, deadline, self.volumes.describe_volume(volume_id))
            .await?;
        Ok(status.size_gib)
    }

    /// Apply `decision` to `volume_id`, whose live size is `current_size_gib`.
    pub async fn apply(
        &self,
        volume_id: &str,
        current_size_gib: u64,
        decision: &ResizeDecision,
        deadline: Instant,
    ) -> ExecutorResult<ApplyResult> {
        let target = match decision {
            ResizeDecision::Skip { reason } => {
                debug!(volume = %volume_id, %reason, "skip: volume left untouched");
                return Ok(ApplyResult::Noop);
            }
            ResizeDecision::Resize { target, .. } => *target,
        };
        let started = Instant::now();

        if target.size_gib <= current_size_gib {
            return self
                .settle_filesystem(volume_id, current_size_gib, target, started, deadline)
                .await;
        }

        let status = self
            .before_deadline(volume_id, target.size_gib, deadline, self.volumes.describe_volume(volume_id))
            .await?;

        if status.in_flight_to(target.size_gib) {
            info!(volume = %volume_id, state = %status.state_label(), "modification already in progress");
        } else {
            info!(
                volume = %volume_id,
                from = current_size_gib,
                to = target.size_gib,
                iops = ?target.iops,
                throughput_mbps = ?target.throughput_mbps,
                "growing volume"
            );
            self.before_deadline(
                volume_id,
                target.size_gib,
                deadline,
                self.volumes.grow_volume(volume_id, &target),
            )
            .await?;
        }

        let ready = self.wait_ready(volume_id, target.size_gib, deadline).await?;
        self.before_deadline(
            volume_id,
            target.size_gib,
            deadline,
            self.filesystem.extend_filesystem(&self.root_device),
        )
        .await?;

        let outcome = ResizeOutcome {
            previous_size_gib: current_size_gib,
            new_size_gib: ready.size_gib,
            filesystem_grown: true,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            volume = %volume_id,
            from = outcome.previous_size_gib,
            to = outcome.new_size_gib,
            duration_ms = outcome.duration_ms,
            "volume resized"
        );
        Ok(ApplyResult::Applied(outcome))
    }

    /// The provider already reports the target size. Finish an interrupted
    /// earlier run: wait out a modification still in progress, then extend
    /// the filesystem if it lags the device. Never issues a grow.
    async fn settle_filesystem(
        &self,
        volume_id: &str,
        current_size_gib: u64,
        target: VolumeTarget,
        started: Instant,
        deadline: Instant,
    ) -> ExecutorResult<ApplyResult> {
        let status = self
            .before_deadline(volume_id, target.size_gib, deadline, self.volumes.describe_volume(volume_id))
            .await?;

        let (size_gib, waited) = match status.readiness(target.size_gib) {
            Readiness::Ready => (current_size_gib.max(status.size_gib), false),
            Readiness::Failed => {
                return Err(ExecutorError::ModificationFailed {
                    volume_id: volume_id.to_string(),
                    detail: status.state_label(),
                });
            }
            Readiness::Pending => {
                info!(
                    volume = %volume_id,
                    state = %status.state_label(),
                    "modification from an earlier run still in progress"
                );
                let ready = self.wait_ready(volume_id, target.size_gib, deadline).await?;
                (ready.size_gib, true)
            }
        };

        // After waiting on the provider the kernel may not show the new size
        // yet, so extend without measuring.
        if !waited {
            let measured = self
                .before_deadline(
                    volume_id,
                    target.size_gib,
                    deadline,
                    self.filesystem.pending_growth_gib(&self.root_device),
                )
                .await;
            match measured {
                Ok(0) => {
                    debug!(
                        volume = %volume_id,
                        current = current_size_gib,
                        target = target.size_gib,
                        "volume already at or above target"
                    );
                    return Ok(ApplyResult::Noop);
                }
                Ok(pending) => {
                    info!(
                        volume = %volume_id,
                        device = %self.root_device,
                        pending_gib = pending,
                        "filesystem smaller than volume, extending"
                    );
                }
                Err(e) => {
                    warn!(
                        volume = %volume_id,
                        device = %self.root_device,
                        error = %e,
                        "cannot measure root filesystem growth, leaving it as is"
                    );
                    return Ok(ApplyResult::Noop);
                }
            }
        }

        self.before_deadline(
            volume_id,
            target.size_gib,
            deadline,
            self.filesystem.extend_filesystem(&self.root_device),
        )
        .await?;

        Ok(ApplyResult::Applied(ResizeOutcome {
            previous_size_gib: current_size_gib,
            new_size_gib: size_gib,
            filesystem_grown: true,
            duration_ms: started.elapsed().as_millis() as u64,
        }))
    }

    /// Poll until the provider reports `target_gib` usable.
    async fn wait_ready(
        &self,
        volume_id: &str,
        target_gib: u64,
        deadline: Instant,
    ) -> ExecutorResult<VolumeStatus> {
        let mut backoff = Backoff::new(self.poll.initial, self.poll.max);
        let started = Instant::now();

        loop {
            let status = self
                .before_deadline(volume_id, target_gib, deadline, self.volumes.describe_volume(volume_id))
                .await?;

            match status.readiness(target_gib) {
                Readiness::Ready => {
                    debug!(volume = %volume_id, state = %status.state_label(), "volume ready");
                    return Ok(status);
                }
                Readiness::Failed => {
                    return Err(ExecutorError::ModificationFailed {
                        volume_id: volume_id.to_string(),
                        detail: status.state_label(),
                    });
                }
                Readiness::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExecutorError::ResizeTimeout {
                    volume_id: volume_id.to_string(),
                    target_gib,
                    waited_ms: started.elapsed().as_millis() as u64,
                    last_state: status.state_label(),
                });
            }

            let delay = backoff.next_delay();
            debug!(
                volume = %volume_id,
                state = %status.state_label(),
                delay_ms = delay.as_millis() as u64,
                "waiting for volume modification"
            );
            tokio::time::sleep_until((now + delay).min(deadline)).await;
        }
    }

    async fn before_deadline<T>(
        &self,
        volume_id: &str,
        target_gib: u64,
        deadline: Instant,
        fut: impl Future<Output = ExecutorResult<T>>,
    ) -> ExecutorResult<T> {
        let started = Instant::now();
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::ResizeTimeout {
                volume_id: volume_id.to_string(),
                target_gib,
                waited_ms: started.elapsed().as_millis() as u64,
                last_state: "call interrupted by deadline".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use rootsize_core::{FailureKind, SkipReason};

    use crate::provider::{Modification, ModificationState};

    /// In-memory volume: a grow becomes usable after `polls_until_ready` describes.
    #[derive(Default)]
    struct FakeVolumes {
        inner: Mutex<FakeVolumeState>,
    }

    #[derive(Default)]
    struct FakeVolumeState {
        size_gib: u64,
        modification: Option<Modification>,
        polls_until_ready: u32,
        never_ready: bool,
        fail_modification: bool,
        grow_calls: Vec<VolumeTarget>,
        describe_calls: u32,
    }

    impl FakeVolumes {
        fn with_size(size_gib: u64) -> Self {
            Self {
                inner: Mutex::new(FakeVolumeState {
                    size_gib,
                    ..FakeVolumeState::default()
                }),
            }
        }

        fn grow_calls(&self) -> Vec<VolumeTarget> {
            self.inner.lock().unwrap().grow_calls.clone()
        }

        fn describe_calls(&self) -> u32 {
            self.inner.lock().unwrap().describe_calls
        }
    }

    impl VolumeApi for FakeVolumes {
        async fn describe_volume(&self, _volume_id: &str) -> ExecutorResult<VolumeStatus> {
            let mut s = self.inner.lock().unwrap();
            s.describe_calls += 1;
            if let Some(m) = s.modification
                && m.state == ModificationState::Modifying
                && !s.never_ready
            {
                if s.polls_until_ready == 0 {
                    let state = if s.fail_modification {
                        ModificationState::Failed
                    } else {
                        s.size_gib = m.target_size_gib;
                        ModificationState::Optimizing
                    };
                    s.modification = Some(Modification { state, ..m });
                } else {
                    s.polls_until_ready -= 1;
                }
            }
            Ok(VolumeStatus {
                size_gib: s.size_gib,
                modification: s.modification,
            })
        }

        async fn grow_volume(&self, _volume_id: &str, target: &VolumeTarget) -> ExecutorResult<()> {
            let mut s = self.inner.lock().unwrap();
            s.grow_calls.push(*target);
            s.modification = Some(Modification {
                state: ModificationState::Modifying,
                target_size_gib: target.size_gib,
            });
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFilesystem {
        pending_gib: Mutex<u64>,
        extend_calls: Mutex<u32>,
        fail_extend: bool,
        /// `findmnt`/`df`/sysfs unusable, e.g. a device-mapper root.
        fail_measure: bool,
    }

    impl FakeFilesystem {
        fn lagging(pending_gib: u64) -> Self {
            Self {
                pending_gib: Mutex::new(pending_gib),
                ..Self::default()
            }
        }

        fn extend_calls(&self) -> u32 {
            *self.extend_calls.lock().unwrap()
        }
    }

    impl FilesystemExtender for FakeFilesystem {
        async fn pending_growth_gib(&self, device: &str) -> ExecutorResult<u64> {
            if self.fail_measure {
                return Err(ExecutorError::FilesystemExtend {
                    device: device.to_string(),
                    reason: "cannot read /sys/class/block/dm-0/start".to_string(),
                });
            }
            Ok(*self.pending_gib.lock().unwrap())
        }

        async fn extend_filesystem(&self, device: &str) -> ExecutorResult<()> {
            *self.extend_calls.lock().unwrap() += 1;
            if self.fail_extend {
                return Err(ExecutorError::FilesystemExtend {
                    device: device.to_string(),
                    reason: "resize2fs: Device or resource busy".to_string(),
                });
            }
            *self.pending_gib.lock().unwrap() = 0;
            Ok(())
        }
    }

    fn executor(volumes: FakeVolumes, fs: FakeFilesystem) -> ResizeExecutor<FakeVolumes, FakeFilesystem> {
        ResizeExecutor::new(volumes, fs, "/dev/nvme0n1", PollConfig::default())
    }

    fn resize_to(size_gib: u64) -> ResizeDecision {
        ResizeDecision::Resize {
            target: VolumeTarget::size(size_gib),
            rule: "c6i.2xlarge".to_string(),
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(300)
    }

    #[tokio::test]
    async fn skip_makes_no_calls() {
        let exec = executor(FakeVolumes::with_size(20), FakeFilesystem::default());
        let decision = ResizeDecision::skip(SkipReason::LocalEphemeralPresent);

        let result = exec.apply("vol-0abc", 20, &decision, deadline()).await.unwrap();
        assert_eq!(result, ApplyResult::Noop);
        assert_eq!(exec.volumes().describe_calls(), 0);
        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test]
    async fn equal_or_smaller_target_is_noop() {
        let exec = executor(FakeVolumes::with_size(300), FakeFilesystem::default());

        for target in [300, 100] {
            let result = exec.apply("vol-0abc", 300, &resize_to(target), deadline()).await.unwrap();
            assert_eq!(result, ApplyResult::Noop);
        }
        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test]
    async fn unmeasurable_filesystem_is_left_alone() {
        let fs = FakeFilesystem {
            fail_measure: true,
            ..FakeFilesystem::default()
        };
        let exec = executor(FakeVolumes::with_size(300), fs);

        for target in [300, 100] {
            let result = exec.apply("vol-0abc", 300, &resize_to(target), deadline()).await.unwrap();
            assert_eq!(result, ApplyResult::Noop);
        }
        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_waits_for_modification_still_in_flight() {
        // Crash right after modify-volume: size already reported at target,
        // modification not done, kernel still sees the old size.
        let volumes = FakeVolumes::with_size(300);
        {
            let mut v = volumes.inner.lock().unwrap();
            v.modification = Some(Modification {
                state: ModificationState::Modifying,
                target_size_gib: 300,
            });
            v.polls_until_ready = 2;
        }
        let exec = executor(volumes, FakeFilesystem::default());

        let result = exec.apply("vol-0abc", 300, &resize_to(300), deadline()).await.unwrap();
        let outcome = result.outcome().unwrap();
        assert_eq!(outcome.previous_size_gib, 300);
        assert_eq!(outcome.new_size_gib, 300);
        assert!(outcome.filesystem_grown);

        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.volumes().describe_calls(), 3);
        assert_eq!(exec.filesystem().extend_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_times_out_on_stuck_modification() {
        let volumes = FakeVolumes::with_size(300);
        {
            let mut v = volumes.inner.lock().unwrap();
            v.modification = Some(Modification {
                state: ModificationState::Modifying,
                target_size_gib: 300,
            });
            v.never_ready = true;
        }
        let exec = executor(volumes, FakeFilesystem::default());

        let err = exec
            .apply("vol-0abc", 300, &resize_to(300), Instant::now() + Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ResizeTimeout);
        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test]
    async fn rerun_surfaces_failed_modification() {
        let volumes = FakeVolumes::with_size(300);
        volumes.inner.lock().unwrap().modification = Some(Modification {
            state: ModificationState::Failed,
            target_size_gib: 300,
        });
        let exec = executor(volumes, FakeFilesystem::lagging(280));

        let err = exec.apply("vol-0abc", 300, &resize_to(300), deadline()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProviderError);
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn grows_then_extends() {
        let exec = executor(FakeVolumes::with_size(20), FakeFilesystem::default());

        let result = exec.apply("vol-0abc", 20, &resize_to(300), deadline()).await.unwrap();
        let outcome = result.outcome().unwrap();
        assert_eq!(outcome.previous_size_gib, 20);
        assert_eq!(outcome.new_size_gib, 300);
        assert!(outcome.filesystem_grown);

        assert_eq!(exec.volumes().grow_calls(), vec![VolumeTarget::size(300)]);
        assert_eq!(exec.filesystem().extend_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn passes_performance_class_with_grow() {
        let exec = executor(FakeVolumes::with_size(20), FakeFilesystem::default());
        let target = VolumeTarget {
            size_gib: 300,
            iops: Some(6000),
            throughput_mbps: Some(250),
        };
        let decision = ResizeDecision::Resize {
            target,
            rule: "c6i".to_string(),
        };

        exec.apply("vol-0abc", 20, &decision, deadline()).await.unwrap();
        assert_eq!(exec.volumes().grow_calls(), vec![target]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_backs_off_exponentially() {
        let volumes = FakeVolumes::with_size(20);
        volumes.inner.lock().unwrap().polls_until_ready = 3;
        let exec = executor(volumes, FakeFilesystem::default());

        let started = Instant::now();
        exec.apply("vol-0abc", 20, &resize_to(300), deadline()).await.unwrap();

        // 2s + 4s + 8s between the four polls.
        assert_eq!(started.elapsed(), Duration::from_secs(14));
        // One pre-grow describe plus four polls.
        assert_eq!(exec.volumes().describe_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_after_crash_extends_filesystem_only() {
        // Provider already at 300 GiB, filesystem still at launch size.
        let exec = executor(FakeVolumes::with_size(300), FakeFilesystem::lagging(280));

        let result = exec.apply("vol-0abc", 300, &resize_to(300), deadline()).await.unwrap();
        let outcome = result.outcome().unwrap();
        assert_eq!(outcome.previous_size_gib, 300);
        assert_eq!(outcome.new_size_gib, 300);
        assert!(outcome.filesystem_grown);

        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.filesystem().extend_calls(), 1);

        // Third run: nothing left to do.
        let result = exec.apply("vol-0abc", 300, &resize_to(300), deadline()).await.unwrap();
        assert_eq!(result, ApplyResult::Noop);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_modification_is_not_reissued() {
        let volumes = FakeVolumes::with_size(20);
        volumes.inner.lock().unwrap().modification = Some(Modification {
            state: ModificationState::Modifying,
            target_size_gib: 300,
        });
        volumes.inner.lock().unwrap().polls_until_ready = 1;
        let exec = executor(volumes, FakeFilesystem::default());

        let result = exec.apply("vol-0abc", 20, &resize_to(300), deadline()).await.unwrap();
        assert_eq!(result.outcome().unwrap().new_size_gib, 300);
        assert!(exec.volumes().grow_calls().is_empty());
        assert_eq!(exec.filesystem().extend_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_deadline() {
        let volumes = FakeVolumes::with_size(20);
        volumes.inner.lock().unwrap().never_ready = true;
        let exec = executor(volumes, FakeFilesystem::default());

        let started = Instant::now();
        let err = exec
            .apply("vol-0abc", 20, &resize_to(300), started + Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::ResizeTimeout { target_gib: 300, .. }), "{err:?}");
        assert_eq!(err.kind(), FailureKind::ResizeTimeout);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        // The grow went out; the filesystem was never touched.
        assert_eq!(exec.volumes().grow_calls().len(), 1);
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_modification_is_a_provider_error() {
        let volumes = FakeVolumes::with_size(20);
        volumes.inner.lock().unwrap().fail_modification = true;
        let exec = executor(volumes, FakeFilesystem::default());

        let err = exec.apply("vol-0abc", 20, &resize_to(300), deadline()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ModificationFailed { .. }));
        assert_eq!(err.kind(), FailureKind::ProviderError);
        assert_eq!(exec.filesystem().extend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn extend_failure_surfaces_after_grow() {
        let fs = FakeFilesystem {
            fail_extend: true,
            ..FakeFilesystem::default()
        };
        let exec = executor(FakeVolumes::with_size(20), fs);

        let err = exec.apply("vol-0abc", 20, &resize_to(300), deadline()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::FilesystemExtendFailed);
        assert_eq!(exec.volumes().grow_calls().len(), 1);
    }

    #[tokio::test]
    async fn current_size_reads_live_state() {
        let exec = executor(FakeVolumes::with_size(42), FakeFilesystem::default());
        assert_eq!(exec.current_size_gib("vol-0abc", deadline()).await.unwrap(), 42);
    }
}

//! Driver spawns and manages the capture task

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::session::{SessionController, SessionState};
use crate::throughput::ThroughputReport;
use crate::types::Frame;
use crate::{Result, SessionError};

/// Final counters of a capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    /// Frames successfully captured
    pub frames: u64,
    /// Failed frame retrievals
    pub failures: u64,
    /// Open attempts across all reconnect loops
    pub open_attempts: u64,
    pub last_report: Option<ThroughputReport>,
    /// Whether the run ended because shutdown was requested
    pub cancelled: bool,
}

/// Driver spawns the capture loop for a session
///
/// The spawned task owns the controller. It starts the session if needed,
/// then captures frames until the iteration limit is reached or the
/// cancellation token fires, and finally releases the device.
pub struct CaptureDriver;

impl CaptureDriver {
    /// Spawn the capture task.
    ///
    /// `max_iterations` counts capture calls, failed ones included; `None`
    /// runs until cancelled. The controller's cancellation token is reused
    /// when it has one.
    pub fn spawn<D>(controller: SessionController<D>, max_iterations: Option<u64>) -> CaptureHandle
    where
        D: Device,
    {
        let (frame_tx, frame_rx) = watch::channel(None);
        let (report_tx, report_rx) = watch::channel(None);

        let cancel = controller.cancellation_token().cloned().unwrap_or_default();
        let controller = controller.with_cancellation(cancel.clone());

        let cancel_task = cancel.clone();
        let task = tokio::spawn(async move {
            Self::capture_task(controller, frame_tx, report_tx, cancel_task, max_iterations).await
        });

        CaptureHandle { frames: frame_rx, reports: report_rx, cancel, task: Some(task) }
    }

    async fn capture_task<D>(
        mut controller: SessionController<D>,
        frame_tx: watch::Sender<Option<Arc<Frame>>>,
        report_tx: watch::Sender<Option<ThroughputReport>>,
        cancel: CancellationToken,
        max_iterations: Option<u64>,
    ) -> Result<CaptureSummary>
    where
        D: Device,
    {
        info!("Capture task started for {}", controller.endpoint());

        let outcome =
            Self::capture_loop(&mut controller, &frame_tx, &report_tx, &cancel, max_iterations)
                .await;

        // Signal end of stream to consumers
        frame_tx.send_replace(None);

        let cancelled = match outcome {
            Ok(()) => cancel.is_cancelled(),
            Err(SessionError::Cancelled { .. }) => true,
            Err(e @ SessionError::Unreachable { .. }) => return Err(e),
            Err(e) => {
                if let Err(release) = controller.shutdown().await {
                    warn!(error = %release, "Release after capture error failed");
                }
                return Err(e);
            }
        };

        match controller.shutdown().await {
            Ok(()) => {}
            Err(e) if cancelled => warn!(error = %e, "Release during shutdown failed"),
            Err(e) => return Err(e),
        }

        let summary = CaptureSummary {
            frames: controller.frames_captured(),
            failures: controller.capture_failures(),
            open_attempts: controller.open_attempts(),
            last_report: controller.last_report(),
            cancelled,
        };
        info!(
            frames = summary.frames,
            failures = summary.failures,
            open_attempts = summary.open_attempts,
            cancelled,
            "Capture task finished"
        );
        Ok(summary)
    }

    async fn capture_loop<D>(
        controller: &mut SessionController<D>,
        frame_tx: &watch::Sender<Option<Arc<Frame>>>,
        report_tx: &watch::Sender<Option<ThroughputReport>>,
        cancel: &CancellationToken,
        max_iterations: Option<u64>,
    ) -> Result<()>
    where
        D: Device,
    {
        if controller.state() == SessionState::Unconnected {
            controller.start().await?;
        }

        let mut iterations = 0u64;
        let mut last_sent = controller.last_report();
        loop {
            if cancel.is_cancelled() {
                info!("Capture cancelled after {} iterations", iterations);
                return Ok(());
            }
            if max_iterations.is_some_and(|max| iterations >= max) {
                info!("Reached {} iterations", iterations);
                return Ok(());
            }
            iterations += 1;

            match controller.capture_next().await {
                Ok(frame) => {
                    frame_tx.send_replace(Some(Arc::new(frame)));
                }
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Frame lost, session reopened");
                }
                Err(e) => return Err(e),
            }

            let report = controller.last_report();
            if report != last_sent {
                report_tx.send_replace(report);
                last_sent = report;
            }

            // always-ready devices would otherwise starve the shutdown hook
            tokio::task::yield_now().await;
        }
    }
}

/// Handle to a running capture task
///
/// Dropping the handle cancels the task; the task still releases the
/// device before it exits.
pub struct CaptureHandle {
    frames: watch::Receiver<Option<Arc<Frame>>>,
    reports: watch::Receiver<Option<ThroughputReport>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<CaptureSummary>>>,
}

impl CaptureHandle {
    /// Stream of captured frames.
    ///
    /// Backed by a watch channel: a slow consumer sees the latest frame and
    /// skips the ones in between. Ends when the capture task stops.
    pub fn frames(&self) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        WatchStream::new(self.frames.clone())
            .skip_while(|frame| {
                // Nothing captured yet
                let is_none = frame.is_none();
                async move { is_none }
            })
            .take_while(|frame| {
                let is_some = frame.is_some();
                async move { is_some }
            })
            .filter_map(|frame| async move { frame })
    }

    /// Stream of completed throughput windows.
    pub fn reports(&self) -> impl Stream<Item = ThroughputReport> + Send + 'static {
        WatchStream::new(self.reports.clone()).filter_map(|report| async move { report })
    }

    /// Most recently captured frame, if the task is still running.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    pub fn latest_report(&self) -> Option<ThroughputReport> {
        *self.reports.borrow()
    }

    /// Token that stops the capture task; hand it to a shutdown hook.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request shutdown and wait for the device to be released.
    pub async fn shutdown(mut self) -> Result<CaptureSummary> {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the task to finish on its own.
    pub async fn join(mut self) -> Result<CaptureSummary> {
        self.wait().await
    }

    async fn wait(&mut self) -> Result<CaptureSummary> {
        let task = self.task.take().ok_or_else(|| SessionError::TaskFailed {
            reason: "capture task already joined".to_string(),
        })?;
        task.await.map_err(|e| SessionError::TaskFailed { reason: e.to_string() })?
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!("Dropping capture handle, cancelling task");
            self.cancel.cancel();
        }
    }
}

/// Cancel `token` when the process receives Ctrl-C.
pub fn install_ctrl_c_hook(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;
    use crate::test_utils::{Call, Fault, MockDevice, Op};
    use crate::types::{Endpoint, ParameterSet};
    use std::num::NonZeroU32;
    use std::time::Duration;

    fn controller(device: &MockDevice, window: u32) -> SessionController<MockDevice> {
        let _ = tracing_subscriber::fmt::try_init();
        let options = SessionOptions {
            slow_read: None,
            throughput_window: NonZeroU32::new(window).unwrap(),
            ..SessionOptions::default()
        };
        SessionController::new(
            device.clone(),
            Endpoint::new("127.0.0.1", 4001),
            ParameterSet::default(),
            options,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn runs_bounded_capture_and_releases() {
        let device = MockDevice::new();
        let handle = CaptureDriver::spawn(controller(&device, 4), Some(10));

        let summary = handle.join().await.unwrap();

        assert_eq!(summary.frames, 10);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.open_attempts, 1);
        assert!(!summary.cancelled);
        assert_eq!(summary.last_report.map(|r| r.frames), Some(4));
        assert_eq!(device.count(Op::Retrieve), 10);
        assert_eq!(device.calls().last(), Some(&Call::Release { keep_alive: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_iterations_count_towards_the_limit() {
        let device = MockDevice::new();
        device.fail_next(Op::Retrieve, Fault::Transport);
        let handle = CaptureDriver::spawn(controller(&device, 300), Some(5));

        let summary = handle.join().await.unwrap();

        assert_eq!(summary.frames, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.open_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_stream_ends_with_the_task() {
        let device = MockDevice::new();
        let handle = CaptureDriver::spawn(controller(&device, 300), Some(3));
        let frames = handle.frames();

        // watch semantics may coalesce frames, but never reorder them
        let collected: Vec<_> = frames.collect().await;
        assert!(!collected.is_empty());
        assert!(collected.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(collected.iter().all(|f| (1..=3).contains(&f.sequence)));

        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_an_unbounded_run() {
        let device = MockDevice::new();
        let handle = CaptureDriver::spawn(controller(&device, 300), None);

        let mut frames = Box::pin(handle.frames());
        frames.next().await.expect("first frame");

        let summary = handle.shutdown().await.unwrap();
        assert!(summary.cancelled);
        assert!(summary.frames >= 1);
        assert!(!device.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn release_failure_after_cancel_is_swallowed() {
        let device = MockDevice::new();
        device.fail_next(Op::Release, Fault::Refuse);
        let handle = CaptureDriver::spawn(controller(&device, 300), None);
        Box::pin(handle.frames()).next().await.expect("first frame");

        let summary = handle.shutdown().await.unwrap();
        assert!(summary.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn release_failure_after_normal_end_is_fatal() {
        let device = MockDevice::new();
        device.fail_next(Op::Release, Fault::Transport);
        let handle = CaptureDriver::spawn(controller(&device, 300), Some(2));

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, SessionError::Release { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unreachable_device_ends_the_task() {
        let device = MockDevice::new();
        device.fail_next(Op::Ping, Fault::Refuse);
        let handle = CaptureDriver::spawn(controller(&device, 300), None);

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, SessionError::Unreachable { .. }));
        assert_eq!(device.count(Op::Release), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_reconnect_still_releases() {
        let device = MockDevice::new();
        device.fail_next_n(Op::Open, 1000, Fault::Refuse);
        let handle = CaptureDriver::spawn(controller(&device, 300), None);
        let token = handle.cancel_token();

        tokio::time::sleep(Duration::from_millis(7000)).await;
        token.cancel();

        let summary = handle.join().await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.frames, 0);
        assert!(summary.open_attempts >= 3);
        assert_eq!(device.count(Op::Release), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_are_published() {
        let device = MockDevice::new();
        device.set_frame_size(64);
        let handle = CaptureDriver::spawn(controller(&device, 2), Some(6));
        let mut reports = Box::pin(handle.reports());

        let report = reports.next().await.expect("a report");
        assert_eq!(report.frames, 2);
        assert_eq!(report.mean_bytes, 64.0);

        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn ctrl_c_hook_exits_when_token_is_cancelled() {
        let token = CancellationToken::new();
        let hook = install_ctrl_c_hook(token.clone());
        token.cancel();
        hook.await.unwrap();
    }
}

//! Session lifecycle controller.
//!
//! [`SessionController`] owns the connect, configure, capture and reconnect
//! state machine for one device endpoint:
//!
//! ```text
//! Unconnected -> Reachable -> Configuring -> Capturing
//!                                 ^              |
//!                                 |              v
//!                                 +-------- Recovering
//! ```
//!
//! Every property write is followed by a read-back. The device may clamp,
//! round or ignore values without saying so, and a parameter set only
//! becomes active once width, height and encoding have all been read back
//! unchanged. Frame rate mismatches are downgraded to warnings, and so are
//! autofocus failures.
//!
//! Transport and verification failures are handled the same way: the
//! attempt is abandoned and [`SessionController::reconnect_loop`] runs
//! [`SessionController::open_attempt`] until it succeeds. The loop never
//! gives up; only a cancellation token ends it early.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::device::Device;
use crate::retry::RetryPolicy;
use crate::throughput::{DEFAULT_WINDOW, ThroughputReport, ThroughputSampler};
use crate::types::{
    Autofocus, AutofocusMode, DeviceProperty, Endpoint, Frame, FrameHeight, FrameRate, FrameWidth,
    ParameterSet, PixelEncoding,
};
use crate::{Result, SessionError};


/// A re-read frame rate within this distance of the request counts as accepted.
pub const FRAME_RATE_TOLERANCE: f64 = 0.1;

/// Connectivity state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No successful probe yet, or released
    Unconnected,
    /// Device answered a probe
    Reachable,
    /// Open sequence and parameter negotiation in progress
    Configuring,
    /// Parameters verified, frames may be requested
    Capturing,
    /// Last attempt or capture failed, waiting to reopen
    Recovering,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Reachable => "reachable",
            SessionState::Configuring => "configuring",
            SessionState::Capturing => "capturing",
            SessionState::Recovering => "recovering",
        };
        f.write_str(name)
    }
}

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Hold one persistent connection across calls once the device replied
    pub keep_alive: bool,
    /// Persistent probes sent after the first probe succeeds
    pub warmup_pings: u32,
    /// Delay between failed open attempts
    pub retry: RetryPolicy,
    /// Frames per throughput report
    pub throughput_window: NonZeroU32,
    /// Warn when a single frame retrieval takes longer than this
    pub slow_read: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            warmup_pings: 10,
            retry: RetryPolicy::default(),
            throughput_window: DEFAULT_WINDOW,
            slow_read: Some(Duration::from_millis(500)),
        }
    }
}

type ReportCallback = Box<dyn FnMut(&ThroughputReport) + Send>;

/// Runtime clock, so throughput follows a paused or advanced test clock.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Drives one device through open, configure, capture and recovery.
///
/// Not designed for concurrent use: every operation takes `&mut self`.
pub struct SessionController<D: Device> {
    device: D,
    endpoint: Endpoint,
    parameters: ParameterSet,
    options: SessionOptions,

    state: SessionState,
    keep_alive: bool,
    /// Last probe succeeded and nothing has failed since
    reachable: bool,
    /// Parameter set verified on the device, if any
    active: Option<ParameterSet>,

    sampler: ThroughputSampler,
    last_report: Option<ThroughputReport>,
    on_report: Option<ReportCallback>,

    /// Open attempts made by reconnect loops; never reset
    open_attempts: u64,
    frames_captured: u64,
    capture_failures: u64,

    cancel: Option<CancellationToken>,
}

impl<D: Device> SessionController<D> {
    /// Create a controller; no device call is made until [`start`](Self::start).
    pub fn new(
        device: D,
        endpoint: Endpoint,
        parameters: ParameterSet,
        options: SessionOptions,
    ) -> Self {
        let sampler = ThroughputSampler::starting_at(options.throughput_window, now());
        Self {
            device,
            endpoint,
            parameters,
            options,
            state: SessionState::Unconnected,
            keep_alive: false,
            reachable: false,
            active: None,
            sampler,
            last_report: None,
            on_report: None,
            open_attempts: 0,
            frames_captured: 0,
            capture_failures: 0,
            cancel: None,
        }
    }

    /// Let `token` interrupt the reconnect delay.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Token interrupting the reconnect delay, if one was installed.
    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Register the callback invoked with each completed throughput window.
    pub fn on_report<F>(&mut self, callback: F)
    where
        F: FnMut(&ThroughputReport) + Send + 'static,
    {
        self.on_report = Some(Box::new(callback));
    }

    /// Current connectivity state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Address and port this session talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Requested parameter set.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Parameter set verified on the device, `None` until configured.
    pub fn active_parameters(&self) -> Option<&ParameterSet> {
        self.active.as_ref()
    }

    /// Whether calls currently use the persistent connection.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Total open attempts across all reconnect loops.
    pub fn open_attempts(&self) -> u64 {
        self.open_attempts
    }

    /// Frames retrieved successfully; also the last frame's sequence number.
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Failed frame retrievals.
    pub fn capture_failures(&self) -> u64 {
        self.capture_failures
    }

    /// Most recent completed throughput window.
    pub fn last_report(&self) -> Option<ThroughputReport> {
        self.last_report
    }

    /// Sampler for the current throughput window.
    pub fn throughput(&self) -> &ThroughputSampler {
        &self.sampler
    }

    /// Underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Underlying device, for transport-specific calls between captures.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Initial probe, warm-up burst and reconnect-capable open.
    ///
    /// The first probe uses a one-shot connection. If it fails there is no
    /// session to recover, so [`SessionError::Unreachable`] is returned.
    /// Afterwards the session switches to keep-alive (when enabled) and
    /// opens the camera, retrying until configuration succeeds.
    pub async fn start(&mut self) -> Result<()> {
        info!("Trying to connect to camera at {}", self.endpoint);

        self.keep_alive = false;
        if !self.probe().await {
            error!("Camera at {} did not reply", self.endpoint);
            return Err(SessionError::Unreachable { endpoint: self.endpoint.to_string() });
        }
        info!("Camera at {} replied", self.endpoint);

        self.keep_alive = self.options.keep_alive;
        if self.options.warmup_pings > 0 {
            let replies = self.probe_sequence(self.options.warmup_pings).await;
            debug!(replies, sent = self.options.warmup_pings, "Warm-up probes finished");
        }

        self.reconnect_loop().await?;
        Ok(())
    }

    /// Send one liveness check.
    ///
    /// Only reachability is recorded; a failed probe is not an error.
    pub async fn probe(&mut self) -> bool {
        let replied = match self.device.ping(self.keep_alive).await {
            Ok(replied) => replied,
            Err(e) => {
                debug!(error = %e, "Probe did not complete");
                false
            }
        };

        self.reachable = replied;
        match (replied, self.state) {
            (true, SessionState::Unconnected) => self.state = SessionState::Reachable,
            (false, SessionState::Reachable) => self.state = SessionState::Unconnected,
            _ => {}
        }
        trace!(replied, keep_alive = self.keep_alive, "Probe");
        replied
    }

    /// Send `count` probes in a row, returning how many were answered.
    pub async fn probe_sequence(&mut self, count: u32) -> u32 {
        let mut replies = 0;
        for i in 1..=count {
            if self.probe().await {
                replies += 1;
                info!("Camera replied to probe {}/{}", i, count);
            } else {
                warn!("Camera missed probe {}/{}", i, count);
            }
        }
        replies
    }

    /// Open the camera unless the device says it already is.
    pub async fn ensure_open(&mut self) -> Result<()> {
        if self.device.is_opened(self.keep_alive).await? {
            info!("Camera is opened already");
            return Ok(());
        }

        info!("Camera is not opened, opening now");
        if self.device.open(self.keep_alive).await? {
            info!("Camera opened");
            Ok(())
        } else {
            Err(SessionError::transport("open", "device refused to open the camera"))
        }
    }

    /// Write a typed property. `Ok(false)` means the device refused it.
    pub async fn write<P: DeviceProperty>(&mut self, value: P::Value) -> Result<bool> {
        self.device.set_property(P::ID, P::encode(value), self.keep_alive).await
    }

    /// Read a property's raw numeric value.
    pub async fn read_raw<P: DeviceProperty>(&mut self) -> Result<f64> {
        self.device.get_property(P::ID, self.keep_alive).await
    }

    /// Read a typed property; `None` if the device reports an unrepresentable value.
    pub async fn read<P: DeviceProperty>(&mut self) -> Result<Option<P::Value>> {
        Ok(P::decode(self.read_raw::<P>().await?))
    }

    /// Set then read back, requiring the exact requested value.
    async fn set_verified<P: DeviceProperty>(&mut self, value: P::Value) -> Result<()> {
        let requested = P::encode(value);
        if !self.write::<P>(value).await? {
            debug!(property = %P::ID, requested, "Device refused set, checking read-back anyway");
        }

        let actual = self.read_raw::<P>().await?;
        if P::decode(actual) == Some(value) {
            info!("{} set to {:?}", P::ID, value);
            Ok(())
        } else {
            error!(property = %P::ID, requested, actual, "Read-back does not match request");
            Err(SessionError::verification_failed(P::ID, requested, actual))
        }
    }

    /// Negotiate `params` with the device.
    ///
    /// Width, height and encoding must read back exactly; the first mismatch
    /// aborts. Autofocus is only touched when explicitly requested and its
    /// failures are warnings. Frame rate is set and read back twice, and a
    /// mismatch is only a warning.
    ///
    /// This is one step of [`open_attempt`](Self::open_attempt) and leaves the
    /// session in `Configuring` on success; only `open_attempt` moves it to
    /// `Capturing`.
    pub async fn apply_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        self.state = SessionState::Configuring;
        self.active = None;

        self.set_verified::<FrameWidth>(params.width).await?;
        self.set_verified::<FrameHeight>(params.height).await?;
        self.set_verified::<PixelEncoding>(params.encoding).await?;
        self.apply_autofocus(params.autofocus).await;
        self.apply_frame_rate(params.frame_rate).await?;

        self.active = Some(params.clone());
        Ok(())
    }

    async fn apply_autofocus(&mut self, mode: AutofocusMode) {
        let Some(enabled) = mode.requested() else {
            return;
        };

        info!("Setting auto focus {}", if enabled { "ON" } else { "OFF" });
        match self.write::<Autofocus>(enabled).await {
            Ok(true) => {}
            Ok(false) => warn!("Camera does not support changing auto focus"),
            Err(e) => warn!(error = %e, "Auto focus call failed, continuing"),
        }
    }

    async fn apply_frame_rate(&mut self, requested: f64) -> Result<()> {
        if !self.write::<FrameRate>(requested).await? {
            debug!(requested, "Device refused frame rate");
        }

        let reported = self.read_raw::<FrameRate>().await?;
        // cameras may report a settable value that differs from what they achieve
        let confirmed = self.read_raw::<FrameRate>().await?;
        let within_tolerance = (confirmed - requested).abs() < FRAME_RATE_TOLERANCE;

        if reported == requested {
            if within_tolerance {
                info!("Camera accepts {} fps", requested);
            } else {
                warn!(requested, confirmed, "Frame rate changed between reads");
            }
        } else {
            warn!(
                requested,
                reported, "Camera does not seem to support {} fps, continuing", requested
            );
            if within_tolerance {
                info!(confirmed, "Frame rate re-read is within tolerance of {} fps", requested);
            }
        }
        Ok(())
    }

    /// One open attempt: probe unless the connection is known good, make
    /// sure the camera is open, then negotiate the parameters.
    pub async fn open_attempt(&mut self) -> Result<()> {
        let params = self.parameters.clone();
        match self.open_and_configure(&params).await {
            Ok(()) => {
                self.state = SessionState::Capturing;
                // the outage must not count against the next window
                self.sampler.reset_at(now());
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Recovering;
                self.reachable = false;
                self.active = None;
                Err(e)
            }
        }
    }

    async fn open_and_configure(&mut self, params: &ParameterSet) -> Result<()> {
        if !self.reachable && !self.probe().await {
            return Err(SessionError::transport("ping", "device did not reply"));
        }
        self.ensure_open().await?;
        self.apply_parameters(params).await
    }

    /// Retry [`open_attempt`](Self::open_attempt) until it succeeds.
    ///
    /// Returns the number of attempts this loop made. Ends early only with
    /// [`SessionError::Cancelled`] when the cancellation token fires.
    pub async fn reconnect_loop(&mut self) -> Result<u64> {
        let mut attempts = 0u64;
        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(SessionError::Cancelled { operation: "reconnect".to_string() });
            }

            attempts += 1;
            self.open_attempts += 1;

            match self.open_attempt().await {
                Ok(()) => {
                    info!(attempt = self.open_attempts, "Camera ready at {}", self.endpoint);
                    return Ok(attempts);
                }
                Err(e) => {
                    error!(error = %e, "Failed to open camera! Attempt {}", self.open_attempts);
                    let delay = self.options.retry.delay_after(attempts);
                    Self::pause(self.cancel.clone(), delay).await?;
                }
            }
        }
    }

    async fn pause(cancel: Option<CancellationToken>, delay: Duration) -> Result<()> {
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        Err(SessionError::Cancelled { operation: "reconnect".to_string() })
                    }
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Request one frame.
    ///
    /// On failure the throughput window is discarded and the session moves
    /// to `Recovering`; no retry happens here.
    pub async fn capture_once(&mut self) -> Result<Frame> {
        if self.state != SessionState::Capturing {
            return Err(SessionError::invalid_state("capture a frame", self.state));
        }

        let started = Instant::now();
        let result = self.device.retrieve(self.keep_alive).await;
        let elapsed = started.elapsed();
        if let Some(threshold) = self.options.slow_read {
            if elapsed > threshold {
                warn!("{} - took {} milliseconds to read a frame", self.endpoint, elapsed.as_millis());
            }
        }

        let failure = match result {
            Ok(Some(payload)) => {
                self.frames_captured += 1;
                let frame = Frame::new(payload, self.frames_captured);
                self.record_throughput(frame.byte_size());
                return Ok(frame);
            }
            Ok(None) => SessionError::transport("retrieve", "device returned no frame"),
            Err(e) => e,
        };

        self.capture_failures += 1;
        error!(error = %failure, "Failed to grab frame {}", self.frames_captured + 1);
        self.sampler.reset_at(now());
        self.state = SessionState::Recovering;
        self.reachable = false;
        self.active = None;
        Err(failure)
    }

    fn record_throughput(&mut self, byte_size: usize) {
        if !self.sampler.on_frame_at(now(), byte_size) {
            return;
        }
        if let Some(report) = self.sampler.report_if_complete() {
            info!("{} - {}", self.endpoint, report);
            self.last_report = Some(report);
            if let Some(callback) = self.on_report.as_mut() {
                callback(&report);
            }
        }
    }

    /// Capture a frame, reconnecting on failure.
    ///
    /// When retrieval fails the reconnect loop runs to completion before the
    /// original failure is returned, so the next call captures on a freshly
    /// configured session.
    pub async fn capture_next(&mut self) -> Result<Frame> {
        match self.capture_once().await {
            Ok(frame) => Ok(frame),
            Err(e) if e.is_retryable() => {
                self.reconnect_loop().await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the camera on the device.
    ///
    /// With `keep_alive_final == false` the persistent connection is torn
    /// down too. A failure is returned as [`SessionError::Release`]; the
    /// caller decides whether it matters.
    pub async fn release(&mut self, keep_alive_final: bool) -> Result<()> {
        self.keep_alive = keep_alive_final;
        let result = self.device.release(keep_alive_final).await;

        self.state = SessionState::Unconnected;
        self.reachable = false;
        self.active = None;
        self.sampler.reset_at(now());

        match result {
            Ok(true) => {
                info!("Camera at {} released", self.endpoint);
                Ok(())
            }
            Ok(false) => Err(SessionError::Release {
                endpoint: self.endpoint.to_string(),
                reason: "device refused to release the camera".to_string(),
            }),
            Err(e) => Err(SessionError::Release {
                endpoint: self.endpoint.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Final release: closes the camera and the persistent connection.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.release(false).await
    }
}

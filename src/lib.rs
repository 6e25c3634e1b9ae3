//! Session control for remote frame capture devices.
//!
//! Capture Session connects to a camera service over a request/response
//! link, negotiates the capture mode, streams frames and recovers from link
//! failures on its own.
//!
//! # Features
//!
//! - **Verified configuration**: every parameter write is read back, so a
//!   session only reports itself ready once the device really runs the
//!   requested mode
//! - **Automatic recovery**: transport and verification failures reopen the
//!   session with a configurable delay until the device comes back
//! - **Throughput accounting**: frames per second and mean payload size over
//!   a frame-count window
//! - **Async capture loop**: frames and reports published as streams from a
//!   background task
//!
//! The crate does not speak any wire protocol itself. Implement [`Device`]
//! over your transport and hand it to [`Capture`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use capture_session::{Capture, CaptureConfig, CaptureDriver, Device, install_ctrl_c_hook};
//! use futures::StreamExt;
//!
//! async fn run<D: Device>(device: D) -> capture_session::Result<()> {
//!     let config = CaptureConfig::from_path("capture.yaml")?;
//!     let session = Capture::from_config(device, &config)?;
//!
//!     let handle = CaptureDriver::spawn(session, config.max_iterations());
//!     install_ctrl_c_hook(handle.cancel_token());
//!
//!     let mut frames = Box::pin(handle.frames());
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {} ({} bytes)", frame.sequence, frame.byte_size());
//!     }
//!
//!     let summary = handle.join().await?;
//!     println!("captured {} frames", summary.frames);
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
pub mod device;
mod error;
pub mod retry;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod throughput;
pub mod types;

// Session control
pub mod driver;
pub mod session;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use config::CaptureConfig;
pub use device::Device;
pub use driver::{CaptureDriver, CaptureHandle, CaptureSummary, install_ctrl_c_hook};
pub use retry::RetryPolicy;
pub use session::{SessionController, SessionOptions, SessionState};
pub use throughput::{ThroughputReport, ThroughputSampler};

/// Unified entry point for capture sessions.
///
/// # Examples
///
/// ## Explicit parameters
/// ```rust,no_run
/// use capture_session::{Capture, Device, Endpoint, ParameterSet, SessionOptions};
///
/// async fn open<D: Device>(device: D) -> capture_session::Result<()> {
///     let mut session = Capture::start(
///         device,
///         Endpoint::new("192.168.2.2", 4001),
///         ParameterSet::default(),
///         SessionOptions::default(),
///     )
///     .await?;
///     let frame = session.capture_next().await?;
///     println!("{} bytes", frame.byte_size());
///     session.shutdown().await
/// }
/// ```
pub struct Capture;

impl Capture {
    /// Start a session: probe, warm up, open and configure.
    ///
    /// Resolves once the camera is configured, however many reconnect
    /// attempts that takes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parameter set is invalid
    /// - The device does not answer the very first probe
    pub async fn start<D: Device>(
        device: D,
        endpoint: Endpoint,
        parameters: ParameterSet,
        options: SessionOptions,
    ) -> Result<SessionController<D>> {
        parameters.validate()?;
        let mut session = SessionController::new(device, endpoint, parameters, options);
        session.start().await?;
        Ok(session)
    }

    /// Build an unstarted session from a configuration document.
    ///
    /// No device call is made; [`CaptureDriver::spawn`] or
    /// [`SessionController::start`] starts it.
    pub fn from_config<D: Device>(
        device: D,
        config: &CaptureConfig,
    ) -> Result<SessionController<D>> {
        Ok(SessionController::new(
            device,
            config.endpoint(),
            config.parameter_set()?,
            config.session_options()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockDevice, Op};

    #[tokio::test(start_paused = true)]
    async fn start_returns_a_capturing_session() {
        let device = MockDevice::new();
        let session = Capture::start(
            device.clone(),
            Endpoint::new("10.0.0.7", 4001),
            ParameterSet::default(),
            SessionOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(session.state(), SessionState::Capturing);
        assert_eq!(device.count(Op::Open), 1);
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected_before_any_call() {
        let device = MockDevice::new();
        let params = ParameterSet::new(0, 240, FourCc::MJPG, 30.0);
        let result =
            Capture::start(device.clone(), Endpoint::new("h", 1), params, SessionOptions::default())
                .await;

        assert!(matches!(result, Err(SessionError::Config { .. })));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn from_config_builds_an_unstarted_session() {
        let config = CaptureConfig::from_yaml_str("device:\n  port: 5000\n").unwrap();
        let session = Capture::from_config(MockDevice::new(), &config).unwrap();

        assert_eq!(session.state(), SessionState::Unconnected);
        assert_eq!(session.endpoint().port, 5000);
        assert_eq!(session.parameters(), &ParameterSet::default());
    }
}

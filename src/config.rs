//! YAML configuration for a capture session.
//!
//! Every field has a default, so an empty document is a valid
//! configuration:
//!
//! ```yaml
//! device:
//!   address: 192.168.2.2
//!   port: 4001
//! camera:
//!   frame_width: 320
//!   frame_height: 240
//!   encoding: MJPG
//!   fps: 30
//!   auto_focus: default   # on | off | default
//! session:
//!   keep_alive: true
//!   warmup_pings: 10
//!   reconnect:
//!     kind: fixed
//!     delay: 2000
//!   throughput_window: 300
//!   slow_read_ms: 500
//!   max_iterations: 1000
//! ```

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::session::SessionOptions;
use crate::types::{AutofocusMode, Endpoint, FourCc, ParameterSet};
use crate::{Result, SessionError};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub device: DeviceSection,
    pub camera: CameraSection,
    pub session: SessionSection,
}

/// Where the device lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub address: String,
    pub port: u16,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self { address: "192.168.2.2".to_string(), port: 4001 }
    }
}

/// Requested camera mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraSection {
    pub frame_width: u32,
    pub frame_height: u32,
    pub encoding: String,
    pub fps: f64,
    pub auto_focus: String,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            frame_width: 320,
            frame_height: 240,
            encoding: "MJPG".to_string(),
            fps: 30.0,
            auto_focus: "default".to_string(),
        }
    }
}

/// Session behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Hold one persistent connection across calls
    pub keep_alive: bool,
    /// Persistent probes sent after the first probe succeeds
    pub warmup_pings: u32,
    pub reconnect: RetryPolicy,
    /// Frames per throughput report
    pub throughput_window: u32,
    /// Warn when one frame takes longer than this; 0 disables
    pub slow_read_ms: u64,
    /// Frames to capture before shutting down; 0 or 1 means no limit
    pub max_iterations: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            keep_alive: true,
            warmup_pings: 10,
            reconnect: RetryPolicy::default(),
            throughput_window: 300,
            slow_read_ms: 500,
            max_iterations: 1000,
        }
    }
}

impl CaptureConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| SessionError::config("capture configuration YAML", e.to_string()))
    }

    /// Read and parse a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::file_error(path.to_path_buf(), e))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&text)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.device.address.clone(), self.device.port)
    }

    /// Derive the immutable parameter set, validating every field.
    pub fn parameter_set(&self) -> Result<ParameterSet> {
        let encoding: FourCc = self.camera.encoding.parse()?;
        let autofocus: AutofocusMode = self.camera.auto_focus.parse()?;
        let params = ParameterSet::new(
            self.camera.frame_width,
            self.camera.frame_height,
            encoding,
            self.camera.fps,
        )
        .with_autofocus(autofocus);
        params.validate()?;
        Ok(params)
    }

    pub fn session_options(&self) -> Result<SessionOptions> {
        let throughput_window = NonZeroU32::new(self.session.throughput_window).ok_or_else(|| {
            SessionError::config("session.throughput_window", "must be at least 1 frame")
        })?;
        Ok(SessionOptions {
            keep_alive: self.session.keep_alive,
            warmup_pings: self.session.warmup_pings,
            retry: self.session.reconnect,
            throughput_window,
            slow_read: (self.session.slow_read_ms > 0)
                .then(|| Duration::from_millis(self.session.slow_read_ms)),
        })
    }

    /// Capture iteration limit; `None` means run until shutdown.
    pub fn max_iterations(&self) -> Option<u64> {
        (self.session.max_iterations > 1).then_some(self.session.max_iterations)
    }
}

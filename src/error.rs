//! Error types for session control.
//!
//! Every failure the controller can observe falls into one of a few
//! categories, exposed through [`SessionError::kind`]:
//!
//! - **Transport**: a probe, open, property or frame call did not complete,
//!   or the device refused it
//! - **Verification**: a set call went through but the read-back value
//!   disagrees with the request
//! - **Fatal**: the very first probe failed, the final release failed, or
//!   the capture task died
//! - **Usage**: the caller asked for something the current state or
//!   configuration does not allow
//!
//! Transport and verification failures are retryable: they invalidate the
//! current open attempt and send the controller back through its reconnect
//! loop.
//!
//! ```rust
//! use capture_session::{PropertyId, SessionError};
//!
//! let error = SessionError::verification_failed(PropertyId::FrameWidth, 320.0, 160.0);
//! assert!(error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::types::PropertyId;

/// Result type alias for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Verification,
    Fatal,
    Usage,
}

/// Main error type for session operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("Device call '{operation}' failed: {reason}")]
    Transport {
        operation: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to set {property}: requested {requested}, device reports {actual}")]
    Verification { property: PropertyId, requested: f64, actual: f64 },

    #[error("Device at {endpoint} did not reply to the initial probe")]
    Unreachable { endpoint: String },

    #[error("Failed to release device at {endpoint}: {reason}")]
    Release { endpoint: String, reason: String },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState { operation: String, state: String },

    #[error("Capture task ended abnormally: {reason}")]
    TaskFailed { reason: String },

    #[error("Shutdown requested during {operation}")]
    Cancelled { operation: String },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Configuration file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::Transport { .. } => FailureKind::Transport,
            SessionError::Verification { .. } => FailureKind::Verification,
            SessionError::Unreachable { .. }
            | SessionError::Release { .. }
            | SessionError::TaskFailed { .. } => FailureKind::Fatal,
            SessionError::InvalidState { .. }
            | SessionError::Cancelled { .. }
            | SessionError::Config { .. }
            | SessionError::File { .. } => FailureKind::Usage,
        }
    }

    /// Returns whether the reconnect loop should handle this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), FailureKind::Transport | FailureKind::Verification)
    }

    /// Returns whether this error should terminate the process.
    pub fn is_fatal(&self) -> bool {
        self.kind() == FailureKind::Fatal
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SessionError::Transport { .. } => vec![
                "Check the network link to the device",
                "Verify the device service is running",
                "Wait for the reconnect loop to re-establish the session",
            ],
            SessionError::Verification { .. } => vec![
                "Check the camera supports the requested mode",
                "Pick a resolution or encoding listed by the camera",
                "Lower the requested frame rate",
            ],
            SessionError::Unreachable { .. } => vec![
                "Check the device address and port",
                "Verify the device is powered and on the network",
                "Check firewall rules between client and device",
            ],
            SessionError::Release { .. } => vec![
                "The device reclaims abandoned sessions on its own",
                "Restart the device service if the camera stays locked",
            ],
            SessionError::TaskFailed { .. } => vec![
                "Check the logs for a panic in the device implementation",
                "Restart the capture session",
            ],
            SessionError::InvalidState { .. } => vec![
                "Run the open sequence before capturing frames",
                "Do not reuse a released session",
            ],
            SessionError::Cancelled { .. } => vec!["No action needed, shutdown was requested"],
            SessionError::Config { .. } => vec![
                "Check configuration field values",
                "Encoding must be exactly four ASCII characters",
                "Auto focus must be one of on, off or default",
            ],
            SessionError::File { .. } => {
                vec!["Check file exists and is readable", "Check file permissions"]
            }
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SessionError::Transport { operation: operation.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        operation: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SessionError::Transport {
            operation: operation.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Helper constructor for read-back mismatches.
    pub fn verification_failed(property: PropertyId, requested: f64, actual: f64) -> Self {
        SessionError::Verification { property, requested, actual }
    }

    /// Helper constructor for invalid state errors.
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        SessionError::InvalidState { operation: operation.into(), state: state.to_string() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        SessionError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        SessionError::File { path, source }
    }
}

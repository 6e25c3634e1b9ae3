//! Core types shared by the controller and device implementations.
//!
//! - [`ParameterSet`] is the immutable target configuration (size, encoding,
//!   frame rate, autofocus) re-applied on every reconnect
//! - [`PropertyId`] and the [`DeviceProperty`] accessors give each device
//!   property a fixed value type on top of the device's generic numeric
//!   get/set call
//! - [`Frame`] carries one retrieved image payload
//! - [`Endpoint`] identifies the session (address, port)
//!
//! ```rust
//! use capture_session::types::{AutofocusMode, DeviceProperty, FourCc, FrameWidth, ParameterSet};
//!
//! let params = ParameterSet::new(640, 480, FourCc::MJPG, 30.0)
//!     .with_autofocus(AutofocusMode::Off);
//! assert!(params.validate().is_ok());
//! assert_eq!(FrameWidth::encode(params.width), 640.0);
//! ```

mod frame;
mod parameters;
mod property;

pub use frame::{Endpoint, Frame};
pub use parameters::{AutofocusMode, FourCc, ParameterSet};
pub use property::{
    Autofocus, DeviceProperty, FrameHeight, FrameRate, FrameWidth, PixelEncoding, PropertyId,
};

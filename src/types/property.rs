//! Device property identifiers and typed accessors

use serde::{Deserialize, Serialize};
use std::fmt;

use super::FourCc;

/// Properties the controller knows how to negotiate.
///
/// The numeric ids follow the capture property numbering used by the
/// device service, so they can be passed through the generic get/set call
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyId {
    FrameWidth,
    FrameHeight,
    FrameRate,
    PixelEncoding,
    Autofocus,
}

impl PropertyId {
    /// Wire id of this property.
    pub const fn code(self) -> i32 {
        match self {
            PropertyId::FrameWidth => 3,
            PropertyId::FrameHeight => 4,
            PropertyId::FrameRate => 5,
            PropertyId::PixelEncoding => 6,
            PropertyId::Autofocus => 39,
        }
    }

    /// Human readable name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            PropertyId::FrameWidth => "frame width",
            PropertyId::FrameHeight => "frame height",
            PropertyId::FrameRate => "frame rate",
            PropertyId::PixelEncoding => "pixel encoding",
            PropertyId::Autofocus => "autofocus",
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed accessor for one device property.
///
/// The device exposes every property through a single numeric get/set pair.
/// Implementors pin down the value type for a property id so that, for
/// example, a [`FourCc`] can never be written to the frame width.
pub trait DeviceProperty {
    /// Value type carried by this property.
    type Value: Copy + PartialEq + fmt::Debug;

    /// Property id on the wire.
    const ID: PropertyId;

    /// Convert a typed value to the numeric form the device expects.
    fn encode(value: Self::Value) -> f64;

    /// Convert a numeric read-back to the typed value, if representable.
    fn decode(raw: f64) -> Option<Self::Value>;
}

fn decode_dimension(raw: f64) -> Option<u32> {
    (raw.is_finite() && raw >= 0.0 && raw.fract() == 0.0 && raw <= u32::MAX as f64)
        .then_some(raw as u32)
}

/// Frame width in pixels.
pub struct FrameWidth;

impl DeviceProperty for FrameWidth {
    type Value = u32;
    const ID: PropertyId = PropertyId::FrameWidth;

    fn encode(value: u32) -> f64 {
        value as f64
    }

    fn decode(raw: f64) -> Option<u32> {
        decode_dimension(raw)
    }
}

/// Frame height in pixels.
pub struct FrameHeight;

impl DeviceProperty for FrameHeight {
    type Value = u32;
    const ID: PropertyId = PropertyId::FrameHeight;

    fn encode(value: u32) -> f64 {
        value as f64
    }

    fn decode(raw: f64) -> Option<u32> {
        decode_dimension(raw)
    }
}

/// Target frames per second.
pub struct FrameRate;

impl DeviceProperty for FrameRate {
    type Value = f64;
    const ID: PropertyId = PropertyId::FrameRate;

    fn encode(value: f64) -> f64 {
        value
    }

    fn decode(raw: f64) -> Option<f64> {
        raw.is_finite().then_some(raw)
    }
}

/// Pixel encoding as a four-character code.
pub struct PixelEncoding;

impl DeviceProperty for PixelEncoding {
    type Value = FourCc;
    const ID: PropertyId = PropertyId::PixelEncoding;

    fn encode(value: FourCc) -> f64 {
        value.code() as f64
    }

    fn decode(raw: f64) -> Option<FourCc> {
        (raw.is_finite() && raw >= 0.0 && raw.fract() == 0.0 && raw <= u32::MAX as f64)
            .then(|| FourCc::from_code(raw as u32))
    }
}

/// Autofocus switch (`true` = on).
pub struct Autofocus;

impl DeviceProperty for Autofocus {
    type Value = bool;
    const ID: PropertyId = PropertyId::Autofocus;

    fn encode(value: bool) -> f64 {
        if value { 1.0 } else { 0.0 }
    }

    fn decode(raw: f64) -> Option<bool> {
        if raw == 0.0 {
            Some(false)
        } else if raw == 1.0 {
            Some(true)
        } else {
            None
        }
    }
}

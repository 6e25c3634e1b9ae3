//! Operating parameters negotiated with the device

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, SessionError};

/// Four-character pixel format code (e.g. `MJPG`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Motion JPEG, the default encoding.
    pub const MJPG: FourCc = FourCc(*b"MJPG");

    pub const fn new(tag: [u8; 4]) -> Self {
        Self(tag)
    }

    /// Raw tag bytes.
    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Little-endian packed code, first character in the lowest byte.
    pub const fn code(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_code(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for FourCc {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !s.is_ascii() {
            return Err(SessionError::config(
                "pixel encoding",
                format!("'{s}' is not a four character ASCII code"),
            ));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl TryFrom<String> for FourCc {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FourCc> for String {
    fn from(value: FourCc) -> Self {
        value.to_string()
    }
}

/// Autofocus request.
///
/// `Default` leaves the camera untouched: no autofocus call is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutofocusMode {
    On,
    Off,
    #[default]
    Default,
}

impl AutofocusMode {
    /// Value to write, or `None` when no call should be made.
    pub fn requested(self) -> Option<bool> {
        match self {
            AutofocusMode::On => Some(true),
            AutofocusMode::Off => Some(false),
            AutofocusMode::Default => None,
        }
    }
}

impl FromStr for AutofocusMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(AutofocusMode::On),
            "off" => Ok(AutofocusMode::Off),
            "default" | "" => Ok(AutofocusMode::Default),
            other => Err(SessionError::config(
                "auto focus",
                format!("expected on, off or default, got '{other}'"),
            )),
        }
    }
}

/// Target operating configuration, applied verbatim on every (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub width: u32,
    pub height: u32,
    pub encoding: FourCc,
    pub frame_rate: f64,
    pub autofocus: AutofocusMode,
}

impl ParameterSet {
    pub fn new(width: u32, height: u32, encoding: FourCc, frame_rate: f64) -> Self {
        Self { width, height, encoding, frame_rate, autofocus: AutofocusMode::Default }
    }

    pub fn with_autofocus(mut self, autofocus: AutofocusMode) -> Self {
        self.autofocus = autofocus;
        self
    }

    /// Reject values no camera can satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SessionError::config(
                "frame size",
                format!("{}x{} must be non-zero", self.width, self.height),
            ));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(SessionError::config(
                "frame rate",
                format!("{} must be a positive number", self.frame_rate),
            ));
        }
        Ok(())
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::new(320, 240, FourCc::MJPG, 30.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fourcc_code_keeps_character_order(tag in "[A-Z0-9]{4}") {
            let fourcc: FourCc = tag.parse().unwrap();
            let code = fourcc.code();
            prop_assert_eq!((code & 0xff) as u8, tag.as_bytes()[0]);
            prop_assert_eq!((code >> 24) as u8, tag.as_bytes()[3]);
            prop_assert_eq!(fourcc.to_string(), tag);
        }
    }

    #[test]
    fn mjpg_matches_known_code() {
        assert_eq!(FourCc::MJPG.code(), 0x4750_4A4D);
        assert_eq!(FourCc::from_code(0x4750_4A4D), FourCc::MJPG);
    }

    #[test]
    fn fourcc_rejects_wrong_length() {
        assert!("MJP".parse::<FourCc>().is_err());
        assert!("MJPEG".parse::<FourCc>().is_err());
        assert!("MJ\u{e9}".parse::<FourCc>().is_err());
    }

    #[test]
    fn autofocus_parsing() {
        assert_eq!("on".parse::<AutofocusMode>().unwrap(), AutofocusMode::On);
        assert_eq!("OFF".parse::<AutofocusMode>().unwrap(), AutofocusMode::Off);
        assert_eq!("default".parse::<AutofocusMode>().unwrap(), AutofocusMode::Default);
        assert!("sometimes".parse::<AutofocusMode>().is_err());
        assert_eq!(AutofocusMode::Default.requested(), None);
        assert_eq!(AutofocusMode::Off.requested(), Some(false));
    }

    #[test]
    fn validate_rejects_zero_sizes_and_rates() {
        assert!(ParameterSet::default().validate().is_ok());
        assert!(ParameterSet::new(0, 240, FourCc::MJPG, 30.0).validate().is_err());
        assert!(ParameterSet::new(320, 240, FourCc::MJPG, 0.0).validate().is_err());
        assert!(ParameterSet::new(320, 240, FourCc::MJPG, f64::NAN).validate().is_err());
    }
}

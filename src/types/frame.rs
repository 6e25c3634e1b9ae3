//! Frame and endpoint types

use std::fmt;
use std::sync::Arc;

/// A single image payload retrieved from the device.
///
/// The payload is shared through an `Arc` so that publishing a frame to
/// consumers does not copy it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Image bytes as delivered by the device
    pub data: Arc<[u8]>,

    /// Monotonic capture counter, assigned by the controller
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self { data: data.into(), sequence }
    }

    /// Payload size in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// Session identity: the device's address and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

//! Device trait for remote capture endpoints

use crate::Result;
use crate::types::PropertyId;

/// Capability set of a remote capture device
///
/// Implementations wrap the device's RPC transport. Every call takes a
/// `keep_alive` flag: when set, the implementation holds one persistent
/// connection open across calls instead of connecting per call.
///
/// Return conventions:
/// - `Err(e)` - the call did not complete (connection refused, reset,
///   timed out, undecodable reply)
/// - `Ok(false)` / `Ok(None)` - the device answered but refused
///
/// Calls block the session for a full round trip; the controller never
/// issues two calls at once.
#[async_trait::async_trait]
pub trait Device: Send + 'static {
    /// Lightweight liveness check
    async fn ping(&mut self, keep_alive: bool) -> Result<bool>;

    /// Whether the camera is already open on the device side
    async fn is_opened(&mut self, keep_alive: bool) -> Result<bool>;

    /// Open the camera
    async fn open(&mut self, keep_alive: bool) -> Result<bool>;

    /// Write a property; `Ok(false)` when the device refuses the value
    async fn set_property(&mut self, id: PropertyId, value: f64, keep_alive: bool)
    -> Result<bool>;

    /// Read a property back
    async fn get_property(&mut self, id: PropertyId, keep_alive: bool) -> Result<f64>;

    /// Retrieve one frame payload
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - frame retrieved
    /// - `Ok(None)` - device answered without a frame
    /// - `Err(e)` - transport failure
    async fn retrieve(&mut self, keep_alive: bool) -> Result<Option<Vec<u8>>>;

    /// Close the camera; with `keep_alive == false` the persistent
    /// connection is torn down as well
    async fn release(&mut self, keep_alive: bool) -> Result<bool>;
}

#[async_trait::async_trait]
impl<D: Device + ?Sized> Device for Box<D> {
    async fn ping(&mut self, keep_alive: bool) -> Result<bool> {
        (**self).ping(keep_alive).await
    }

    async fn is_opened(&mut self, keep_alive: bool) -> Result<bool> {
        (**self).is_opened(keep_alive).await
    }

    async fn open(&mut self, keep_alive: bool) -> Result<bool> {
        (**self).open(keep_alive).await
    }

    async fn set_property(
        &mut self,
        id: PropertyId,
        value: f64,
        keep_alive: bool,
    ) -> Result<bool> {
        (**self).set_property(id, value, keep_alive).await
    }

    async fn get_property(&mut self, id: PropertyId, keep_alive: bool) -> Result<f64> {
        (**self).get_property(id, keep_alive).await
    }

    async fn retrieve(&mut self, keep_alive: bool) -> Result<Option<Vec<u8>>> {
        (**self).retrieve(keep_alive).await
    }

    async fn release(&mut self, keep_alive: bool) -> Result<bool> {
        (**self).release(keep_alive).await
    }
}


//! Test utilities: a scriptable in-memory device
//!
//! [`MockDevice`] behaves like a well-mannered camera service by default:
//! it answers probes, opens on request, stores whatever property value it is
//! given and returns fixed-size frames. Tests then inject faults, read-back
//! overrides and refusals to drive the controller through its failure paths,
//! and inspect the call log to check ordering.
//!
//! The device is a cheap handle over shared state, so a test can keep a
//! clone after moving the device into a controller.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::Device;
use crate::types::PropertyId;
use crate::{Result, SessionError};

/// Device operation, used to target faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Ping,
    IsOpened,
    Open,
    Set,
    Get,
    Retrieve,
    Release,
}

/// How a faulted call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call does not complete (`Err`)
    Transport,
    /// The device answers negatively (`Ok(false)` / `Ok(None)`)
    Refuse,
}

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ping { keep_alive: bool },
    IsOpened { keep_alive: bool },
    Open { keep_alive: bool },
    Set { id: PropertyId, value: f64, keep_alive: bool },
    Get { id: PropertyId, keep_alive: bool },
    Retrieve { keep_alive: bool },
    Release { keep_alive: bool },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::Ping { .. } => Op::Ping,
            Call::IsOpened { .. } => Op::IsOpened,
            Call::Open { .. } => Op::Open,
            Call::Set { .. } => Op::Set,
            Call::Get { .. } => Op::Get,
            Call::Retrieve { .. } => Op::Retrieve,
            Call::Release { .. } => Op::Release,
        }
    }
}

#[derive(Debug)]
struct MockState {
    opened: bool,
    properties: HashMap<PropertyId, f64>,
    readback: HashMap<PropertyId, f64>,
    queued_readback: HashMap<PropertyId, VecDeque<f64>>,
    property_faults: HashMap<PropertyId, Fault>,
    faults: HashMap<Op, VecDeque<Fault>>,
    frame_size: usize,
    calls: Vec<Call>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            opened: false,
            properties: HashMap::new(),
            readback: HashMap::new(),
            queued_readback: HashMap::new(),
            property_faults: HashMap::new(),
            faults: HashMap::new(),
            frame_size: 10_000,
            calls: Vec::new(),
        }
    }
}

impl MockState {
    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn read(&mut self, id: PropertyId) -> f64 {
        if let Some(value) = self.queued_readback.get_mut(&id).and_then(VecDeque::pop_front) {
            return value;
        }
        self.readback
            .get(&id)
            .or_else(|| self.properties.get(&id))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Scriptable in-memory [`Device`].
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next call of `op`.
    pub fn fail_next(&self, op: Op, fault: Fault) {
        self.fail_next_n(op, 1, fault);
    }

    /// Fail the next `n` calls of `op`.
    pub fn fail_next_n(&self, op: Op, n: usize, fault: Fault) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat_n(fault, n));
    }

    /// Always report `value` when `id` is read, whatever was written.
    pub fn report_back(&self, id: PropertyId, value: f64) {
        self.lock().readback.insert(id, value);
    }

    pub fn clear_report_back(&self, id: PropertyId) {
        self.lock().readback.remove(&id);
    }

    /// Report `values` on the next reads of `id`, one per read, before
    /// falling back to the usual answer.
    pub fn queue_report_back(&self, id: PropertyId, values: impl IntoIterator<Item = f64>) {
        self.lock().queued_readback.entry(id).or_default().extend(values);
    }

    /// Answer `Ok(false)` to every write of `id`.
    pub fn refuse_property(&self, id: PropertyId) {
        self.fault_property(id, Fault::Refuse);
    }

    /// Fail every write of `id` with `fault`.
    pub fn fault_property(&self, id: PropertyId, fault: Fault) {
        self.lock().property_faults.insert(id, fault);
    }

    pub fn set_frame_size(&self, bytes: usize) {
        self.lock().frame_size = bytes;
    }

    pub fn set_opened(&self, opened: bool) {
        self.lock().opened = opened;
    }

    pub fn is_open(&self) -> bool {
        self.lock().opened
    }

    /// Last value written to `id`, if any.
    pub fn property(&self, id: PropertyId) -> Option<f64> {
        self.lock().properties.get(&id).copied()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls of `op` so far.
    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn transport_error(op: Op) -> SessionError {
        SessionError::transport(format!("{op:?}").to_lowercase(), "mock link down")
    }
}

#[async_trait::async_trait]
impl Device for MockDevice {
    async fn ping(&mut self, keep_alive: bool) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(Call::Ping { keep_alive });
        match state.take_fault(Op::Ping) {
            Some(Fault::Transport) => Err(Self::transport_error(Op::Ping)),
            Some(Fault::Refuse) => Ok(false),
            None => Ok(true),
        }
    }

    async fn is_opened(&mut self, keep_alive: bool) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(Call::IsOpened { keep_alive });
        match state.take_fault(Op::IsOpened) {
            Some(Fault::Transport) => Err(Self::transport_error(Op::IsOpened)),
            Some(Fault::Refuse) => Ok(false),
            None => Ok(state.opened),
        }
    }

    async fn open(&mut self, keep_alive: bool) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(Call::Open { keep_alive });
        match state.take_fault(Op::Open) {
            Some(Fault::Transport) => Err(Self::transport_error(Op::Open)),
            Some(Fault::Refuse) => Ok(false),
            None => {
                state.opened = true;
                Ok(true)
            }
        }
    }

    async fn set_property(
        &mut self,
        id: PropertyId,
        value: f64,
        keep_alive: bool,
    ) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(Call::Set { id, value, keep_alive });
        let fault = state.take_fault(Op::Set).or_else(|| state.property_faults.get(&id).copied());
        match fault {
            Some(Fault::Transport) => Err(Self::transport_error(Op::Set)),
            Some(Fault::Refuse) => Ok(false),
            None => {
                state.properties.insert(id, value);
                Ok(true)
            }
        }
    }

    async fn get_property(&mut self, id: PropertyId, keep_alive: bool) -> Result<f64> {
        let mut state = self.lock();
        state.calls.push(Call::Get { id, keep_alive });
        match state.take_fault(Op::Get) {
            Some(_) => Err(Self::transport_error(Op::Get)),
            None => Ok(state.read(id)),
        }
    }

    async fn retrieve(&mut self, keep_alive: bool) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock();
        state.calls.push(Call::Retrieve { keep_alive });
        match state.take_fault(Op::Retrieve) {
            Some(Fault::Transport) => Err(Self::transport_error(Op::Retrieve)),
            Some(Fault::Refuse) => Ok(None),
            None if !state.opened => Ok(None),
            None => Ok(Some(vec![0u8; state.frame_size])),
        }
    }

    async fn release(&mut self, keep_alive: bool) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(Call::Release { keep_alive });
        match state.take_fault(Op::Release) {
            Some(Fault::Transport) => Err(Self::transport_error(Op::Release)),
            Some(Fault::Refuse) => Ok(false),
            None => {
                state.opened = false;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_reads_back_properties() {
        let mut device = MockDevice::new();
        assert!(device.set_property(PropertyId::FrameWidth, 640.0, true).await.unwrap());
        assert_eq!(device.get_property(PropertyId::FrameWidth, true).await.unwrap(), 640.0);

        device.report_back(PropertyId::FrameWidth, 160.0);
        assert_eq!(device.get_property(PropertyId::FrameWidth, true).await.unwrap(), 160.0);
        assert_eq!(device.property(PropertyId::FrameWidth), Some(640.0));
    }

    #[tokio::test]
    async fn queued_read_backs_are_answered_once_each() {
        let mut device = MockDevice::new();
        device.set_property(PropertyId::FrameRate, 30.0, true).await.unwrap();
        device.queue_report_back(PropertyId::FrameRate, [15.0, 30.05]);

        assert_eq!(device.get_property(PropertyId::FrameRate, true).await.unwrap(), 15.0);
        assert_eq!(device.get_property(PropertyId::FrameRate, true).await.unwrap(), 30.05);
        assert_eq!(device.get_property(PropertyId::FrameRate, true).await.unwrap(), 30.0);
    }

    #[tokio::test]
    async fn faults_are_consumed_in_order() {
        let mut device = MockDevice::new();
        device.fail_next(Op::Ping, Fault::Transport);
        device.fail_next(Op::Ping, Fault::Refuse);

        assert!(device.ping(false).await.is_err());
        assert!(!device.ping(false).await.unwrap());
        assert!(device.ping(false).await.unwrap());
        assert_eq!(device.count(Op::Ping), 3);
    }

    #[tokio::test]
    async fn closed_camera_yields_no_frame() {
        let mut device = MockDevice::new();
        assert_eq!(device.retrieve(true).await.unwrap(), None);
        device.open(true).await.unwrap();
        device.set_frame_size(42);
        assert_eq!(device.retrieve(true).await.unwrap().map(|f| f.len()), Some(42));
    }
}

//! Mock USB transport and backend for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{ControlRequest, TransportError, UsbBackend, UsbId, UsbTransport};
use crate::dfu::status::{DeviceState, DeviceStatus};

/// Mock transport for unit testing protocol logic.
///
/// Clones share state, so a test can keep a handle while the session owns
/// another one.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued responses to return on read.
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes as (endpoint, data).
    write_log: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    /// Captured control requests.
    control_log: Arc<Mutex<Vec<ControlRequest>>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Whether the interface was released.
    released: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_ids(0x0483, 0x3748)
    }

    pub fn with_ids(vid: u16, pid: u16) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            control_log: Arc::new(Mutex::new(Vec::new())),
            vid,
            pid,
            connected: Arc::new(Mutex::new(true)),
            released: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue a response to be returned on next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.responses.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a 6-byte GETSTATUS reply.
    pub fn queue_status(&self, status: DeviceStatus, state: DeviceState, poll_timeout_ms: u32) {
        let t = poll_timeout_ms.to_le_bytes();
        self.queue_response(&[status.as_u8(), t[0], t[1], t[2], state.as_u8(), 0]);
    }

    /// Queue the two polls of one successful download.
    pub fn queue_download_ok(&self, poll_timeout_ms: u32) {
        self.queue_status(DeviceStatus::Ok, DeviceState::DfuDnBusy, poll_timeout_ms);
        self.queue_status(DeviceStatus::Ok, DeviceState::DfuDnloadIdle, 0);
    }

    /// Queue the version and key-seed replies read when a session opens.
    pub fn queue_identity(&self, version: [u8; 6], seed_block: [u8; 20]) {
        self.queue_response(&version);
        self.queue_response(&seed_block);
    }

    /// Number of responses not consumed yet.
    pub fn pending_responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Get all captured control requests.
    pub fn get_control_requests(&self) -> Vec<ControlRequest> {
        self.control_log.lock().unwrap().clone()
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock().unwrap()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    fn check_usable(&self) -> Result<(), TransportError> {
        if *self.released.lock().unwrap() {
            return Err(TransportError::Released);
        }
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        self.check_usable()?;
        self.write_log
            .lock()
            .unwrap()
            .push((endpoint, data.to_vec()));
        Ok(data.len())
    }

    fn read(&self, _endpoint: u8, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.check_usable()?;
        let mut response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 5000 })?;
        response.truncate(max_len);
        Ok(response)
    }

    fn control_out(&self, request: ControlRequest) -> Result<(), TransportError> {
        self.check_usable()?;
        self.control_log.lock().unwrap().push(request);
        Ok(())
    }

    fn release(&mut self) {
        *self.released.lock().unwrap() = true;
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Mock backend replaying a script of enumeration passes.
///
/// Each call to `list()` consumes one pass; the last pass repeats forever.
#[derive(Clone, Default)]
pub struct MockBackend {
    passes: Arc<Mutex<VecDeque<Vec<MockTransport>>>>,
    current: Arc<Mutex<Vec<MockTransport>>>,
    open_log: Arc<Mutex<Vec<(u16, u16, u8)>>>,
    list_calls: Arc<Mutex<usize>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one enumeration pass listing `devices`.
    pub fn push_pass(&self, devices: Vec<MockTransport>) {
        self.passes.lock().unwrap().push_back(devices);
    }

    /// Opened devices as (vid, pid, interface).
    pub fn opened(&self) -> Vec<(u16, u16, u8)> {
        self.open_log.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    fn usb_id(device: &MockTransport, slot: usize) -> UsbId {
        UsbId {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            bus_id: "mock".to_string(),
            address: slot as u8,
        }
    }
}

impl UsbBackend for MockBackend {
    type Transport = MockTransport;

    fn list(&self) -> Result<Vec<UsbId>, TransportError> {
        *self.list_calls.lock().unwrap() += 1;

        let mut passes = self.passes.lock().unwrap();
        let mut current = self.current.lock().unwrap();
        if passes.len() > 1 {
            *current = passes.pop_front().unwrap_or_default();
        } else if let Some(last) = passes.front() {
            *current = last.clone();
        }

        Ok(current
            .iter()
            .enumerate()
            .map(|(slot, device)| Self::usb_id(device, slot))
            .collect())
    }

    fn open(&self, id: &UsbId, interface: u8) -> Result<MockTransport, TransportError> {
        let current = self.current.lock().unwrap();
        let device = current
            .get(id.address as usize)
            .filter(|d| d.vendor_id() == id.vendor_id && d.product_id() == id.product_id)
            .cloned()
            .ok_or(TransportError::DeviceNotFound {
                vid: id.vendor_id,
                pid: id.product_id,
            })?;

        self.open_log
            .lock()
            .unwrap()
            .push((id.vendor_id, id.product_id, interface));
        Ok(device)
    }
}

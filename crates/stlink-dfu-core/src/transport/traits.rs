//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for talking to one opened device and the
//! `UsbBackend` trait for enumerating/opening devices, allowing different
//! implementations (nusb, mock, etc.).

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Write failed on endpoint 0x{endpoint:02X}: {message}")]
    WriteFailed { endpoint: u8, message: String },

    #[error("Read failed on endpoint 0x{endpoint:02X}: {message}")]
    ReadFailed { endpoint: u8, message: String },

    #[error("Control request 0x{request:02X} failed: {message}")]
    ControlFailed { request: u8, message: String },

    #[error("Short transfer on endpoint 0x{endpoint:02X}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        endpoint: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Interface already released")]
    Released,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Class request addressed to an interface (bmRequestType 0x21).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Abstract USB transport interface for one opened, claimed device.
///
/// This trait enables:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to a bulk OUT endpoint.
    fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes from a bulk IN endpoint.
    fn read(&self, endpoint: u8, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Issue a class control OUT request without data stage.
    fn control_out(&self, request: ControlRequest) -> Result<(), TransportError>;

    /// Release the claimed interface. Further I/O fails with `Released`.
    fn release(&mut self);

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;

    /// Write `data` and fail unless every byte was accepted.
    fn write_all(&self, endpoint: u8, data: &[u8]) -> Result<(), TransportError> {
        let written = self.write(endpoint, data)?;
        if written != data.len() {
            return Err(TransportError::ShortTransfer {
                endpoint,
                expected: data.len(),
                actual: written,
            });
        }
        Ok(())
    }

    /// Read exactly `len` bytes in a single transfer.
    fn read_exact(&self, endpoint: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let data = self.read(endpoint, len)?;
        if data.len() != len {
            return Err(TransportError::ShortTransfer {
                endpoint,
                expected: len,
                actual: data.len(),
            });
        }
        Ok(data)
    }
}

/// Identity of an attached device as seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_id: String,
    pub address: u8,
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:04X} (bus {} addr {})",
            self.vendor_id, self.product_id, self.bus_id, self.address
        )
    }
}

/// Device enumeration and opening.
pub trait UsbBackend {
    type Transport: UsbTransport;

    /// Snapshot of currently attached devices.
    fn list(&self) -> Result<Vec<UsbId>, TransportError>;

    /// Open `id` and claim `interface`.
    fn open(&self, id: &UsbId, interface: u8) -> Result<Self::Transport, TransportError>;
}

//! nusb-based USB transport implementation.

use std::io::{Read, Write};
use std::time::Duration;

use nusb::transfer::{Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{ControlRequest, TransportError, UsbBackend, UsbId, UsbTransport};

/// Opens devices through nusb.
#[derive(Debug, Clone)]
pub struct NusbBackend {
    timeout: Duration,
}

impl NusbBackend {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

impl UsbBackend for NusbBackend {
    type Transport = NusbTransport;

    fn list(&self) -> Result<Vec<UsbId>, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

        Ok(devices
            .map(|d| UsbId {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                bus_id: d.bus_id().to_string(),
                address: d.device_address(),
            })
            .collect())
    }

    #[instrument(level = "info", skip(self), fields(device = %id))]
    fn open(&self, id: &UsbId, interface: u8) -> Result<NusbTransport, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?
            .find(|d| d.bus_id() == id.bus_id && d.device_address() == id.address)
            .ok_or(TransportError::DeviceNotFound {
                vid: id.vendor_id,
                pid: id.product_id,
            })?;

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let claimed = device.claim_interface(interface).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            }
        })?;

        info!(
            vendor_id = %format!("{:04X}", id.vendor_id),
            product_id = %format!("{:04X}", id.product_id),
            interface,
            "Device opened successfully"
        );

        Ok(NusbTransport {
            interface: Some(claimed),
            timeout: self.timeout,
            vid: id.vendor_id,
            pid: id.product_id,
        })
    }
}

/// nusb-based USB transport over one claimed interface.
pub struct NusbTransport {
    interface: Option<Interface>,
    timeout: Duration,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Released)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(endpoint = %format!("0x{:02X}", endpoint), len = data.len()))]
    fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        let ep = self
            .interface()?
            .endpoint::<Bulk, Out>(endpoint)
            .map_err(|e| TransportError::WriteFailed {
                endpoint,
                message: e.to_string(),
            })?;

        let mut writer = ep.writer(4096).with_write_timeout(self.timeout);
        let map_io = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: self.timeout_ms(),
            },
            _ => TransportError::WriteFailed {
                endpoint,
                message: e.to_string(),
            },
        };
        writer.write_all(data).map_err(&map_io)?;
        writer.flush().map_err(&map_io)?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(endpoint = %format!("0x{:02X}", endpoint), max_len))]
    fn read(&self, endpoint: u8, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface()?
            .endpoint::<Bulk, In>(endpoint)
            .map_err(|e| TransportError::ReadFailed {
                endpoint,
                message: e.to_string(),
            })?;

        let mut reader = ep.reader(4096).with_read_timeout(self.timeout);
        let mut buf = vec![0u8; max_len];

        let n = reader.read(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: self.timeout_ms(),
            },
            _ => TransportError::ReadFailed {
                endpoint,
                message: e.to_string(),
            },
        })?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    #[instrument(skip(self), fields(request = request.request))]
    fn control_out(&self, request: ControlRequest) -> Result<(), TransportError> {
        self.interface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: request.request,
                    value: request.value,
                    index: request.index,
                    data: &[],
                },
                self.timeout,
            )
            .wait()
            .map_err(|e| TransportError::ControlFailed {
                request: request.request,
                message: e.to_string(),
            })
    }

    fn release(&mut self) {
        if self.interface.take().is_some() {
            debug!(
                vid = %format!("{:04X}", self.vid),
                pid = %format!("{:04X}", self.pid),
                "Interface released"
            );
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

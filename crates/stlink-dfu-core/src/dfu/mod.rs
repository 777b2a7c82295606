//! DFU exchanges with the ST-Link loader.
//!
//! Every request is a 16-byte [`CommandFrame`] on the bulk OUT endpoint,
//! optionally followed by a payload and/or a fixed-size reply on bulk IN.
//! The exchanges here are stateless; ordering (erase, set-address, data) is
//! the caller's job.

pub mod status;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::crypto::{self, BLOCK_SIZE};
use crate::protocol::constants::*;
use crate::protocol::{CommandFrame, address_command, checksum};
use crate::session::{DeviceSession, Endpoints};
use crate::transport::{Delay, TransportError, UsbTransport};

pub use status::{DeviceState, DeviceStatus, DfuStatus};

#[derive(Error, Debug)]
pub enum DfuError {
    #[error("USB transfer failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected DFU state: expected {expected}, got {actual}")]
    UnexpectedState {
        expected: DeviceState,
        actual: DeviceState,
    },

    #[error("Unexpected DFU status: {status} (state {state})")]
    UnexpectedStatus {
        status: DeviceStatus,
        state: DeviceState,
    },

    #[error("Read-only protection active")]
    WriteProtected,

    #[error("Invalid address error")]
    InvalidAddress,

    #[error("Unknown error: status {status} (0x{:02X}), state {state} (0x{:02X})", .status.as_u8(), .state.as_u8())]
    Unexpected {
        status: DeviceStatus,
        state: DeviceState,
    },

    #[error("Payload of {length} bytes does not fit a {capacity}-byte buffer")]
    BufferTooSmall { length: usize, capacity: usize },

    #[error("Payload too large for one block: {length} bytes")]
    PayloadTooLarge { length: usize },
}

impl DfuError {
    /// Device refused the write because flash is protected.
    pub fn is_write_protected(&self) -> bool {
        matches!(self, DfuError::WriteProtected)
    }
}

/// Send `frame` and read back exactly `N` bytes.
pub(crate) fn exchange<T: UsbTransport, const N: usize>(
    transport: &T,
    endpoints: Endpoints,
    frame: &CommandFrame,
) -> Result<[u8; N], TransportError> {
    trace!(?frame, reply_len = N, "Exchange");
    transport.write_all(endpoints.out_ep, frame.as_bytes())?;
    let reply = transport.read_exact(endpoints.in_ep, N)?;
    reply
        .try_into()
        .map_err(|r: Vec<u8>| TransportError::ShortTransfer {
            endpoint: endpoints.in_ep,
            expected: N,
            actual: r.len(),
        })
}

/// DFU_GETSTATUS: one request, one 6-byte reply, no retries.
pub fn get_status<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
) -> Result<DfuStatus, TransportError> {
    let raw: [u8; DFU_STATUS_LEN] =
        exchange(session.transport(), session.endpoints(), &CommandFrame::get_status())?;
    let status = DfuStatus::from(raw);
    trace!(%status, "DFU status");
    Ok(status)
}

/// DFU_DNLOAD of `buffer[..length]` as `block`, then the two status polls.
///
/// Blocks >= 2 carry firmware and are encrypted in place first; the cipher
/// covers `length` rounded up to 16 bytes, so `buffer` must hold that much
/// (zero padded by the caller). Only `length` bytes go on the wire and the
/// checksum is taken over the plain bytes.
pub fn download<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
    buffer: &mut [u8],
    length: usize,
    block: u16,
) -> Result<(), DfuError> {
    let wire_len = u16::try_from(length).map_err(|_| DfuError::PayloadTooLarge { length })?;
    if length > buffer.len() {
        return Err(DfuError::BufferTooSmall {
            length,
            capacity: buffer.len(),
        });
    }

    let sum = checksum(&buffer[..length]);

    if block >= BLOCK_DATA {
        let cipher_len = length.next_multiple_of(BLOCK_SIZE);
        if cipher_len > buffer.len() {
            return Err(DfuError::BufferTooSmall {
                length: cipher_len,
                capacity: buffer.len(),
            });
        }
        crypto::encrypt(&session.identity().firmware_key, &mut buffer[..cipher_len]);
    }

    debug!(block, length, checksum = %format!("0x{:04X}", sum), "DFU download");

    let transport = session.transport();
    let out_ep = session.endpoints().out_ep;
    transport.write_all(out_ep, CommandFrame::download(block, sum, wire_len).as_bytes())?;
    transport.write_all(out_ep, &buffer[..length])?;

    // The loader answers the first poll while still busy with the block.
    let status = get_status(session)?;
    if status.state != DeviceState::DfuDnBusy {
        warn!(%status, "Unexpected state after download");
        return Err(DfuError::UnexpectedState {
            expected: DeviceState::DfuDnBusy,
            actual: status.state,
        });
    }
    if status.status != DeviceStatus::Ok {
        warn!(%status, "Unexpected status after download");
        return Err(DfuError::UnexpectedStatus {
            status: status.status,
            state: status.state,
        });
    }

    session.delay().delay_ms(u64::from(status.poll_timeout_ms));

    let status = get_status(session)?;
    if status.state != DeviceState::DfuDnloadIdle {
        warn!(%status, "Download not accepted");
        return Err(match status.status {
            DeviceStatus::ErrVendor => DfuError::WriteProtected,
            DeviceStatus::ErrTarget => DfuError::InvalidAddress,
            other => DfuError::Unexpected {
                status: other,
                state: status.state,
            },
        });
    }

    Ok(())
}

/// Send a 5-byte control payload on block 0.
fn control_download<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
    command: u8,
    argument: u32,
) -> Result<(), DfuError> {
    let mut payload = address_command(command, argument);
    let length = payload.len();
    download(session, &mut payload, length, BLOCK_CONTROL)
}

/// Erase the flash page containing `address` (V2 loader).
pub fn erase_page<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
    address: u32,
) -> Result<(), DfuError> {
    control_download(session, ERASE_COMMAND, address)
}

/// Erase flash sector `index` (V3 loader).
pub fn erase_sector<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
    index: u8,
) -> Result<(), DfuError> {
    control_download(session, ERASE_COMMAND, u32::from(index))
}

/// Point the next data block at `address`.
pub fn set_address<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
    address: u32,
) -> Result<(), DfuError> {
    control_download(session, SET_ADDRESS_POINTER_COMMAND, address)
}

/// Leave the loader and start the application. No reply is expected.
pub fn exit_dfu<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
) -> Result<(), TransportError> {
    debug!("Exiting DFU mode");
    session
        .transport()
        .write_all(session.endpoints().out_ep, CommandFrame::exit_dfu().as_bytes())
}

/// Current mode word, big-endian on the wire.
pub fn current_mode<T: UsbTransport, D: Delay>(
    session: &DeviceSession<T, D>,
) -> Result<u16, TransportError> {
    let raw: [u8; 2] = exchange(
        session.transport(),
        session.endpoints(),
        &CommandFrame::get_current_mode(),
    )?;
    Ok(BigEndian::read_u16(&raw))
}

/// Ask application firmware whether it can switch to the loader.
///
/// Returns the raw reply; [`DFU_SWITCH_READY`] means yes.
pub fn query_dfu_switch<T: UsbTransport>(
    transport: &T,
    endpoints: Endpoints,
) -> Result<u16, TransportError> {
    let raw: [u8; 2] = exchange(transport, endpoints, &CommandFrame::dfu_switch(false))?;
    Ok(BigEndian::read_u16(&raw))
}

/// Make application firmware reboot into the loader.
pub fn trigger_dfu_switch<T: UsbTransport>(
    transport: &T,
    endpoints: Endpoints,
) -> Result<(), TransportError> {
    transport.write_all(endpoints.out_ep, CommandFrame::dfu_switch(true).as_bytes())
}

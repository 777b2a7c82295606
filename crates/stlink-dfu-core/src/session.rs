//! Device session - an armed loader connection plus its configuration.

use std::fmt;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::dfu::{self, DfuError};
use crate::identity::{self, DeviceIdentity};
use crate::protocol::constants::{EP_IN, EP_OUT_APP, EP_OUT_V2, EP_OUT_V3, USB_TIMEOUT_MS};
use crate::transport::{Delay, ThreadDelay, UsbTransport};

/// Configuration for locating and flashing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout of every USB exchange.
    pub usb_timeout_ms: u64,
    /// Wait after a mode switch before enumerating again.
    pub settle_delay_ms: u64,
    /// Enumeration passes allowed after the first one.
    pub max_rescans: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            usb_timeout_ms: USB_TIMEOUT_MS,
            settle_delay_ms: 2000,
            max_rescans: 8,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Bootloader generation, decided once when the session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderVariant {
    /// ST-Link V2 / V2-1 loader: erase per chunk address.
    V2,
    /// ST-Link V3 loader: erase per flash sector.
    V3,
}

impl BootloaderVariant {
    pub fn endpoints(self) -> Endpoints {
        match self {
            BootloaderVariant::V2 => Endpoints::V2,
            BootloaderVariant::V3 => Endpoints::V3,
        }
    }
}

impl fmt::Display for BootloaderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootloaderVariant::V2 => write!(f, "V2"),
            BootloaderVariant::V3 => write!(f, "V3"),
        }
    }
}

/// Bulk endpoint pair used for every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub in_ep: u8,
    pub out_ep: u8,
}

impl Endpoints {
    pub const V2: Endpoints = Endpoints {
        in_ep: EP_IN,
        out_ep: EP_OUT_V2,
    };
    pub const V3: Endpoints = Endpoints {
        in_ep: EP_IN,
        out_ep: EP_OUT_V3,
    };
    /// Application firmware of every switchable ST-Link.
    pub const APPLICATION: Endpoints = Endpoints {
        in_ep: EP_IN,
        out_ep: EP_OUT_APP,
    };
}

/// An open loader connection.
///
/// Owns the transport exclusively; the claimed interface is released on
/// `close()` or when the session is dropped, whichever comes first.
///
/// Sessions only come from [`DeviceSession::open`], so the firmware key is
/// always read off the device before any data block is ciphered:
///
/// ```compile_fail
/// use stlink_dfu_core::{
///     BootloaderVariant, DeviceIdentity, DeviceSession, Endpoints, MockTransport, ThreadDelay,
/// };
///
/// let _ = DeviceSession::with_identity(
///     MockTransport::new(),
///     Endpoints::V2,
///     BootloaderVariant::V2,
///     DeviceIdentity::default(),
///     ThreadDelay,
/// );
/// ```
pub struct DeviceSession<T: UsbTransport, D: Delay = ThreadDelay> {
    transport: T,
    endpoints: Endpoints,
    variant: BootloaderVariant,
    identity: DeviceIdentity,
    delay: D,
    released: bool,
}

impl<T: UsbTransport, D: Delay> DeviceSession<T, D> {
    /// Wrap an opened loader and read its identity.
    #[instrument(level = "info", skip(transport, delay))]
    pub fn open(
        transport: T,
        endpoints: Endpoints,
        variant: BootloaderVariant,
        delay: D,
    ) -> Result<Self, DfuError> {
        let mut session = Self::with_identity(
            transport,
            endpoints,
            variant,
            DeviceIdentity::default(),
            delay,
        );
        session.identity = identity::read_identity(&session.transport, endpoints)?;
        info!(
            firmware = %session.identity.firmware_version(),
            loader = session.identity.loader_version,
            id = %session.identity.id_hex(),
            "Loader identity read"
        );
        Ok(session)
    }

    /// Build a session around an identity that is already known.
    pub(crate) fn with_identity(
        transport: T,
        endpoints: Endpoints,
        variant: BootloaderVariant,
        identity: DeviceIdentity,
        delay: D,
    ) -> Self {
        Self {
            transport,
            endpoints,
            variant,
            identity,
            delay,
            released: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn variant(&self) -> BootloaderVariant {
        self.variant
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Current mode word (1 while the loader runs).
    pub fn current_mode(&self) -> Result<u16, DfuError> {
        Ok(dfu::current_mode(self)?)
    }

    /// Release the interface and drop the session.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.transport.release();
            self.released = true;
            debug!(variant = %self.variant, "Session closed");
        }
    }
}

impl<T: UsbTransport, D: Delay> Drop for DeviceSession<T, D> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: UsbTransport, D: Delay> fmt::Debug for DeviceSession<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("vid", &format_args!("{:04X}", self.transport.vendor_id()))
            .field("pid", &format_args!("{:04X}", self.transport.product_id()))
            .field("endpoints", &self.endpoints)
            .field("variant", &self.variant)
            .field("released", &self.released)
            .finish()
    }
}

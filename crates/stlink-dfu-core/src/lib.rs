//! stlink-dfu-core: ST-Link bootloader DFU protocol in Rust.
//!
//! This crate talks to the loader that ships in ST-Link V2, V2-1 and V3
//! debug probes and reprograms their firmware area.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, 16-byte command frames, checksum
//! - **Crypto**: Firmware block cipher and key derivation
//! - **Transport**: USB communication abstraction (nusb, mock) and delays
//! - **DFU**: Status polling, download, erase and mode commands
//! - **Locator**: Enumeration, mode switching and loader arming
//! - **Flash**: Chunk planning and the programming run
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use stlink_dfu_core::{Locator, NusbBackend, SessionConfig, ThreadDelay, TracingObserver};
//!
//! let config = SessionConfig::default();
//! let locator = Locator::new(NusbBackend::new(config.usb_timeout_ms), ThreadDelay, config);
//! let session = locator.locate_and_arm(&TracingObserver).expect("no ST-Link");
//! let firmware = std::fs::read("stlink.bin").expect("read firmware");
//! stlink_dfu_core::flash(session, &firmware, &TracingObserver).expect("flash failed");
//! ```

pub mod crypto;
pub mod dfu;
pub mod events;
pub mod flash;
pub mod identity;
pub mod locator;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use dfu::{DeviceState, DeviceStatus, DfuError, DfuStatus};
pub use events::{FlashEvent, FlashObserver, FlashPhase, TracingObserver};
pub use flash::{FlashError, FlashPlan, FlashReport, flash};
pub use identity::DeviceIdentity;
pub use locator::{LocateError, Locator, ProductKind, classify};
pub use protocol::CommandFrame;
pub use session::{BootloaderVariant, DeviceSession, Endpoints, SessionConfig};
pub use transport::{
    Delay, MockBackend, MockTransport, NusbBackend, NusbTransport, ThreadDelay, TransportError,
    UsbBackend, UsbTransport,
};

//! Transport layer module.

pub mod delay;
pub mod mock;
pub mod nusb;
pub mod traits;

pub use delay::{Delay, RecordingDelay, ThreadDelay};
pub use mock::{MockBackend, MockTransport};
pub use nusb::{NusbBackend, NusbTransport};
pub use traits::{ControlRequest, TransportError, UsbBackend, UsbId, UsbTransport};

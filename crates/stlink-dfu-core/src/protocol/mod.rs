//! ST-Link loader protocol definitions.

pub mod constants;
pub mod frame;

pub use frame::{CommandFrame, address_command, checksum};

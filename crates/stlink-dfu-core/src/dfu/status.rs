//! DFU GETSTATUS reply: status code, poll timeout, state, string index.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::constants::DFU_STATUS_LEN;

macro_rules! raw_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
            /// Code outside the DFU 1.1 table.
            Other(u8),
        }

        impl $name {
            pub fn from_u8(raw: u8) -> Self {
                match raw {
                    $($value => Self::$variant,)*
                    other => Self::Other(other),
                }
            }

            pub fn as_u8(self) -> u8 {
                match self {
                    $(Self::$variant => $value,)*
                    Self::Other(raw) => raw,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($label),)*
                    Self::Other(raw) => write!(f, "0x{:02X}", raw),
                }
            }
        }
    };
}

raw_enum! {
    /// bStatus. Not the same as state.
    pub enum DeviceStatus {
        Ok = 0x00 => "OK",
        /// File is not targeted for use by this device (invalid address on ST-Link).
        ErrTarget = 0x01 => "errTARGET",
        ErrFile = 0x02 => "errFILE",
        ErrWrite = 0x03 => "errWRITE",
        ErrErase = 0x04 => "errERASE",
        ErrCheckErased = 0x05 => "errCHECK_ERASED",
        ErrProg = 0x06 => "errPROG",
        ErrVerify = 0x07 => "errVERIFY",
        ErrAddress = 0x08 => "errADDRESS",
        ErrNotDone = 0x09 => "errNOTDONE",
        ErrFirmware = 0x0A => "errFIRMWARE",
        /// Vendor-specific error (read-out protection on ST-Link).
        ErrVendor = 0x0B => "errVENDOR",
        ErrUsbr = 0x0C => "errUSBR",
        ErrPor = 0x0D => "errPOR",
        ErrUnknown = 0x0E => "errUNKNOWN",
        ErrStalledPkt = 0x0F => "errSTALLEDPKT",
    }
}

raw_enum! {
    /// bState. Not the same as status.
    pub enum DeviceState {
        AppIdle = 0 => "appIDLE",
        AppDetach = 1 => "appDETACH",
        DfuIdle = 2 => "dfuIDLE",
        DfuDnloadSync = 3 => "dfuDNLOAD-SYNC",
        /// Device is programming a block into its nonvolatile memory.
        DfuDnBusy = 4 => "dfuDNBUSY",
        /// Device is expecting further DNLOAD requests.
        DfuDnloadIdle = 5 => "dfuDNLOAD-IDLE",
        DfuManifestSync = 6 => "dfuMANIFEST-SYNC",
        DfuManifest = 7 => "dfuMANIFEST",
        DfuManifestWaitReset = 8 => "dfuMANIFEST-WAIT-RESET",
        DfuUploadIdle = 9 => "dfuUPLOAD-IDLE",
        DfuError = 10 => "dfuERROR",
    }
}

/// Decoded 6-byte status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatus {
    pub status: DeviceStatus,
    /// Minimum wait before the next GETSTATUS (24-bit).
    pub poll_timeout_ms: u32,
    pub state: DeviceState,
    pub string_index: u8,
}

impl From<[u8; DFU_STATUS_LEN]> for DfuStatus {
    fn from(raw: [u8; DFU_STATUS_LEN]) -> Self {
        Self {
            status: DeviceStatus::from_u8(raw[0]),
            poll_timeout_ms: LittleEndian::read_u24(&raw[1..4]),
            state: DeviceState::from_u8(raw[4]),
            string_index: raw[5],
        }
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} state={} poll={}ms",
            self.status, self.state, self.poll_timeout_ms
        )
    }
}

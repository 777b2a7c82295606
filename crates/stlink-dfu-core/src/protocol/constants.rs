//! Protocol constants for the ST-Link bootloader.
//!
//! Derived from the ST-Link V2/V2-1/V3 loader command set.

// ============================================================================
// Device Identification
// ============================================================================

/// STMicroelectronics Vendor ID
pub const ST_VENDOR_ID: u16 = 0x0483;

/// ST-Link V2 bootloader (DFU mode)
pub const STLINK_V2_BOOTLOADER_PID: u16 = 0x3748;
/// ST-Link V3 bootloader (DFU mode)
pub const STLINK_V3_BOOTLOADER_PID: u16 = 0x374D;
/// ST-Link V2-1 application firmware
pub const STLINK_V21_APP_PID: u16 = 0x374B;
/// ST-Link V2-1 application firmware without mass storage
pub const STLINK_V21_MSD_PID: u16 = 0x3752;
/// ST-Link V3 application firmware
pub const STLINK_V3_APP_PID: u16 = 0x374F;

/// PIDs that need the software mode switch before they expose the loader
pub const APPLICATION_PIDS: &[u16] = &[
    STLINK_V21_APP_PID,
    STLINK_V21_MSD_PID,
    STLINK_V3_APP_PID,
];

/// OpenMoko Vendor ID (Black Magic Probe)
pub const OPENMOKO_VENDOR_ID: u16 = 0x1D50;
/// Black Magic Probe application firmware
pub const BMP_APPLICATION_PID: u16 = 0x6018;
/// Interface carrying the BMP DFU runtime descriptor
pub const BMP_DFU_INTERFACE: u8 = 4;
/// wValue (detach timeout) used in the BMP DFU_DETACH request
pub const BMP_DETACH_TIMEOUT_MS: u16 = 1000;

// ============================================================================
// Endpoints
// ============================================================================

/// Bulk IN endpoint, all revisions
pub const EP_IN: u8 = 0x81;
/// Bulk OUT endpoint, V2 loader
pub const EP_OUT_V2: u8 = 0x02;
/// Bulk OUT endpoint, V3 loader
pub const EP_OUT_V3: u8 = 0x01;
/// Bulk OUT endpoint of the application firmware (V2-1 and V3 alike)
pub const EP_OUT_APP: u8 = 0x01;

/// Default per-exchange USB timeout
pub const USB_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Command Magic Bytes (first byte of every 16-byte frame)
// ============================================================================

/// Get firmware version
pub const CMD_GET_VERSION: u8 = 0xF1;
/// DFU command class
pub const CMD_DFU: u8 = 0xF3;
/// Get current mode
pub const CMD_GET_CURRENT_MODE: u8 = 0xF5;
/// Application-to-loader mode switch
pub const CMD_DFU_SWITCH: u8 = 0xF9;

/// Second byte of the version request
pub const GET_VERSION_SUBCOMMAND: u8 = 0x80;
/// DFU opcode returning the 20-byte key seed / device id block
pub const DFU_GET_KEY_SEED: u8 = 0x08;

/// Mode-switch query reply meaning "ready to switch"
pub const DFU_SWITCH_READY: u16 = 0x8000;

/// Current-mode word reported while the loader is running
pub const MODE_DFU: u16 = 0x0001;

// ============================================================================
// DFU Opcodes (second byte of a `CMD_DFU` frame)
// ============================================================================

pub const DFU_DETACH: u8 = 0x00;
pub const DFU_DNLOAD: u8 = 0x01;
pub const DFU_GETSTATUS: u8 = 0x03;
/// Leave the loader and start the application
pub const DFU_EXIT: u8 = 0x07;

/// Length of the GETSTATUS reply
pub const DFU_STATUS_LEN: usize = 6;

// ============================================================================
// Download Payload Commands (first byte of a block-0 payload)
// ============================================================================

pub const SET_ADDRESS_POINTER_COMMAND: u8 = 0x21;
pub const ERASE_COMMAND: u8 = 0x41;

/// Block number for control payloads (erase, set-address)
pub const BLOCK_CONTROL: u16 = 0;
/// Block number for firmware data following an erase
pub const BLOCK_DATA: u16 = 2;
/// Block number for firmware data continuing an already-erased sector
pub const BLOCK_CONTINUATION: u16 = 3;

// ============================================================================
// Firmware Key
// ============================================================================

/// Passphrase the per-device firmware key is derived with
pub const FIRMWARE_KEY_PASSPHRASE: &[u8; 16] = b"I am key, wawawa";

// ============================================================================
// Flash Layout
// ============================================================================

/// Size of every download chunk
pub const CHUNK_SIZE: usize = 1024;

/// Application start for the V2 loader (STM32F103)
pub const V2_BASE_ADDRESS: u32 = 0x0800_4000;
/// Application start for the V3 loader (STM32F723)
pub const V3_BASE_ADDRESS: u32 = 0x0802_0000;

/// Start addresses of the STM32F723 flash sectors
pub const V3_SECTOR_STARTS: [u32; 8] = [
    0x0800_0000,
    0x0800_4000,
    0x0800_8000,
    0x0800_C000,
    0x0801_0000,
    0x0802_0000,
    0x0804_0000,
    0x0806_0000,
];
/// End of the STM32F723 flash (exclusive)
pub const V3_FLASH_END: u32 = 0x0808_0000;

/// Sector erases are only possible on 16 KiB boundaries
pub const V3_SECTOR_ALIGN: u32 = 16 * 1024;

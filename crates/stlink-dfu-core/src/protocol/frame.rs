//! 16-byte command frames sent on the bulk OUT endpoint.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;

/// A single loader command.
///
/// Layout: `[magic][opcode][wValue LE16][wIndex LE16][wLength LE16][reserved; 8]`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: [u8; Self::SIZE],
}

impl CommandFrame {
    pub const SIZE: usize = 16;

    /// Frame with only the magic and opcode bytes set.
    pub fn new(magic: u8, opcode: u8) -> Self {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = magic;
        bytes[1] = opcode;
        Self { bytes }
    }

    /// DFU class frame with the three setup words filled in.
    pub fn dfu(opcode: u8, value: u16, index: u16, length: u16) -> Self {
        let mut frame = Self::new(CMD_DFU, opcode);
        LittleEndian::write_u16(&mut frame.bytes[2..4], value);
        LittleEndian::write_u16(&mut frame.bytes[4..6], index);
        LittleEndian::write_u16(&mut frame.bytes[6..8], length);
        frame
    }

    /// DNLOAD header for a payload of `length` bytes.
    pub fn download(block: u16, checksum: u16, length: u16) -> Self {
        Self::dfu(DFU_DNLOAD, block, checksum, length)
    }

    pub fn get_status() -> Self {
        Self::dfu(DFU_GETSTATUS, 0, 0, DFU_STATUS_LEN as u16)
    }

    pub fn exit_dfu() -> Self {
        Self::new(CMD_DFU, DFU_EXIT)
    }

    pub fn get_version() -> Self {
        Self::new(CMD_GET_VERSION, GET_VERSION_SUBCOMMAND)
    }

    pub fn get_key_seed() -> Self {
        Self::new(CMD_DFU, DFU_GET_KEY_SEED)
    }

    pub fn get_current_mode() -> Self {
        Self::new(CMD_GET_CURRENT_MODE, 0)
    }

    /// Application-mode switch: `trigger == false` queries readiness,
    /// `trigger == true` performs the switch.
    pub fn dfu_switch(trigger: bool) -> Self {
        Self::new(CMD_DFU_SWITCH, if trigger { DFU_DNLOAD } else { 0 })
    }

    pub fn magic(&self) -> u8 {
        self.bytes[0]
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[1]
    }

    pub fn value(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[2..4])
    }

    pub fn index(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[4..6])
    }

    pub fn length(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[6..8])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse a frame captured from the wire (used by mocks and tests).
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::SIZE] = data.get(..Self::SIZE)?.try_into().ok()?;
        Some(Self { bytes })
    }
}

impl std::fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CommandFrame({:02X} {:02X} value={:#06X} index={:#06X} length={})",
            self.magic(),
            self.opcode(),
            self.value(),
            self.index(),
            self.length()
        )
    }
}

/// Loader checksum: byte sum truncated to 16 bits.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// 5-byte `[command][u32 LE]` payload used by erase and set-address.
pub fn address_command(command: u8, argument: u32) -> [u8; 5] {
    let mut payload = [0u8; 5];
    payload[0] = command;
    LittleEndian::write_u32(&mut payload[1..], argument);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_get_status_frame() {
        let frame = CommandFrame::get_status();
        assert_eq!(
            frame.as_bytes(),
            &hex!("f3030000000006000000000000000000")
        );
    }

    #[test]
    fn test_download_frame_layout() {
        let frame = CommandFrame::download(2, 0xBEEF, 1024);
        assert_eq!(
            frame.as_bytes(),
            &hex!("f3010200efbe00040000000000000000")
        );
        assert_eq!(frame.value(), 2);
        assert_eq!(frame.index(), 0xBEEF);
        assert_eq!(frame.length(), 1024);
    }

    #[test]
    fn test_fixed_frames() {
        assert_eq!(
            CommandFrame::get_version().as_bytes(),
            &hex!("f1800000000000000000000000000000")
        );
        assert_eq!(
            CommandFrame::get_key_seed().as_bytes(),
            &hex!("f3080000000000000000000000000000")
        );
        assert_eq!(
            CommandFrame::get_current_mode().as_bytes(),
            &hex!("f5000000000000000000000000000000")
        );
        assert_eq!(CommandFrame::dfu_switch(false).as_bytes()[..2], hex!("f900"));
        assert_eq!(CommandFrame::dfu_switch(true).as_bytes()[..2], hex!("f901"));
        assert_eq!(CommandFrame::exit_dfu().as_bytes()[..2], hex!("f307"));
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        // 300 * 0xFF = 76500 = 0x12AD4 -> truncated
        assert_eq!(checksum(&[0xFF; 300]), (76500u32 & 0xFFFF) as u16);
    }

    #[test]
    fn test_checksum_is_order_independent() {
        let data: Vec<u8> = (0..=255u8).cycle().take(2000).collect();
        let mut reversed = data.clone();
        reversed.reverse();
        let mut rotated = data.clone();
        rotated.rotate_left(777);
        assert_eq!(checksum(&data), checksum(&reversed));
        assert_eq!(checksum(&data), checksum(&rotated));
    }

    #[test]
    fn test_address_command() {
        assert_eq!(
            address_command(ERASE_COMMAND, 0x0800_4000),
            hex!("4100400008")
        );
        assert_eq!(
            address_command(SET_ADDRESS_POINTER_COMMAND, 0x0802_0400),
            hex!("2100040208")
        );
    }
}

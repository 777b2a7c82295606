//! Loader identity: firmware versions, device id and the derived firmware key.

use std::fmt::Write as _;

use byteorder::{ByteOrder, LittleEndian};

use crate::crypto;
use crate::dfu::{self, DfuError};
use crate::protocol::CommandFrame;
use crate::session::Endpoints;
use crate::transport::UsbTransport;

/// Length of the version reply.
pub const VERSION_REPLY_LEN: usize = 6;
/// Length of the key-seed reply.
pub const KEY_SEED_REPLY_LEN: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub stlink_version: u8,
    pub jtag_version: u8,
    pub swim_version: u8,
    pub loader_version: u16,
    /// Unique device id (bytes 8..20 of the key-seed reply).
    pub id: [u8; 12],
    /// Key for every firmware block; derived from `id` and the seed prefix.
    pub firmware_key: [u8; 16],
}

impl DeviceIdentity {
    /// Decode the two identity replies.
    ///
    /// Version word bit packing: `VVVV JJJJ | JJ SSSSSS`.
    pub fn from_replies(
        version: &[u8; VERSION_REPLY_LEN],
        seed_block: &[u8; KEY_SEED_REPLY_LEN],
    ) -> Self {
        let mut id = [0u8; 12];
        id.copy_from_slice(&seed_block[8..20]);

        let mut seed = [0u8; 16];
        seed[..4].copy_from_slice(&seed_block[..4]);
        seed[4..].copy_from_slice(&seed_block[8..20]);

        Self {
            stlink_version: version[0] >> 4,
            jtag_version: (version[0] & 0x0F) << 2 | (version[1] & 0xC0) >> 6,
            swim_version: version[1] & 0x3F,
            loader_version: LittleEndian::read_u16(&version[4..6]),
            id,
            firmware_key: crypto::derive_key(&seed),
        }
    }

    /// `V{stlink}J{jtag}S{swim}`, as printed by ST tools.
    pub fn firmware_version(&self) -> String {
        format!(
            "V{}J{}S{}",
            self.stlink_version, self.jtag_version, self.swim_version
        )
    }

    pub fn id_hex(&self) -> String {
        to_hex(&self.id)
    }

    pub fn firmware_key_hex(&self) -> String {
        to_hex(&self.firmware_key)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02X}", b);
        s
    })
}

/// Issue the version and key-seed requests and decode the replies.
pub fn read_identity<T: UsbTransport>(
    transport: &T,
    endpoints: Endpoints,
) -> Result<DeviceIdentity, DfuError> {
    let version: [u8; VERSION_REPLY_LEN] =
        dfu::exchange(transport, endpoints, &CommandFrame::get_version())?;
    let seed_block: [u8; KEY_SEED_REPLY_LEN] =
        dfu::exchange(transport, endpoints, &CommandFrame::get_key_seed())?;
    Ok(DeviceIdentity::from_replies(&version, &seed_block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use hex_literal::hex;

    fn seed_block() -> [u8; 20] {
        hex!("11223344 aaaaaaaa 0102030405060708090a0b0c")
    }

    #[test]
    fn test_version_bit_packing() {
        let identity = DeviceIdentity::from_replies(&hex!("2143 0000 2500"), &seed_block());
        assert_eq!(identity.stlink_version, 2);
        // (0x1 << 2) | (0x43 & 0xC0) >> 6 = 0x04 | 0x01
        assert_eq!(identity.jtag_version, 0x05);
        assert_eq!(identity.swim_version, 0x03);
        assert_eq!(identity.loader_version, 0x0025);
        assert_eq!(identity.firmware_version(), "V2J5S3");
    }

    #[test]
    fn test_version_bit_packing_full_fields() {
        // V3, JTAG 0b111111, SWIM 0b111111
        let identity = DeviceIdentity::from_replies(&hex!("3fff 0000 3412"), &seed_block());
        assert_eq!(identity.stlink_version, 3);
        assert_eq!(identity.jtag_version, 0x3F);
        assert_eq!(identity.swim_version, 0x3F);
        assert_eq!(identity.loader_version, 0x1234);
    }

    #[test]
    fn test_id_and_key_seed() {
        let identity = DeviceIdentity::from_replies(&[0; 6], &seed_block());
        assert_eq!(identity.id, hex!("0102030405060708090a0b0c"));
        assert_eq!(identity.id_hex(), "0102030405060708090A0B0C");

        let expected = crypto::derive_key(&hex!("11223344 0102030405060708090a0b0c"));
        assert_eq!(identity.firmware_key, expected);
    }

    #[test]
    fn test_key_ignores_bytes_4_to_8() {
        let mut other = seed_block();
        other[4..8].copy_from_slice(&[0x55; 4]);
        let a = DeviceIdentity::from_replies(&[0; 6], &seed_block());
        let b = DeviceIdentity::from_replies(&[0; 6], &other);
        assert_eq!(a.firmware_key, b.firmware_key);
    }

    #[test]
    fn test_read_identity_frames() {
        let mock = MockTransport::new();
        mock.queue_identity(hex!("2143 0000 2500"), seed_block());

        let identity = read_identity(&mock, Endpoints::V2).unwrap();
        assert_eq!(identity.loader_version, 0x25);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, 0x02);
        assert_eq!(writes[0].1, hex!("f1800000000000000000000000000000"));
        assert_eq!(writes[1].1, hex!("f3080000000000000000000000000000"));
    }

    #[test]
    fn test_read_identity_short_reply() {
        let mock = MockTransport::new();
        mock.queue_response(&hex!("2143 0000 2500"));
        mock.queue_response(&[0u8; 12]);
        assert!(matches!(
            read_identity(&mock, Endpoints::V2),
            Err(DfuError::Transport(_))
        ));
    }
}

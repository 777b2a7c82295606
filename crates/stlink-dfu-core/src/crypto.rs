//! Firmware transport cipher.
//!
//! The loader expects every firmware block to be AES-128-ECB encrypted with a
//! per-device key. Both key and data are handled as big-endian 32-bit words,
//! so each 4-byte group is swapped before and after the block pass.

use aes::Aes128;
use cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::protocol::constants::FIRMWARE_KEY_PASSPHRASE;

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Swap byte order inside every 4-byte word. Trailing bytes are left as is.
pub fn byteswap_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(4) {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        word.copy_from_slice(&value.to_be_bytes());
    }
}

/// Encrypt `data` in place with `key`.
///
/// `data.len()` must be a multiple of [`BLOCK_SIZE`]; callers pad.
pub fn encrypt(key: &[u8; 16], data: &mut [u8]) {
    debug_assert!(data.len() % BLOCK_SIZE == 0, "unpadded cipher input");

    let mut key_be = *key;
    byteswap_words(&mut key_be);
    let cipher = Aes128::new(GenericArray::from_slice(&key_be));

    byteswap_words(data);
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    byteswap_words(data);
}

/// Derive the firmware key from the 16 seed bytes read off the device.
pub fn derive_key(seed: &[u8; 16]) -> [u8; 16] {
    let mut key = *seed;
    encrypt(FIRMWARE_KEY_PASSPHRASE, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_byteswap_words() {
        let mut data = hex!("0102030405060708");
        byteswap_words(&mut data);
        assert_eq!(data, hex!("0403020108070605"));
    }

    #[test]
    fn test_byteswap_is_involution() {
        let original: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
        let mut data = original.clone();
        byteswap_words(&mut data);
        assert_ne!(data, original);
        byteswap_words(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_encrypt_word_order() {
        // FIPS-197 C.1 vector, fed in as little-endian words.
        let key = hex!("03020100 07060504 0b0a0908 0f0e0d0c");
        let mut data = hex!("33221100 77665544 bbaa9988 ffeeddcc");
        encrypt(&key, &mut data);
        assert_eq!(data, hex!("d8e0c469 30047b6a 80b7cdd8 5ac5b470"));
    }

    #[test]
    fn test_encrypt_is_deterministic() {
        let key = derive_key(&hex!("0123456789abcdef0011223344556677"));
        let plain: Vec<u8> = (0..64u8).collect();

        let mut first = plain.clone();
        let mut second = plain.clone();
        encrypt(&key, &mut first);
        encrypt(&key, &mut second);

        assert_eq!(first, second);
        assert_ne!(first, plain);
        // ECB: identical plaintext blocks map to identical ciphertext blocks
        let mut repeated = [0x5Au8; 32];
        encrypt(&key, &mut repeated);
        assert_eq!(repeated[..16], repeated[16..]);
    }

    #[test]
    fn test_encrypt_twice_does_not_restore() {
        let key = derive_key(&[0x11; 16]);
        let plain = [0xA5u8; 16];
        let mut data = plain;
        encrypt(&key, &mut data);
        encrypt(&key, &mut data);
        assert_ne!(data, plain);
    }

    #[test]
    fn test_derive_key_depends_only_on_seed() {
        let seed_a = [0x42u8; 16];
        let mut seed_b = seed_a;
        seed_b[15] ^= 1;

        assert_eq!(derive_key(&seed_a), derive_key(&seed_a));
        assert_ne!(derive_key(&seed_a), derive_key(&seed_b));
    }
}

//! Base-58 encoding with checksum.
//!
//! Addresses, WIF keys and extended keys append the first 4 bytes of the sha256d of the payload
//! before base-58 encoding.

use crate::bitcoin::Hash;
use crate::{Error, Result};
use base58::{FromBase58, ToBase58};

const CHECKSUM_LEN: usize = 4;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut out = [0; CHECKSUM_LEN];
    out.copy_from_slice(&Hash::sha256d(payload).raw[..CHECKSUM_LEN]);
    out
}

/// Append the checksum to `payload` and base-58 encode the result.
pub fn encode_with_checksum(payload: &[u8]) -> String {
    [payload, &checksum(payload)].concat().to_base58()
}

/// Base-58 decode `encoded` and strip its checksum, which must match the payload.
pub fn decode_with_checksum(encoded: &str) -> Result<Vec<u8>> {
    let mut data = encoded.from_base58()?;
    if data.len() <= CHECKSUM_LEN {
        return Err(Error::BadData(format!(
            "{} decoded bytes cannot carry a checksum",
            data.len()
        )));
    }
    let payload_len = data.len() - CHECKSUM_LEN;
    if checksum(&data[..payload_len]) != data[payload_len..] {
        return Err(Error::ChecksumMismatch);
    }
    data.truncate(payload_len);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // hash160 of the compressed generator point behind the mainnet version byte
    const KEY_ONE: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";
    const PAYLOAD: [u8; 21] = hex!("00751e76e8199196d454941c45d1b3a323f1433bd6");

    #[test]
    fn encodes_address() {
        assert_eq!(encode_with_checksum(&PAYLOAD), KEY_ONE);
        assert_eq!(decode_with_checksum(KEY_ONE).unwrap(), PAYLOAD);
    }

    #[test]
    fn leading_zero_bytes_become_ones() {
        let encoded = encode_with_checksum(&[0, 0, 7]);
        assert!(encoded.starts_with("11"));
        assert_eq!(decode_with_checksum(&encoded).unwrap(), vec![0, 0, 7]);
    }

    #[test]
    fn corrupted_checksum() {
        let mut chars: Vec<char> = KEY_ONE.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'H' { 'J' } else { 'H' };
        let tampered: String = chars.into_iter().collect();
        assert!(matches!(
            decode_with_checksum(&tampered),
            Err(Error::ChecksumMismatch)
        ));
        assert!(decode_with_checksum("0OIl").is_err());
        assert!(decode_with_checksum("1").is_err());
    }
}

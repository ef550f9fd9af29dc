use crate::bitcoin::Encodable;
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use hex::{FromHex, ToHex};
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A double SHA256 digest. Transactions and blocks are identified by one.
///
/// `raw` is in wire order. Hex strings are byte-reversed, the way block explorers and node RPCs
/// print txids and block hashes. Prefer the [TxHash] and [BlockHash] aliases.
///
/// [TxHash]: crate::bitcoin::TxHash
/// [BlockHash]: crate::bitcoin::BlockHash
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash {
    pub raw: [u8; 32],
}

impl Hash {
    pub const SIZE: u64 = 32;
    pub const ZERO: Hash = Hash { raw: [0; 32] };

    pub fn sha256d(data: &[u8]) -> Hash {
        let once = digest(&SHA256, data);
        let twice = digest(&SHA256, once.as_ref());
        let mut raw = [0; 32];
        raw.copy_from_slice(twice.as_ref());
        Hash { raw }
    }

    /// 32 bytes in wire order.
    pub fn from_slice(slice: &[u8]) -> Result<Hash> {
        <[u8; 32]>::try_from(slice)
            .map(|raw| Hash { raw })
            .map_err(|_| Error::BadArgument(format!("hash must be 32 bytes, got {}", slice.len())))
    }

    /// The bytes in display order.
    fn reversed(&self) -> [u8; 32] {
        let mut bytes = self.raw;
        bytes.reverse();
        bytes
    }
}

impl Encodable for Hash {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        let mut raw = [0; 32];
        buffer
            .try_copy_to_slice(&mut raw)
            .map_err(|_| Error::DataTooSmall)?;
        Ok(Hash { raw })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        buffer.put_slice(&self.raw);
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        Self::SIZE
    }
}

impl FromHex for Hash {
    type Error = Error;

    /// Parse 64 hex characters in display order.
    fn from_hex<T: AsRef<[u8]>>(hex: T) -> std::result::Result<Self, Self::Error> {
        let hex = hex.as_ref();
        if hex.len() != 64 {
            return Err(Error::BadArgument(format!(
                "a hash is 64 hex characters, got {}",
                hex.len()
            )));
        }
        let mut raw = <[u8; 32]>::from_hex(hex)?;
        raw.reverse();
        Ok(Hash { raw })
    }
}

impl ToHex for Hash {
    fn encode_hex<T: FromIterator<char>>(&self) -> T {
        self.reversed().encode_hex()
    }

    fn encode_hex_upper<T: FromIterator<char>>(&self) -> T {
        self.reversed().encode_hex_upper()
    }
}

impl From<[u8; 32]> for Hash {
    fn from(raw: [u8; 32]) -> Self {
        Hash { raw }
    }
}

impl Ord for Hash {
    // same order as the hex strings
    fn cmp(&self, other: &Hash) -> Ordering {
        self.raw.iter().rev().cmp(other.raw.iter().rev())
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Hash) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.encode_hex::<String>())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn txid_of_testnet_genesis_coinbase() {
        // the genesis coinbase is the merkle root of every network's genesis block
        let root = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        let h = Hash::from_hex(root).unwrap();
        assert_eq!(h.raw[0], 0x3b);
        assert_eq!(h.raw[31], 0x4a);
        assert_eq!(h.to_string(), root);
    }

    #[test]
    fn sha256d_of_empty_input() {
        assert_eq!(
            hex::encode(Hash::sha256d(&[]).raw),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(Hash::from_hex("00").is_err());
        assert!(Hash::from_hex("zz".repeat(32)).is_err());
        assert!(Hash::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn ordering_follows_display() {
        let low = Hash::from_hex(format!("01{}", "ff".repeat(31))).unwrap();
        let high = Hash::from_hex(format!("02{}", "00".repeat(31))).unwrap();
        assert!(low < high);
        assert!(low.to_string() < high.to_string());
    }

    #[test]
    fn short_read_fails() {
        let mut b = Bytes::from_static(&[0u8; 31]);
        assert!(matches!(Hash::from_binary(&mut b), Err(Error::DataTooSmall)));
    }

    #[test]
    fn json_is_the_display_string() {
        let h = Hash::sha256d(b"wallet");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        assert_eq!(serde_json::from_str::<Hash>(&json).unwrap(), h);
    }
}

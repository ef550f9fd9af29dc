use crate::{Error, Result};
use hex::{FromHex, ToHex};
use ring::digest::{digest, SHA256};
use ripemd::{Digest, Ripemd160};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// RIPEMD160 of SHA256, the public key commitment inside a P2PKH address.
///
/// Printed in byte order, unlike [Hash](crate::bitcoin::Hash).
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash160 {
    pub hash: [u8; Self::SIZE],
}

impl Hash160 {
    pub const SIZE: usize = 20;
    pub const ZERO: Hash160 = Hash160 {
        hash: [0; Self::SIZE],
    };

    pub fn generate(data: &[u8]) -> Hash160 {
        let inner = digest(&SHA256, data);
        let mut hash = [0; Self::SIZE];
        hash.copy_from_slice(&Ripemd160::digest(inner.as_ref()));
        Hash160 { hash }
    }

    /// Build from 20 raw bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Hash160> {
        let hash = <[u8; Self::SIZE]>::try_from(slice).map_err(|_| {
            Error::BadArgument(format!("hash160 must be 20 bytes, got {}", slice.len()))
        })?;
        Ok(Hash160 { hash })
    }
}

impl FromHex for Hash160 {
    type Error = Error;

    fn from_hex<T: AsRef<[u8]>>(hex: T) -> std::result::Result<Self, Self::Error> {
        Ok(Hash160 {
            hash: <[u8; Self::SIZE]>::from_hex(hex)?,
        })
    }
}

impl ToHex for Hash160 {
    fn encode_hex<T: FromIterator<char>>(&self) -> T {
        self.hash.encode_hex()
    }

    fn encode_hex_upper<T: FromIterator<char>>(&self) -> T {
        self.hash.encode_hex_upper()
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.encode_hex::<String>())
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash160({})", self)
    }
}

impl Serialize for Hash160 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash160 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash160::from_hex(s).map_err(serde::de::Error::custom)
    }
}

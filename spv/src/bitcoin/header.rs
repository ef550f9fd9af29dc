use crate::bitcoin::hash::Hash;
use crate::bitcoin::params::Network;
use crate::bitcoin::Encodable;
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use hex::{FromHex, ToHex};
use num::{BigUint, One, Zero};
use serde::{Deserialize, Serialize};

/// Identifies a block. Headers are chained by it.
pub type BlockHash = Hash;
/// Commits to the transactions of a block.
pub type MerkleRoot = Hash;

/// An 80 byte block header.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: BlockHash,
    pub merkle_root: MerkleRoot,
    pub timestamp: u32,
    /// Compact encoding of the target.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn hash(&self) -> BlockHash {
        Hash::sha256d(&self.bytes())
    }

    /// The genesis header of `network`. Every network shares the genesis coinbase.
    pub fn genesis(network: Network) -> BlockHeader {
        let merkle_root = MerkleRoot::from([
            0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76,
            0x8f, 0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa,
            0x4b, 0x1e, 0x5e, 0x4a,
        ]);
        let (timestamp, bits, nonce) = match network {
            Network::Mainnet => (1231006505, 0x1d00ffff, 2083236893),
            Network::Testnet => (1296688602, 0x1d00ffff, 414098458),
            Network::Regtest => (1296688602, 0x207fffff, 2),
        };
        BlockHeader {
            version: 1,
            prev_hash: BlockHash::ZERO,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// The target threshold encoded in the compact `bits` field.
    pub fn target(&self) -> BigUint {
        let exponent = self.bits >> 24;
        let mantissa = BigUint::from(self.bits & 0x007f_ffff);
        if exponent <= 3 {
            mantissa >> (8 * (3 - exponent) as usize)
        } else {
            mantissa << (8 * (exponent - 3) as usize)
        }
    }

    /// The expected number of hashes needed to produce this header, `2^256 / (target + 1)`.
    ///
    /// Only used to compare branches; the proof of work itself is not checked.
    pub fn work(&self) -> BigUint {
        let target = self.target();
        if target.is_zero() {
            return BigUint::zero();
        }
        (BigUint::one() << 256usize) / (target + BigUint::one())
    }

    fn bytes(&self) -> [u8; BlockHeader::SIZE] {
        let mut out = [0u8; BlockHeader::SIZE];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_hash.raw);
        out[36..68].copy_from_slice(&self.merkle_root.raw);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }
}

impl Encodable for BlockHeader {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        if buffer.remaining() < Self::SIZE {
            return Err(Error::DataTooSmall);
        }
        Ok(BlockHeader {
            version: buffer.try_get_u32_le()?,
            prev_hash: Hash::from_binary(buffer)?,
            merkle_root: Hash::from_binary(buffer)?,
            timestamp: buffer.try_get_u32_le()?,
            bits: buffer.try_get_u32_le()?,
            nonce: buffer.try_get_u32_le()?,
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        buffer.put_slice(&self.bytes());
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        Self::SIZE as u64
    }
}

impl FromHex for BlockHeader {
    type Error = Error;

    fn from_hex<T: AsRef<[u8]>>(hex: T) -> std::result::Result<Self, Self::Error> {
        let bytes = Vec::<u8>::from_hex(hex)?;
        BlockHeader::from_binary_buf(&bytes)
    }
}

impl ToHex for BlockHeader {
    fn encode_hex<T: FromIterator<char>>(&self) -> T {
        self.bytes().encode_hex()
    }

    fn encode_hex_upper<T: FromIterator<char>>(&self) -> T {
        self.bytes().encode_hex_upper()
    }
}

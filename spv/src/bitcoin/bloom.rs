//! BIP37 bloom filters.
//!
//! The filter is loaded into the peer with `filterload` so that it only relays transactions and
//! merkle blocks touching our scripts and outpoints. Sizing and hashing follow Bitcoin Core so a
//! filter built here matches one built by any other client from the same elements.

use crate::bitcoin::{varint_decode_len, varint_encode, varint_size, Encodable};
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use std::f64::consts::LN_2;

/// The largest filter a peer will accept, in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
/// The largest number of hash functions a peer will accept.
pub const MAX_HASH_FUNCS: u32 = 50;

/// The peer does not update the filter when a match is found.
pub const BLOOM_UPDATE_NONE: u8 = 0;
/// The peer adds the outpoint of every matched output to the filter.
pub const BLOOM_UPDATE_ALL: u8 = 1;
/// Like [BLOOM_UPDATE_ALL], but only for pay-to-pubkey and multisig outputs.
pub const BLOOM_UPDATE_P2PUBKEY_ONLY: u8 = 2;

const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// A BIP37 bloom filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    pub content: Vec<u8>,
    pub hash_funcs: u32,
    pub tweak: u32,
    pub flags: u8,
}

impl BloomFilter {
    /// Create an empty filter sized for `elements` items at the false positive rate `fp_rate`.
    pub fn new(elements: usize, fp_rate: f64, tweak: u32, flags: u8) -> BloomFilter {
        let elements = elements.max(1);
        let bits = (-1.0 / (LN_2 * LN_2) * elements as f64 * fp_rate.ln()) as usize;
        let size = (bits.min(MAX_BLOOM_FILTER_SIZE * 8) / 8).max(1);
        let hash_funcs = (((size * 8 / elements) as f64 * LN_2) as u32).min(MAX_HASH_FUNCS);
        BloomFilter {
            content: vec![0; size],
            hash_funcs,
            tweak,
            flags,
        }
    }

    fn bit_index(&self, hash_num: u32, data: &[u8]) -> usize {
        let seed = hash_num.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        murmur3(data, seed) as usize % (self.content.len() * 8)
    }

    pub fn insert(&mut self, data: &[u8]) {
        for i in 0..self.hash_funcs {
            let idx = self.bit_index(i, data);
            self.content[idx >> 3] |= 1 << (idx & 7);
        }
    }

    /// True if `data` may have been inserted. False positives are possible, false negatives are not.
    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.hash_funcs).all(|i| {
            let idx = self.bit_index(i, data);
            self.content[idx >> 3] & (1 << (idx & 7)) != 0
        })
    }

    /// True if the filter would be accepted by a peer.
    pub fn is_within_size_constraints(&self) -> bool {
        self.content.len() <= MAX_BLOOM_FILTER_SIZE && self.hash_funcs <= MAX_HASH_FUNCS
    }
}

impl Encodable for BloomFilter {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        let size = varint_decode_len(buffer, 1)?;
        if size == 0 || size > MAX_BLOOM_FILTER_SIZE {
            return Err(Error::BadData(format!("bloom filter of {} bytes", size)));
        }
        let mut content = vec![0u8; size];
        buffer.try_copy_to_slice(&mut content)?;
        let hash_funcs = buffer.try_get_u32_le()?;
        if hash_funcs > MAX_HASH_FUNCS {
            return Err(Error::BadData(format!("{} bloom hash functions", hash_funcs)));
        }
        Ok(BloomFilter {
            content,
            hash_funcs,
            tweak: buffer.try_get_u32_le()?,
            flags: buffer.try_get_u8()?,
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        varint_encode(buffer, self.content.len() as u64)?;
        buffer.put_slice(&self.content);
        buffer.put_u32_le(self.hash_funcs);
        buffer.put_u32_le(self.tweak);
        buffer.put_u8(self.flags);
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        varint_size(self.content.len() as u64) + self.content.len() as u64 + 9
    }
}

/// 32-bit MurmurHash3 (x86 variant), as used by BIP37.
pub fn murmur3(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, b) in tail.iter().enumerate() {
            k1 ^= (*b as u32) << (8 * i);
        }
        h1 ^= k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn murmur3_vectors() {
        assert_eq!(murmur3(&[], 0), 0);
        assert_eq!(murmur3(&[], 0xFBA4C795), 0x6a396f08);
        assert_eq!(murmur3(&hex!("00"), 0), 0x514E28B7);
        assert_eq!(murmur3(&hex!("00"), 0xFBA4C795), 0xEA3F0B17);
        assert_eq!(murmur3(&hex!("ff"), 0), 0xFD6CF10D);
        assert_eq!(murmur3(&hex!("0011"), 0), 0x16C6B7AB);
        assert_eq!(murmur3(&hex!("001122"), 0), 0x8EB51C3D);
        assert_eq!(murmur3(&hex!("00112233"), 0), 0xB4471BF8);
        assert_eq!(murmur3(&hex!("0011223344"), 0), 0xE2301FA8);
    }

    fn filter_with_vectors(tweak: u32) -> BloomFilter {
        let mut filter = BloomFilter::new(3, 0.01, tweak, BLOOM_UPDATE_ALL);
        filter.insert(&hex!("99108ad8ed9bb6274d3980bab5a85c048f0950c8"));
        assert!(filter.contains(&hex!("99108ad8ed9bb6274d3980bab5a85c048f0950c8")));
        assert!(!filter.contains(&hex!("19108ad8ed9bb6274d3980bab5a85c048f0950c8")));
        filter.insert(&hex!("b5a2c786d9ef4658287ced5914b37a1b4aa32eee"));
        assert!(filter.contains(&hex!("b5a2c786d9ef4658287ced5914b37a1b4aa32eee")));
        filter.insert(&hex!("b9300670b4c5366e95b2699e8b18bc75e5f729c5"));
        assert!(filter.contains(&hex!("b9300670b4c5366e95b2699e8b18bc75e5f729c5")));
        filter
    }

    #[test]
    fn matches_reference_serialization() {
        let filter = filter_with_vectors(0);
        assert_eq!(
            filter.to_binary_buf().unwrap(),
            hex!("03614e9b050000000000000001").to_vec()
        );
    }

    #[test]
    fn matches_reference_serialization_with_tweak() {
        let filter = filter_with_vectors(2147483649);
        let encoded = filter.to_binary_buf().unwrap();
        assert_eq!(encoded, hex!("03ce4299050000000100008001").to_vec());
        assert_eq!(encoded.len() as u64, filter.encoded_size());
        assert_eq!(BloomFilter::from_binary_buf(&encoded).unwrap(), filter);
    }

    #[test]
    fn size_is_capped() {
        let filter = BloomFilter::new(1_000_000, 0.0001, 0, BLOOM_UPDATE_NONE);
        assert_eq!(filter.content.len(), MAX_BLOOM_FILTER_SIZE);
        assert!(filter.hash_funcs <= MAX_HASH_FUNCS);
        assert!(filter.is_within_size_constraints());
    }

    #[test]
    fn oversized_filter_is_rejected() {
        let mut data = Vec::new();
        varint_encode(&mut data, (MAX_BLOOM_FILTER_SIZE + 1) as u64).unwrap();
        data.extend(vec![0u8; MAX_BLOOM_FILTER_SIZE + 10]);
        assert!(BloomFilter::from_binary_buf(&data).is_err());
    }
}

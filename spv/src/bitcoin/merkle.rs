use crate::bitcoin::{
    varint_decode_len, varint_encode, varint_size, Encodable, Hash, MerkleRoot, TxHash,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut};

/// Calculate the Merkle root from a list of transaction hashes
///
/// A level with an odd number of hashes duplicates its last hash.
pub fn calculate_merkle_root(tx_hashes: &[TxHash]) -> Result<MerkleRoot> {
    if tx_hashes.is_empty() {
        return Err(Error::BadArgument(
            "Cannot calculate merkle root of empty transaction list".to_string(),
        ));
    }
    let mut current_level: Vec<Hash> = tx_hashes.to_vec();
    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|pair| hash_merkle_branches(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    Ok(current_level[0])
}

/// Hash two merkle branches together
fn hash_merkle_branches(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(&left.raw);
    data[32..].copy_from_slice(&right.raw);
    Hash::sha256d(&data)
}

/// The partial merkle tree carried by a BIP37 `merkleblock` message.
///
/// It proves that a subset of the block's transactions (the matches) is committed to by the
/// merkle root of the header. Traversal is depth first; one flag bit per visited node tells
/// whether the subtree contains a match and one hash is carried for every pruned subtree or
/// leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    pub num_transactions: u32,
    pub hashes: Vec<Hash>,
    pub bits: Vec<bool>,
}

/// The matched transactions proved by a [PartialMerkleTree].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleMatches {
    pub merkle_root: MerkleRoot,
    /// Matched transaction hashes, in block order.
    pub matches: Vec<TxHash>,
    /// Position of each match within the block.
    pub indexes: Vec<u32>,
}

impl PartialMerkleTree {
    /// Upper bound of transactions in a block, derived from the 1MB base block size and the
    /// minimum transaction size.
    const MAX_TRANSACTIONS: u32 = 1_000_000 / 60;

    /// Build the tree for all transaction hashes of a block, keeping the leaves where `matched`
    /// is true.
    pub fn from_txids(txids: &[TxHash], matched: &[bool]) -> Result<Self> {
        if txids.is_empty() || txids.len() != matched.len() {
            return Err(Error::BadArgument(
                "txids and match flags must be non-empty and equal in length".to_string(),
            ));
        }
        let mut tree = PartialMerkleTree {
            num_transactions: txids.len() as u32,
            hashes: Vec::new(),
            bits: Vec::new(),
        };
        let height = tree.height();
        tree.traverse_and_build(height, 0, txids, matched);
        // flags travel as whole bytes
        while tree.bits.len() % 8 != 0 {
            tree.bits.push(false);
        }
        Ok(tree)
    }

    /// Walk the tree, verify its shape and return the root it commits to and the matched
    /// transactions.
    pub fn extract_matches(&self) -> Result<MerkleMatches> {
        if self.num_transactions == 0 {
            return Err(bad("no transactions"));
        }
        if self.num_transactions > Self::MAX_TRANSACTIONS {
            return Err(bad("too many transactions"));
        }
        if self.hashes.len() > self.num_transactions as usize {
            return Err(bad("more hashes than transactions"));
        }
        if self.bits.len() < self.hashes.len() {
            return Err(bad("fewer flag bits than hashes"));
        }
        let mut cursor = Cursor::default();
        let mut matches = Vec::new();
        let mut indexes = Vec::new();
        let merkle_root = self.traverse_and_extract(
            self.height(),
            0,
            &mut cursor,
            &mut matches,
            &mut indexes,
        )?;
        if (cursor.bits + 7) / 8 != (self.bits.len() + 7) / 8 {
            return Err(bad("not all flag bits consumed"));
        }
        if cursor.hashes != self.hashes.len() {
            return Err(bad("not all hashes consumed"));
        }
        Ok(MerkleMatches {
            merkle_root,
            matches,
            indexes,
        })
    }

    fn height(&self) -> u32 {
        let mut height = 0;
        while self.tree_width(height) > 1 {
            height += 1;
        }
        height
    }

    fn tree_width(&self, height: u32) -> u32 {
        ((self.num_transactions as u64 + (1u64 << height) - 1) >> height) as u32
    }

    fn calc_hash(&self, height: u32, pos: u32, txids: &[TxHash]) -> Hash {
        if height == 0 {
            return txids[pos as usize];
        }
        let left = self.calc_hash(height - 1, pos * 2, txids);
        let right = if pos * 2 + 1 < self.tree_width(height - 1) {
            self.calc_hash(height - 1, pos * 2 + 1, txids)
        } else {
            left
        };
        hash_merkle_branches(&left, &right)
    }

    fn traverse_and_build(&mut self, height: u32, pos: u32, txids: &[TxHash], matched: &[bool]) {
        let start = (pos as usize) << height;
        let end = (((pos + 1) as usize) << height).min(self.num_transactions as usize);
        let parent_of_match = matched[start..end].iter().any(|m| *m);
        self.bits.push(parent_of_match);
        if height == 0 || !parent_of_match {
            let h = self.calc_hash(height, pos, txids);
            self.hashes.push(h);
        } else {
            self.traverse_and_build(height - 1, pos * 2, txids, matched);
            if pos * 2 + 1 < self.tree_width(height - 1) {
                self.traverse_and_build(height - 1, pos * 2 + 1, txids, matched);
            }
        }
    }

    fn traverse_and_extract(
        &self,
        height: u32,
        pos: u32,
        cursor: &mut Cursor,
        matches: &mut Vec<TxHash>,
        indexes: &mut Vec<u32>,
    ) -> Result<Hash> {
        let parent_of_match = *self
            .bits
            .get(cursor.bits)
            .ok_or_else(|| bad("ran out of flag bits"))?;
        cursor.bits += 1;
        if height == 0 || !parent_of_match {
            let h = *self
                .hashes
                .get(cursor.hashes)
                .ok_or_else(|| bad("ran out of hashes"))?;
            cursor.hashes += 1;
            if height == 0 && parent_of_match {
                matches.push(h);
                indexes.push(pos);
            }
            return Ok(h);
        }
        let left = self.traverse_and_extract(height - 1, pos * 2, cursor, matches, indexes)?;
        let right = if pos * 2 + 1 < self.tree_width(height - 1) {
            let right =
                self.traverse_and_extract(height - 1, pos * 2 + 1, cursor, matches, indexes)?;
            // identical siblings allow forging a different transaction list (CVE-2012-2459)
            if right == left {
                return Err(bad("duplicate sibling hashes"));
            }
            right
        } else {
            left
        };
        Ok(hash_merkle_branches(&left, &right))
    }
}

#[derive(Default)]
struct Cursor {
    bits: usize,
    hashes: usize,
}

fn bad(reason: &str) -> Error {
    Error::BadData(format!("partial merkle tree: {}", reason))
}

impl Encodable for PartialMerkleTree {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        let num_transactions = buffer.try_get_u32_le()?;
        let n_hashes = varint_decode_len(buffer, Hash::SIZE as usize)?;
        let mut hashes = Vec::with_capacity(n_hashes);
        for _ in 0..n_hashes {
            hashes.push(Hash::from_binary(buffer)?);
        }
        let n_bytes = varint_decode_len(buffer, 1)?;
        let mut bits = Vec::with_capacity(n_bytes * 8);
        for _ in 0..n_bytes {
            let byte = buffer.try_get_u8()?;
            for i in 0..8 {
                bits.push(byte & (1 << i) != 0);
            }
        }
        Ok(PartialMerkleTree {
            num_transactions,
            hashes,
            bits,
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        buffer.put_u32_le(self.num_transactions);
        varint_encode(buffer, self.hashes.len() as u64)?;
        for h in &self.hashes {
            h.to_binary(buffer)?;
        }
        let mut bytes = vec![0u8; (self.bits.len() + 7) / 8];
        for (p, bit) in self.bits.iter().enumerate() {
            if *bit {
                bytes[p / 8] |= 1 << (p % 8);
            }
        }
        varint_encode(buffer, bytes.len() as u64)?;
        buffer.put_slice(&bytes);
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        let n_bytes = ((self.bits.len() + 7) / 8) as u64;
        4 + varint_size(self.hashes.len() as u64)
            + self.hashes.len() as u64 * Hash::SIZE
            + varint_size(n_bytes)
            + n_bytes
    }
}

use crate::bitcoin::merkle::calculate_merkle_root;
use crate::bitcoin::{varint_decode_len, varint_encode, varint_size, BlockHeader, Encodable, Tx};
use crate::Result;
use bytes::{Buf, BufMut};

/// A full block, as delivered by a `block` message.
///
/// The wallet only receives full blocks when a peer answers a plain block request; filtered
/// delivery uses `merkleblock` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    /// True when the transactions hash to the merkle root committed in the header.
    pub fn check_merkle_root(&self) -> bool {
        let hashes: Vec<_> = self.txs.iter().map(|t| t.hash()).collect();
        match calculate_merkle_root(&hashes) {
            Ok(root) => root == self.header.merkle_root,
            Err(_) => false,
        }
    }
}

impl Encodable for Block {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        let header = BlockHeader::from_binary(buffer)?;
        let n = varint_decode_len(buffer, 10)?;
        let mut txs = Vec::with_capacity(n);
        for _ in 0..n {
            txs.push(Tx::from_binary(buffer)?);
        }
        Ok(Block { header, txs })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        self.header.to_binary(buffer)?;
        varint_encode(buffer, self.txs.len() as u64)?;
        for tx in &self.txs {
            tx.to_binary(buffer)?;
        }
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        BlockHeader::SIZE as u64
            + varint_size(self.txs.len() as u64)
            + self.txs.iter().map(|t| t.encoded_size()).sum::<u64>()
    }
}

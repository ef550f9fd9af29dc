//! The header chain tracker.
//!
//! Keeps every header received from the peer in a tree rooted at the start header (genesis or a
//! checkpoint) and follows the branch with the most cumulative work. Headers are only checked for
//! linkage: an SPV client trusts its peer for everything else.

use crate::bitcoin::{BlockHash, BlockHeader, Network};
use num::BigUint;
use std::collections::HashMap;

/// The number of locator entries taken one block apart before the step starts doubling.
const LOCATOR_DENSE_ENTRIES: usize = 10;

/// What happened when a header was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// The header extends the best chain to `height`.
    Extended { height: u32 },
    /// The header is already known.
    Duplicate,
    /// The header is stored on a branch with no more work than the best chain.
    SideBranch,
    /// The header made a side branch the best chain.
    ///
    /// `disconnected` holds the blocks that left the best chain, highest first, and `connected`
    /// the blocks that joined it, lowest first.
    Reorganized {
        fork_height: u32,
        disconnected: Vec<BlockHash>,
        connected: Vec<BlockHash>,
    },
    /// The header's parent is unknown.
    Orphan,
}

#[derive(Debug, Clone)]
struct ChainEntry {
    header: BlockHeader,
    height: u32,
    chain_work: BigUint,
}

/// The header tree and its best chain.
#[derive(Debug, Clone)]
pub struct HeaderChain {
    entries: HashMap<BlockHash, ChainEntry>,
    /// Best chain hashes, index 0 is the start header.
    best: Vec<BlockHash>,
    start_height: u32,
    /// Headers accepted since the last call to `take_unsaved`.
    unsaved: Vec<(u32, BlockHeader)>,
}

impl HeaderChain {
    /// A chain starting at the genesis block of `network`.
    pub fn new(network: Network) -> HeaderChain {
        HeaderChain::from_checkpoint(0, BlockHeader::genesis(network))
    }

    /// A chain starting at a trusted header at `height`. Nothing below it is ever requested.
    pub fn from_checkpoint(height: u32, header: BlockHeader) -> HeaderChain {
        let hash = header.hash();
        let chain_work = header.work();
        let mut entries = HashMap::new();
        entries.insert(
            hash,
            ChainEntry {
                header,
                height,
                chain_work,
            },
        );
        HeaderChain {
            entries,
            best: vec![hash],
            start_height: height,
            unsaved: Vec::new(),
        }
    }

    /// Accept a header, linking it to its parent.
    pub fn accept_header(&mut self, header: BlockHeader) -> HeaderOutcome {
        let hash = header.hash();
        if self.entries.contains_key(&hash) {
            return HeaderOutcome::Duplicate;
        }
        let (height, chain_work) = match self.entries.get(&header.prev_hash) {
            Some(parent) => (parent.height + 1, &parent.chain_work + header.work()),
            None => return HeaderOutcome::Orphan,
        };
        let best_work = self.tip_entry().chain_work.clone();
        let extends_tip = header.prev_hash == self.tip_hash();
        self.unsaved.push((height, header.clone()));
        self.entries.insert(
            hash,
            ChainEntry {
                header,
                height,
                chain_work: chain_work.clone(),
            },
        );

        if extends_tip {
            self.best.push(hash);
            return HeaderOutcome::Extended { height };
        }
        // ties keep the branch seen first
        if chain_work <= best_work {
            return HeaderOutcome::SideBranch;
        }
        self.reorganize(hash)
    }

    fn reorganize(&mut self, new_tip: BlockHash) -> HeaderOutcome {
        let mut connected = Vec::new();
        let mut cursor = new_tip;
        let fork_height = loop {
            let entry = &self.entries[&cursor];
            if self.is_on_best_chain(&cursor) {
                break entry.height;
            }
            connected.push(cursor);
            cursor = entry.header.prev_hash;
        };
        connected.reverse();
        let keep = (fork_height - self.start_height + 1) as usize;
        let mut disconnected = self.best.split_off(keep);
        disconnected.reverse();
        self.best.extend_from_slice(&connected);
        tracing::info!(
            fork_height,
            disconnected = disconnected.len(),
            connected = connected.len(),
            tip = %new_tip,
            "Chain reorganization"
        );
        HeaderOutcome::Reorganized {
            fork_height,
            disconnected,
            connected,
        }
    }

    fn tip_entry(&self) -> &ChainEntry {
        &self.entries[&self.tip_hash()]
    }

    /// Height of the best chain tip.
    pub fn height(&self) -> u32 {
        self.start_height + self.best.len() as u32 - 1
    }

    /// Height of the start header.
    pub fn start_height(&self) -> u32 {
        self.start_height
    }

    pub fn tip_hash(&self) -> BlockHash {
        self.best[self.best.len() - 1]
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.tip_entry().header
    }

    /// Hash of the best chain block at `height`.
    pub fn hash_at(&self, height: u32) -> Option<BlockHash> {
        height
            .checked_sub(self.start_height)
            .and_then(|i| self.best.get(i as usize))
            .copied()
    }

    /// Header of the best chain block at `height`.
    pub fn header_at(&self, height: u32) -> Option<&BlockHeader> {
        self.hash_at(height)
            .and_then(|h| self.entries.get(&h))
            .map(|e| &e.header)
    }

    /// Height of a known header, on any branch.
    pub fn height_of(&self, hash: &BlockHash) -> Option<u32> {
        self.entries.get(hash).map(|e| e.height)
    }

    pub fn is_on_best_chain(&self, hash: &BlockHash) -> bool {
        match self.entries.get(hash) {
            Some(e) => self.hash_at(e.height) == Some(*hash),
            None => false,
        }
    }

    /// Cumulative work of the best chain.
    pub fn chain_work(&self) -> BigUint {
        self.tip_entry().chain_work.clone()
    }

    /// A block locator for `getheaders`: the last ten blocks, then exponentially further back,
    /// always ending with the start header.
    pub fn locator(&self) -> Vec<BlockHash> {
        let mut locator = Vec::new();
        let mut index = self.best.len() - 1;
        let mut step = 1;
        loop {
            locator.push(self.best[index]);
            if index == 0 {
                break;
            }
            if locator.len() >= LOCATOR_DENSE_ENTRIES {
                step *= 2;
            }
            index = index.saturating_sub(step);
        }
        locator
    }

    /// Take the headers accepted since the last call, to be persisted.
    pub fn take_unsaved(&mut self) -> Vec<(u32, BlockHeader)> {
        std::mem::take(&mut self.unsaved)
    }
}

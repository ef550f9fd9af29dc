use crate::bitcoin::bloom::BLOOM_UPDATE_ALL;
use crate::bitcoin::{Address, AddressKind, BloomFilter, Encodable, Hash160, Outpoint, Script};
use crate::wallet::deriver::{Chain, DerivedAddress};
use std::collections::HashMap;

/// The addresses the wallet watches, keyed by pubkey hash.
///
/// The set only grows: addresses are added by explicit derivation and never removed.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    addresses: HashMap<Hash160, DerivedAddress>,
    by_index: HashMap<(Chain, u32), Hash160>,
}

impl WatchSet {
    pub fn new() -> WatchSet {
        WatchSet::default()
    }

    /// Add an address. Returns false if it was already watched.
    pub fn insert(&mut self, address: DerivedAddress) -> bool {
        let hash = address.address.hash160;
        if self.addresses.contains_key(&hash) {
            return false;
        }
        self.by_index.insert((address.chain, address.index), hash);
        self.addresses.insert(hash, address);
        true
    }

    pub fn extend(&mut self, addresses: impl IntoIterator<Item = DerivedAddress>) {
        for a in addresses {
            self.insert(a);
        }
    }

    /// The watched address a locking script pays to, if any. The script must be of the kind
    /// the address was derived as.
    pub fn lookup_script(&self, script: &Script) -> Option<&DerivedAddress> {
        let (hash, kind) = match (script.p2pkh_hash(), script.p2wpkh_hash()) {
            (Some(h), _) => (h, AddressKind::P2pkh),
            (_, Some(h)) => (h, AddressKind::P2wpkh),
            _ => return None,
        };
        self.addresses.get(&hash).filter(|a| a.address.kind == kind)
    }

    pub fn lookup_hash(&self, hash: &Hash160) -> Option<&DerivedAddress> {
        self.addresses.get(hash)
    }

    /// The watched address at `index` on `chain`.
    pub fn get(&self, chain: Chain, index: u32) -> Option<&DerivedAddress> {
        self.by_index
            .get(&(chain, index))
            .and_then(|h| self.addresses.get(h))
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.addresses
            .get(&address.hash160)
            .is_some_and(|a| a.address == *address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// The number of watched addresses on `chain`.
    pub fn count(&self, chain: Chain) -> usize {
        self.addresses.values().filter(|a| a.chain == chain).count()
    }

    /// Build the BIP37 filter sent to the peer.
    ///
    /// The filter matches every watched pubkey hash and every outpoint we hold, and asks the
    /// peer to add the outpoints of matched outputs itself so spends of newly received coins
    /// are forwarded too.
    pub fn bloom_filter(&self, fp_rate: f64, tweak: u32, outpoints: &[Outpoint]) -> BloomFilter {
        let elements = self.addresses.len() + outpoints.len();
        let mut filter = BloomFilter::new(elements.max(1), fp_rate, tweak, BLOOM_UPDATE_ALL);
        for hash in self.addresses.keys() {
            filter.insert(&hash.hash);
        }
        for outpoint in outpoints {
            // an outpoint always encodes into a growable buffer
            if let Ok(bytes) = outpoint.to_binary_buf() {
                filter.insert(&bytes);
            }
        }
        filter
    }
}

//! The wallet ledger: our unspent outputs and the history of transactions touching them.
//!
//! Blocks and loose transactions both go through the same application path, keyed by txid,
//! so a transaction seen first in the mempool and later in a block is only counted once.

use crate::bitcoin::{Address, BlockHash, Network, Outpoint, Tx, TxHash};
use crate::p2p::FilteredBlock;
use crate::util::Amount;
use crate::wallet::deriver::{Chain, DerivedAddress};
use crate::wallet::watch::WatchSet;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// An output paying one of our addresses that has not been spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    pub txid: TxHash,
    pub vout: u32,
    pub address: Address,
    pub amount: u64,
    /// Height of the block that confirmed the funding transaction, None while pending.
    pub height: Option<u32>,
}

impl Utxo {
    pub fn outpoint(&self) -> Outpoint {
        Outpoint::new(self.txid, self.vout)
    }

    /// Number of confirmations with the chain tip at `tip`.
    pub fn confirmations(&self, tip: u32) -> u32 {
        match self.height {
            Some(h) if tip >= h => tip - h + 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
        }
    }
}

/// A transaction that paid to or spent from the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRecord {
    pub txid: TxHash,
    pub tx: Tx,
    pub status: TxStatus,
    pub height: Option<u32>,
    pub block_hash: Option<BlockHash>,
    /// Our outputs this transaction consumed, kept so a reorg can restore them.
    pub spent: Vec<Utxo>,
    /// False once a reorg rolled the transaction's effects back.
    pub applied: bool,
    /// Order of first observation.
    pub seq: u64,
}

/// Confirmed and total balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Balance {
    /// Outputs with at least one confirmation.
    pub confirmed: Amount,
    /// All outputs, pending ones included.
    pub unconfirmed: Amount,
}

/// Ledger state changed since the last `take_changes`, to be persisted in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Outputs created (`Some`) or removed (`None`).
    pub utxos: Vec<(Outpoint, Option<Utxo>)>,
    pub records: Vec<TxRecord>,
    pub synced_height: u32,
    pub next_change_index: u32,
    pub next_receive_index: u32,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty() && self.records.is_empty()
    }
}

/// What applying a block did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockApplied {
    /// Transactions that touched the wallet for the first time.
    pub new: Vec<TxHash>,
    /// Transactions whose records are now confirmed in this block.
    pub confirmed: Vec<TxHash>,
}

#[derive(Debug, Clone)]
struct State {
    utxos: BTreeMap<Outpoint, Utxo>,
    records: HashMap<TxHash, TxRecord>,
    next_seq: u64,
    synced_height: u32,
    next_change_index: u32,
    next_receive_index: u32,
    dirty_utxos: BTreeSet<Outpoint>,
    dirty_records: BTreeSet<TxHash>,
    /// Outputs spent by payments built but not yet applied.
    reserved: BTreeSet<Outpoint>,
}

/// Ledger state saved by [Ledger::snapshot].
#[derive(Debug, Clone)]
pub struct Snapshot(State);

/// The wallet ledger.
///
/// Owns the watch set, the unspent outputs and the transaction records. It has a single
/// writer; the facade shares it behind a lock so readers see whole blocks only.
#[derive(Debug, Clone)]
pub struct Ledger {
    network: Network,
    watch: WatchSet,
    state: State,
}

impl Ledger {
    /// An empty ledger whose blocks start after `synced_height`.
    pub fn new(network: Network, watch: WatchSet, synced_height: u32) -> Ledger {
        Ledger {
            network,
            watch,
            state: State {
                utxos: BTreeMap::new(),
                records: HashMap::new(),
                next_seq: 0,
                synced_height,
                next_change_index: 0,
                next_receive_index: 0,
                dirty_utxos: BTreeSet::new(),
                dirty_records: BTreeSet::new(),
                reserved: BTreeSet::new(),
            },
        }
    }

    /// Rebuild a ledger from persisted state.
    pub fn restore(
        network: Network,
        watch: WatchSet,
        utxos: Vec<Utxo>,
        records: Vec<TxRecord>,
        synced_height: u32,
        next_change_index: u32,
        next_receive_index: u32,
    ) -> Ledger {
        let mut ledger = Ledger::new(network, watch, synced_height);
        let state = &mut ledger.state;
        state.next_seq = records.iter().map(|r| r.seq + 1).max().unwrap_or(0);
        state.next_change_index = next_change_index;
        state.next_receive_index = next_receive_index;
        state.utxos = utxos.into_iter().map(|u| (u.outpoint(), u)).collect();
        state.records = records.into_iter().map(|r| (r.txid, r)).collect();
        ledger
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn watch(&self) -> &WatchSet {
        &self.watch
    }

    /// Add an address to the watch set. Returns true if it was not watched before.
    pub fn watch_address(&mut self, address: DerivedAddress) -> bool {
        self.watch.insert(address)
    }

    /// Height of the last block applied.
    pub fn synced_height(&self) -> u32 {
        self.state.synced_height
    }

    /// Capture the state so it can be restored with [Ledger::rollback].
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.state.clone())
    }

    pub fn rollback(&mut self, snapshot: Snapshot) {
        self.state = snapshot.0;
    }

    /// Run `f` against the ledger, restoring the previous state if it fails.
    pub fn atomically<T>(&mut self, f: impl FnOnce(&mut Ledger) -> Result<T>) -> Result<T> {
        let snapshot = self.snapshot();
        let result = f(self);
        if result.is_err() {
            self.rollback(snapshot);
        }
        result
    }

    /// Apply a transaction seen outside of a block.
    ///
    /// Returns whether the transaction touches the wallet. Applying a transaction twice has
    /// the same effect as applying it once.
    pub fn apply_transaction(&mut self, tx: &Tx) -> bool {
        self.apply_tx(tx, None)
    }

    /// Apply the next block, at `height`, on the best chain.
    ///
    /// Every matched transaction the block carries is applied, then every record whose txid is
    /// in the block is confirmed at `height`, including those seen before as pending. Blocks
    /// must arrive in height order. Either the whole block is applied or nothing is.
    pub fn apply_block(&mut self, block: &FilteredBlock, height: u32) -> Result<BlockApplied> {
        let expected = self.state.synced_height + 1;
        if height != expected {
            return Err(Error::BadArgument(format!(
                "block {} at height {}, expected height {}",
                block.hash(),
                height,
                expected
            )));
        }
        let block_hash = block.hash();
        self.atomically(|ledger| {
            let mut applied = BlockApplied::default();
            for tx in &block.txs {
                let txid = tx.hash();
                if !block.txids.contains(&txid) {
                    return Err(Error::BadData(format!(
                        "transaction {} is not part of block {}",
                        txid, block_hash
                    )));
                }
                let known = ledger.state.records.contains_key(&txid);
                // the block wins over pending spends of the same outputs
                for input in &tx.inputs {
                    for other in ledger.spenders(&input.outpoint, &txid) {
                        let confirmed = ledger
                            .state
                            .records
                            .get(&other)
                            .is_some_and(|r| r.status == TxStatus::Confirmed);
                        if confirmed {
                            return Err(Error::BadData(format!(
                                "transaction {} double spends confirmed {}",
                                txid, other
                            )));
                        }
                        ledger.evict(&other);
                    }
                }
                if ledger.apply_tx(tx, Some((height, block_hash))) && !known {
                    applied.new.push(txid);
                }
            }
            for txid in &block.txids {
                if ledger.confirm(txid, height, block_hash) {
                    applied.confirmed.push(*txid);
                }
            }
            ledger.state.synced_height = height;
            Ok(applied)
        })
    }

    /// Roll back every block above `height`.
    ///
    /// Records confirmed above `height` become pending with their effects undone: the outputs
    /// they created are removed and the outputs they spent restored. They are applied again if
    /// they reappear on the new best chain.
    pub fn disconnect_above(&mut self, height: u32) -> Vec<TxHash> {
        let mut affected: Vec<(u64, TxHash)> = self
            .state
            .records
            .values()
            .filter(|r| r.status == TxStatus::Confirmed && r.height.is_some_and(|h| h > height))
            .map(|r| (r.seq, r.txid))
            .collect();
        // undo the latest first so restored outputs are not removed again by their funder
        affected.sort_unstable_by(|a, b| b.cmp(a));
        let mut reverted = Vec::with_capacity(affected.len());
        for (_, txid) in affected {
            self.revert(&txid);
            reverted.push(txid);
        }
        if self.state.synced_height > height {
            self.state.synced_height = height;
        }
        if !reverted.is_empty() {
            tracing::info!(height, reverted = reverted.len(), "Rolled back ledger");
        }
        reverted
    }

    /// Revert a pending record and, first, every applied record spending its outputs.
    fn evict(&mut self, txid: &TxHash) {
        let outputs = match self.state.records.get(txid) {
            Some(r) if r.applied => r.tx.outputs.len() as u32,
            _ => return,
        };
        for vout in 0..outputs {
            for child in self.spenders(&Outpoint::new(*txid, vout), txid) {
                self.evict(&child);
            }
        }
        self.revert(txid);
        tracing::warn!(txid = %txid, "Dropped pending transaction double spent by a block");
    }

    fn revert(&mut self, txid: &TxHash) {
        let state = &mut self.state;
        let record = match state.records.get_mut(txid) {
            Some(r) => r,
            None => return,
        };
        for vout in 0..record.tx.outputs.len() as u32 {
            let outpoint = Outpoint::new(*txid, vout);
            if state.utxos.remove(&outpoint).is_some() {
                state.dirty_utxos.insert(outpoint);
            }
        }
        for utxo in record.spent.drain(..) {
            state.dirty_utxos.insert(utxo.outpoint());
            state.utxos.insert(utxo.outpoint(), utxo);
        }
        record.status = TxStatus::Pending;
        record.height = None;
        record.block_hash = None;
        record.applied = false;
        state.dirty_records.insert(*txid);
    }

    fn confirm(&mut self, txid: &TxHash, height: u32, block_hash: BlockHash) -> bool {
        let state = &mut self.state;
        let record = match state.records.get_mut(txid) {
            Some(r) if r.applied => r,
            _ => return false,
        };
        record.status = TxStatus::Confirmed;
        record.height = Some(height);
        record.block_hash = Some(block_hash);
        state.dirty_records.insert(*txid);
        for vout in 0..record.tx.outputs.len() as u32 {
            let outpoint = Outpoint::new(*txid, vout);
            if let Some(utxo) = state.utxos.get_mut(&outpoint) {
                utxo.height = Some(height);
                state.dirty_utxos.insert(outpoint);
            }
        }
        true
    }

    /// Applied records other than `txid` spending `outpoint`.
    fn spenders(&self, outpoint: &Outpoint, txid: &TxHash) -> Vec<TxHash> {
        self.state
            .records
            .values()
            .filter(|r| {
                r.applied && r.txid != *txid && r.tx.inputs.iter().any(|i| i.outpoint == *outpoint)
            })
            .map(|r| r.txid)
            .collect()
    }

    fn spent_elsewhere(&self, outpoint: &Outpoint, txid: &TxHash) -> bool {
        !self.spenders(outpoint, txid).is_empty()
    }

    fn apply_tx(&mut self, tx: &Tx, block: Option<(u32, BlockHash)>) -> bool {
        let txid = tx.hash();
        if let Some(record) = self.state.records.get(&txid) {
            if record.applied {
                return true;
            }
        } else {
            let pays_us = tx.outputs.iter().any(|o| self.watch.lookup_script(&o.script).is_some());
            let spends_ours = tx.inputs.iter().any(|i| self.state.utxos.contains_key(&i.outpoint));
            if !pays_us && !spends_ours {
                return false;
            }
        }
        if let Some(input) = tx.inputs.iter().find(|i| self.spent_elsewhere(&i.outpoint, &txid)) {
            tracing::warn!(
                txid = %txid,
                outpoint = %input.outpoint,
                "Ignored transaction spending an already spent output"
            );
            return false;
        }

        let height = block.map(|(h, _)| h);
        let mut spent = Vec::new();
        for input in &tx.inputs {
            self.state.reserved.remove(&input.outpoint);
            if let Some(utxo) = self.state.utxos.remove(&input.outpoint) {
                self.state.dirty_utxos.insert(input.outpoint);
                spent.push(utxo);
            }
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            let derived = match self.watch.lookup_script(&output.script) {
                Some(d) => *d,
                None => continue,
            };
            let outpoint = Outpoint::new(txid, vout as u32);
            if self.spent_elsewhere(&outpoint, &txid) {
                continue;
            }
            self.note_used(derived.chain, derived.index);
            self.state.utxos.insert(
                outpoint,
                Utxo {
                    txid,
                    vout: vout as u32,
                    address: derived.address,
                    amount: output.value,
                    height,
                },
            );
            self.state.dirty_utxos.insert(outpoint);
        }

        let state = &mut self.state;
        match state.records.get_mut(&txid) {
            Some(record) => {
                record.spent = spent;
                record.applied = true;
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.records.insert(
                    txid,
                    TxRecord {
                        txid,
                        tx: tx.clone(),
                        status: TxStatus::Pending,
                        height: None,
                        block_hash: None,
                        spent,
                        applied: true,
                        seq,
                    },
                );
            }
        }
        state.dirty_records.insert(txid);
        tracing::debug!(txid = %txid, confirmed = block.is_some(), "Applied wallet transaction");
        true
    }

    pub fn balance(&self) -> Balance {
        let mut balance = Balance::default();
        for utxo in self.state.utxos.values() {
            let amount = Amount::from_sat(utxo.amount);
            balance.unconfirmed = balance.unconfirmed + amount;
            if utxo.height.is_some() {
                balance.confirmed = balance.confirmed + amount;
            }
        }
        balance
    }

    /// The balance the wallet reports: every unspent output, pending ones included.
    pub fn get_balance(&self) -> Amount {
        self.balance().unconfirmed
    }

    /// A previously derived receive address.
    pub fn get_receive_address(&self, index: u32) -> Option<Address> {
        self.watch.get(Chain::Receive, index).map(|d| d.address)
    }

    /// Unspent outputs in outpoint order.
    pub fn unspent(&self) -> Vec<Utxo> {
        self.state.utxos.values().cloned().collect()
    }

    /// Unspent outputs not held by a payment awaiting broadcast.
    pub fn spendable(&self) -> Vec<Utxo> {
        self.state
            .utxos
            .values()
            .filter(|u| !self.state.reserved.contains(&u.outpoint()))
            .cloned()
            .collect()
    }

    /// Hold `outpoints` for a payment until it is applied or released.
    pub fn reserve_outpoints(&mut self, outpoints: &[Outpoint]) {
        self.state.reserved.extend(outpoints.iter().copied());
    }

    /// Make outputs held for a payment that was never sent spendable again.
    pub fn release_outpoints(&mut self, outpoints: &[Outpoint]) {
        for outpoint in outpoints {
            self.state.reserved.remove(outpoint);
        }
    }

    pub fn outpoints(&self) -> Vec<Outpoint> {
        self.state.utxos.keys().copied().collect()
    }

    /// Transaction records in the order they were first seen.
    pub fn transactions(&self) -> Vec<TxRecord> {
        let mut records: Vec<TxRecord> = self.state.records.values().cloned().collect();
        records.sort_unstable_by_key(|r| r.seq);
        records
    }

    pub fn record(&self, txid: &TxHash) -> Option<&TxRecord> {
        self.state.records.get(txid)
    }

    /// The lowest change index beyond every change address used or reserved.
    pub fn next_change_index(&self) -> u32 {
        self.state.next_change_index
    }

    /// The lowest receive index beyond every receive address handed out or paid to.
    pub fn next_receive_index(&self) -> u32 {
        self.state.next_receive_index
    }

    /// Record that the address at `index` on `chain` was handed out or paid to.
    pub fn note_used(&mut self, chain: Chain, index: u32) {
        let next = match chain {
            Chain::Receive => &mut self.state.next_receive_index,
            Chain::Change => &mut self.state.next_change_index,
        };
        if index >= *next {
            *next = index + 1;
        }
    }

    /// Reserve a fresh change index.
    pub fn reserve_change_index(&mut self) -> u32 {
        let index = self.state.next_change_index;
        self.state.next_change_index += 1;
        index
    }

    /// Drain the changes made since the last call.
    pub fn take_changes(&mut self) -> ChangeSet {
        let state = &mut self.state;
        let utxos = std::mem::take(&mut state.dirty_utxos)
            .into_iter()
            .map(|o| (o, state.utxos.get(&o).cloned()))
            .collect();
        let records = std::mem::take(&mut state.dirty_records)
            .into_iter()
            .filter_map(|t| state.records.get(&t).cloned())
            .collect();
        ChangeSet {
            utxos,
            records,
            synced_height: state.synced_height,
            next_change_index: state.next_change_index,
            next_receive_index: state.next_receive_index,
        }
    }
}

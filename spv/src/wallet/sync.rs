//! The ingestion loop.
//!
//! A single task consumes the peer's event stream in arrival order. It owns the header chain
//! and is the writer of the ledger: headers extend the chain, filtered blocks on the best chain
//! are applied strictly in height order, and loose transactions are applied as pending.

use crate::bitcoin::{BlockHash, BlockHeader, TxHash};
use crate::chain::{HeaderChain, HeaderOutcome};
use crate::p2p::{
    ConnectionState, FilteredBlock, InvType, Message, PeerEvent, PeerEvents, PeerHandle,
    PingPongState, MAX_HEADERS_RESULTS,
};
use crate::wallet::ledger::Ledger;
use crate::wallet::store::WalletStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;

/// Filtered blocks requested from the peer and not yet received.
const MAX_BLOCKS_IN_FLIGHT: usize = 500;

/// Connection state and chain height, as published to the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: ConnectionState,
    /// Height of the best header chain.
    pub height: u32,
}

/// Drives the wallet from the peer's events.
pub struct Syncer {
    chain: HeaderChain,
    ledger: Arc<RwLock<Ledger>>,
    store: Arc<WalletStore>,
    peer: PeerHandle,
    events: PeerEvents,
    status: Arc<watch::Sender<SyncStatus>>,
    /// Blocks asked for and not yet received.
    requested: HashSet<BlockHash>,
    /// Blocks received ahead of the next height to apply.
    queued: BTreeMap<u32, FilteredBlock>,
    /// Transactions asked for after an announcement.
    requested_txs: HashSet<TxHash>,
    /// True once the peer answered `getheaders` with a short batch.
    headers_complete: bool,
}

impl Syncer {
    pub fn new(
        chain: HeaderChain,
        ledger: Arc<RwLock<Ledger>>,
        store: Arc<WalletStore>,
        peer: PeerHandle,
        events: PeerEvents,
        status: Arc<watch::Sender<SyncStatus>>,
    ) -> Syncer {
        Syncer {
            chain,
            ledger,
            store,
            peer,
            events,
            status,
            requested: HashSet::new(),
            queued: BTreeMap::new(),
            requested_txs: HashSet::new(),
            headers_complete: false,
        }
    }

    pub fn chain(&self) -> &HeaderChain {
        &self.chain
    }

    fn publish(&self, state: ConnectionState) {
        let height = self.chain.height();
        self.status.send_replace(SyncStatus { state, height });
    }

    /// Download headers and filtered blocks until the peer has nothing newer.
    ///
    /// The filter must already be loaded. Fails with `SyncTimeout` if the peer has not caught
    /// us up within `sync_timeout`, or with the reason the connection was lost.
    pub async fn initial_sync(&mut self, sync_timeout: Duration) -> Result<()> {
        self.publish(ConnectionState::Syncing);
        let started = self.chain.height();
        match timeout(sync_timeout, self.sync_to_tip()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.publish(ConnectionState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                self.publish(ConnectionState::Disconnected);
                return Err(Error::SyncTimeout);
            }
        }
        // have the peer relay the unconfirmed transactions matching our filter
        self.peer.send(Message::Mempool).await?;
        self.publish(ConnectionState::Synced);
        tracing::info!(
            peer = %self.peer.peer_addr(),
            from = started,
            height = self.chain.height(),
            "Initial sync complete"
        );
        Ok(())
    }

    async fn sync_to_tip(&mut self) -> Result<()> {
        self.peer.get_headers(self.chain.locator()).await?;
        self.request_blocks().await?;
        while !self.is_synced().await {
            let event = self.next_event().await?;
            self.handle_event(event).await?;
        }
        Ok(())
    }

    async fn is_synced(&self) -> bool {
        self.headers_complete
            && self.requested.is_empty()
            && self.queued.is_empty()
            && self.ledger.read().await.synced_height() >= self.chain.height()
    }

    async fn next_event(&mut self) -> Result<PeerEvent> {
        match self.events.recv().await {
            Some(PeerEvent::Disconnected(reason)) => Err(Error::Disconnected(reason)),
            Some(event) => Ok(event),
            None => Err(Error::Disconnected("event stream closed".to_string())),
        }
    }

    /// Keep the wallet current until the connection ends.
    pub async fn run(mut self) {
        let reason = loop {
            let event = match self.next_event().await {
                Ok(event) => event,
                Err(e) => break e,
            };
            if let Err(e) = self.handle_event(event).await {
                tracing::error!(error = %e, "Ingestion failed, dropping the peer");
                self.peer.disconnect().await;
                break e;
            }
        };
        self.publish(ConnectionState::Disconnected);
        tracing::info!(reason = %reason, "Ingestion stopped");
    }

    async fn handle_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::Headers(headers) => self.handle_headers(headers).await,
            PeerEvent::Block(block) => self.handle_block(block).await,
            PeerEvent::Transaction(tx) => {
                let txid = tx.hash();
                self.requested_txs.remove(&txid);
                let mut ledger = self.ledger.write().await;
                let relevant =
                    WalletStore::commit_with(&self.store, &mut ledger, Vec::new(), |l| {
                        Ok(l.apply_transaction(&tx))
                    })
                    .await?;
                drop(ledger);
                if relevant {
                    tracing::info!(txid = %txid, "Received wallet transaction");
                }
                Ok(())
            }
            PeerEvent::Inventory(items) => {
                let mut txids = Vec::new();
                let mut new_block = false;
                {
                    let ledger = self.ledger.read().await;
                    for item in items {
                        match item.inv_type {
                            InvType::Tx => {
                                if ledger.record(&item.hash).is_none()
                                    && self.requested_txs.insert(item.hash)
                                {
                                    txids.push(item.hash);
                                }
                            }
                            InvType::Block | InvType::FilteredBlock => {
                                new_block |= self.chain.height_of(&item.hash).is_none();
                            }
                            _ => {}
                        }
                    }
                }
                self.peer.get_transactions(&txids).await?;
                if new_block {
                    self.peer.get_headers(self.chain.locator()).await?;
                }
                Ok(())
            }
            PeerEvent::NotFound(items) => {
                for item in items {
                    if self.requested.remove(&item.hash) {
                        tracing::warn!(block = %item.hash, "Peer does not have a requested block");
                    }
                    self.requested_txs.remove(&item.hash);
                }
                Ok(())
            }
            PeerEvent::Disconnected(reason) => Err(Error::Disconnected(reason)),
        }
    }

    async fn handle_headers(&mut self, headers: Vec<BlockHeader>) -> Result<()> {
        let full_batch = headers.len() >= MAX_HEADERS_RESULTS;
        let mut orphan = false;
        let mut fork = None;
        for header in headers {
            match self.chain.accept_header(header) {
                HeaderOutcome::Orphan => orphan = true,
                HeaderOutcome::Reorganized { fork_height, .. } => {
                    fork = Some(fork.map_or(fork_height, |f: u32| f.min(fork_height)));
                }
                HeaderOutcome::Extended { .. }
                | HeaderOutcome::Duplicate
                | HeaderOutcome::SideBranch => {}
            }
        }

        {
            let mut ledger = self.ledger.write().await;
            if let Some(fork_height) = fork {
                if fork_height < ledger.synced_height() {
                    ledger.disconnect_above(fork_height);
                }
                self.queued.retain(|h, _| *h <= fork_height);
                let chain = &self.chain;
                self.requested.retain(|h| chain.is_on_best_chain(h));
            }
            let headers = self.chain.take_unsaved();
            WalletStore::commit_with(&self.store, &mut ledger, headers, |_| Ok(())).await?;
        }
        let state = self.status.borrow().state;
        self.publish(state);

        if full_batch || orphan {
            self.headers_complete = false;
            self.peer.get_headers(self.chain.locator()).await?;
        } else {
            self.headers_complete = true;
        }
        self.request_blocks().await
    }

    async fn handle_block(&mut self, block: FilteredBlock) -> Result<()> {
        let hash = block.hash();
        self.requested.remove(&hash);
        if !self.chain.is_on_best_chain(&hash) {
            if self.chain.height_of(&hash).is_none() {
                tracing::debug!(block = %hash, "Block for unknown header, asking for headers");
                self.headers_complete = false;
                self.peer.get_headers(self.chain.locator()).await?;
            } else {
                tracing::debug!(block = %hash, "Ignoring block off the best chain");
            }
            return Ok(());
        }
        let height = match self.chain.height_of(&hash) {
            Some(h) => h,
            None => return Ok(()),
        };

        {
            let mut ledger = self.ledger.write().await;
            if height <= ledger.synced_height() {
                tracing::trace!(block = %hash, height, "Block already applied");
                return Ok(());
            }
            self.queued.insert(height, block);
            loop {
                let next = ledger.synced_height() + 1;
                let block = match self.queued.remove(&next) {
                    Some(b) => b,
                    None => break,
                };
                if self.chain.hash_at(next) != Some(block.hash()) {
                    continue;
                }
                let headers = self.chain.take_unsaved();
                let applied = WalletStore::commit_with(&self.store, &mut ledger, headers, |l| {
                    l.apply_block(&block, next)
                })
                .await?;
                if !applied.confirmed.is_empty() {
                    tracing::info!(
                        block = %block.hash(),
                        height = next,
                        confirmed = applied.confirmed.len(),
                        new = applied.new.len(),
                        "Applied block"
                    );
                }
            }
        }
        self.request_blocks().await
    }

    /// Ask for the best chain blocks above the ledger that are neither queued nor in flight.
    async fn request_blocks(&mut self) -> Result<()> {
        let from = self.ledger.read().await.synced_height() + 1;
        let mut wanted = Vec::new();
        for height in from..=self.chain.height() {
            if self.requested.len() + wanted.len() >= MAX_BLOCKS_IN_FLIGHT {
                break;
            }
            if self.queued.contains_key(&height) {
                continue;
            }
            if let Some(hash) = self.chain.hash_at(height) {
                if !self.requested.contains(&hash) {
                    wanted.push(hash);
                }
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }
        tracing::debug!(from, count = wanted.len(), "Requesting filtered blocks");
        self.peer.get_filtered_blocks(&wanted).await?;
        // the pong ends the last merkleblock even if the peer holds back its transactions
        self.peer
            .send(Message::Ping(PingPongState::generate_nonce()))
            .await?;
        self.requested.extend(wanted);
        Ok(())
    }
}

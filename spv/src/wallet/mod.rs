//! The wallet: key derivation, the ledger and its persistence, payments, and the facade that
//! wires them to a peer.
//!
//! [Wallet::connect] derives the watch window, loads the persisted ledger and headers, connects
//! to the peer, registers the bloom filter and syncs before returning, so balances read right
//! after construction include every confirmed payment.

pub mod builder;
pub mod config;
pub mod deriver;
pub mod ledger;
pub mod store;
pub mod sync;
pub mod watch;

pub use self::builder::{check_network, select_coins, Payment, TransactionBuilder, DUST_LIMIT};
pub use self::config::{Checkpoint, WalletConfig, DEFAULT_FEE, DEFAULT_WALLET_ID};
pub use self::deriver::{Chain, DerivedAddress, KeyDeriver};
pub use self::ledger::{Balance, ChangeSet, Ledger, TxRecord, TxStatus, Utxo};
pub use self::store::WalletStore;
pub use self::sync::{SyncStatus, Syncer};
pub use self::watch::WatchSet;

use crate::bitcoin::hd::HARDENED;
use crate::bitcoin::{FromHex, Network, Outpoint, Tx};
use crate::chain::HeaderChain;
use crate::p2p::{ConnectionState, PeerConnection, PeerHandle, TxBroadcaster};
use crate::util::Amount;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{watch as status_channel, Mutex, RwLock};
use tokio::task::JoinHandle;

/// A live connection: the peer and the task ingesting its events.
struct Session {
    peer: PeerHandle,
    ingestion: JoinHandle<()>,
}

/// An SPV wallet bound to one network and one peer.
pub struct Wallet {
    config: WalletConfig,
    deriver: KeyDeriver,
    ledger: Arc<RwLock<Ledger>>,
    store: Arc<WalletStore>,
    status: Arc<status_channel::Sender<SyncStatus>>,
    session: Mutex<Option<Session>>,
    filter_tweak: u32,
}

impl Wallet {
    /// Build the wallet and sync it with the peer.
    ///
    /// Fails with `InvalidKeyMaterial` if the key does not parse or belongs to another network,
    /// `PeerUnreachable` or `HandshakeFailed` if the peer cannot be used, and `SyncTimeout` if
    /// the initial sync takes longer than configured.
    pub async fn connect(config: WalletConfig) -> Result<Wallet> {
        if config.peer_config.network != config.network {
            return Err(Error::InvalidConfiguration(format!(
                "peer configured for {}, wallet for {}",
                config.peer_config.network, config.network
            )));
        }
        let deriver =
            KeyDeriver::from_key_str(&config.hd_key, config.network)?.with_kind(config.address_kind);
        let store = match config.store_path() {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                WalletStore::open(path, config.network, &config.wallet_id)?
            }
            None => WalletStore::open_in_memory(config.network, &config.wallet_id)?,
        };
        let chain = load_chain(&config, &store)?;

        let mut watch = WatchSet::new();
        watch.extend(deriver.derive_range(Chain::Receive, 0..config.receive_window)?);
        watch.extend(deriver.derive_range(Chain::Change, 0..config.change_window)?);
        let mut ledger = store.load_ledger(watch, chain.start_height())?;
        // addresses handed out beyond the windows on a previous run
        for index in config.receive_window..ledger.next_receive_index() {
            ledger.watch_address(deriver.derive(Chain::Receive, index)?);
        }
        for index in config.change_window..ledger.next_change_index() {
            ledger.watch_address(deriver.derive(Chain::Change, index)?);
        }
        tracing::info!(
            network = %config.network,
            wallet_id = %config.wallet_id,
            watched = ledger.watch().len(),
            height = chain.height(),
            "Opened wallet"
        );

        let (status, _) = status_channel::channel(SyncStatus {
            state: ConnectionState::Disconnected,
            height: chain.height(),
        });
        let wallet = Wallet {
            config,
            deriver,
            ledger: Arc::new(RwLock::new(ledger)),
            store: Arc::new(store),
            status: Arc::new(status),
            session: Mutex::new(None),
            filter_tweak: rand::random(),
        };
        let session = wallet.start_session(chain).await?;
        *wallet.session.lock().await = Some(session);
        Ok(wallet)
    }

    async fn start_session(&self, chain: HeaderChain) -> Result<Session> {
        self.status.send_replace(SyncStatus {
            state: ConnectionState::Connecting,
            height: chain.height(),
        });
        let connected = PeerConnection::connect(
            &self.config.peer,
            self.config.peer_config.clone(),
            chain.height(),
        )
        .await;
        let (peer, events) = match connected {
            Ok(c) => c,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut syncer = Syncer::new(
            chain,
            self.ledger.clone(),
            self.store.clone(),
            peer.clone(),
            events,
            self.status.clone(),
        );
        let synced = match self.load_filter(&peer).await {
            Ok(()) => syncer.initial_sync(self.config.sync_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            peer.disconnect().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        let ingestion = tokio::spawn(syncer.run());
        Ok(Session { peer, ingestion })
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }

    async fn load_filter(&self, peer: &PeerHandle) -> Result<()> {
        let filter = {
            let ledger = self.ledger.read().await;
            ledger
                .watch()
                .bloom_filter(self.config.bloom_fp_rate, self.filter_tweak, &ledger.outpoints())
        };
        tracing::debug!(
            bytes = filter.content.len(),
            hash_funcs = filter.hash_funcs,
            "Loading bloom filter"
        );
        peer.load_filter(filter).await
    }

    /// The connected peer, or `Disconnected`.
    async fn peer(&self) -> Result<PeerHandle> {
        match self.session.lock().await.as_ref() {
            Some(s) if s.peer.is_connected() => Ok(s.peer.clone()),
            _ => Err(Error::Disconnected("the wallet is not connected".to_string())),
        }
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Connection state and header chain height.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> status_channel::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// The balance, pending outputs included.
    pub async fn get_balance(&self) -> Amount {
        self.ledger.read().await.get_balance()
    }

    /// Confirmed and total balance.
    pub async fn get_balance_detail(&self) -> Balance {
        self.ledger.read().await.balance()
    }

    /// The default receive address.
    pub async fn get_address(&self) -> Result<String> {
        self.get_receive_address(0).await
    }

    /// The receive address at `index`. Addresses beyond the watch window are derived, added
    /// to the peer's filter, and remembered so they are watched again after a restart.
    pub async fn get_receive_address(&self, index: u32) -> Result<String> {
        if let Some(address) = self.ledger.read().await.get_receive_address(index) {
            return Ok(address.to_string());
        }
        if index >= HARDENED {
            return Err(Error::BadArgument(format!("address index {} out of range", index)));
        }
        let derived = self.deriver.derive(Chain::Receive, index)?;
        {
            let mut ledger = self.ledger.write().await;
            WalletStore::commit_with(&self.store, &mut ledger, Vec::new(), |l| {
                l.watch_address(derived);
                l.note_used(Chain::Receive, index);
                Ok(())
            })
            .await?;
        }
        if let Ok(peer) = self.peer().await {
            self.load_filter(&peer).await?;
        }
        Ok(derived.address.to_string())
    }

    pub async fn unspent(&self) -> Vec<Utxo> {
        self.ledger.read().await.unspent()
    }

    pub async fn transactions(&self) -> Vec<TxRecord> {
        self.ledger.read().await.transactions()
    }

    /// The fixed fee, in satoshis.
    pub fn get_fee(&self) -> String {
        self.config.fee.to_string()
    }

    /// Pay `amount` satoshis to `destination`, returning the txid.
    ///
    /// `network` must be the wallet's network. Nothing is broadcast unless the payment can be
    /// funded, and a failed broadcast is never retried. The outputs it spends stay unavailable
    /// to other payments until the broadcast fails or the payment is applied.
    pub async fn send_to_address(
        &self,
        destination: &str,
        amount: u64,
        network: Network,
    ) -> Result<String> {
        check_network(self.config.network, network)?;
        let payment = {
            let mut ledger = self.ledger.write().await;
            TransactionBuilder::new(&self.deriver, self.config.fee).build_payment(
                &mut ledger,
                destination,
                amount,
            )?
        };
        let sent = self.send_payment(&payment).await;
        if sent.is_err() {
            let outpoints: Vec<Outpoint> = payment.inputs.iter().map(|u| u.outpoint()).collect();
            self.ledger.write().await.release_outpoints(&outpoints);
        }
        sent
    }

    async fn send_payment(&self, payment: &Payment) -> Result<String> {
        let peer = self.peer().await?;
        if payment.watch_grew {
            self.load_filter(&peer).await?;
        }
        self.broadcast(&peer, &payment.tx).await
    }

    /// Broadcast a raw transaction, returning its txid.
    ///
    /// The transaction is applied to the ledger once the peer accepted it, which only matters if
    /// it touches the wallet.
    pub async fn broadcast_transaction(&self, raw_hex: &str, network: Network) -> Result<String> {
        check_network(self.config.network, network)?;
        let tx = Tx::from_hex(raw_hex.trim())
            .map_err(|e| Error::MalformedTransaction(e.to_string()))?;
        let peer = self.peer().await?;
        self.broadcast(&peer, &tx).await
    }

    async fn broadcast(&self, broadcaster: &dyn TxBroadcaster, tx: &Tx) -> Result<String> {
        let txid = tx.hash();
        broadcaster.broadcast(tx).await?;
        let mut ledger = self.ledger.write().await;
        WalletStore::commit_with(&self.store, &mut ledger, Vec::new(), |l| {
            l.apply_transaction(tx);
            Ok(())
        })
        .await?;
        drop(ledger);
        tracing::info!(txid = %txid, "Transaction sent");
        Ok(txid.to_string())
    }

    /// Drop the current connection, if any, and connect and sync again.
    pub async fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            close(old).await;
        }
        let chain = load_chain(&self.config, &self.store)?;
        *session = Some(self.start_session(chain).await?);
        Ok(())
    }

    /// Disconnect from the peer. Everything applied so far stays persisted.
    pub async fn shutdown(&self) {
        if let Some(old) = self.session.lock().await.take() {
            close(old).await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

async fn close(session: Session) {
    session.peer.disconnect().await;
    let _ = session.ingestion.await;
}

/// Rebuild the header chain from the start header and the stored headers.
fn load_chain(config: &WalletConfig, store: &WalletStore) -> Result<HeaderChain> {
    let mut chain = match &config.checkpoint {
        Some(c) => HeaderChain::from_checkpoint(c.height, c.header.clone()),
        None => HeaderChain::new(config.network),
    };
    for header in store.load_headers()? {
        chain.accept_header(header);
    }
    chain.take_unsaved();
    Ok(chain)
}

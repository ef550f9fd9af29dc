//! SQLite persistence for the ledger and the header chain.
//!
//! Every row is keyed by network and wallet id so several wallets can share one database
//! file. A block's ledger changes and the headers accepted with it are written in a single SQL
//! transaction.

use crate::bitcoin::{Address, AddressKind, BlockHeader, Encodable, Hash, Hash160, Network, Tx};
use crate::wallet::ledger::{ChangeSet, Ledger, TxRecord, TxStatus, Utxo};
use crate::wallet::watch::WatchSet;
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS utxos (
    network TEXT NOT NULL,
    wallet_id TEXT NOT NULL,
    txid BLOB NOT NULL,
    vout INTEGER NOT NULL,
    pubkey_hash BLOB NOT NULL,
    kind INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    height INTEGER,
    PRIMARY KEY (network, wallet_id, txid, vout)
);
CREATE TABLE IF NOT EXISTS transactions (
    network TEXT NOT NULL,
    wallet_id TEXT NOT NULL,
    txid BLOB NOT NULL,
    raw BLOB NOT NULL,
    status TEXT NOT NULL,
    height INTEGER,
    block_hash BLOB,
    spent BLOB NOT NULL,
    applied INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    PRIMARY KEY (network, wallet_id, txid)
);
CREATE TABLE IF NOT EXISTS headers (
    network TEXT NOT NULL,
    wallet_id TEXT NOT NULL,
    hash BLOB NOT NULL,
    height INTEGER NOT NULL,
    header BLOB NOT NULL,
    PRIMARY KEY (network, wallet_id, hash)
);
CREATE TABLE IF NOT EXISTS meta (
    network TEXT NOT NULL,
    wallet_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (network, wallet_id, key)
);
";

const META_SYNCED_HEIGHT: &str = "synced_height";
const META_NEXT_CHANGE_INDEX: &str = "next_change_index";
const META_NEXT_RECEIVE_INDEX: &str = "next_receive_index";

/// Size of a spent output in the `spent` column: txid, vout, pubkey hash, address kind,
/// amount, height.
const SPENT_ENTRY_SIZE: usize = 32 + 4 + 20 + 1 + 8 + 4;
const NO_HEIGHT: u32 = u32::MAX;

/// The wallet database.
pub struct WalletStore {
    conn: Mutex<Connection>,
    network: Network,
    wallet_id: String,
}

impl WalletStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, network: Network, wallet_id: &str) -> Result<WalletStore> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            Error::Storage(format!("failed to open {}: {}", path.as_ref().display(), e))
        })?;
        WalletStore::init(conn, network, wallet_id)
    }

    /// A database that lives as long as the store.
    pub fn open_in_memory(network: Network, wallet_id: &str) -> Result<WalletStore> {
        WalletStore::init(Connection::open_in_memory()?, network, wallet_id)
    }

    fn init(conn: Connection, network: Network, wallet_id: &str) -> Result<WalletStore> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::Storage(format!("failed to create tables: {}", e)))?;
        Ok(WalletStore {
            conn: Mutex::new(conn),
            network,
            wallet_id: wallet_id.to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("mutex poisoned".to_string()))
    }

    fn key(&self) -> (&'static str, &str) {
        (self.network.as_str(), &self.wallet_id)
    }

    /// Load the ledger. A wallet never seen before starts with blocks after `start_height`.
    pub fn load_ledger(&self, watch: WatchSet, start_height: u32) -> Result<Ledger> {
        let conn = self.lock()?;
        let (network, wallet_id) = self.key();

        let mut stmt = conn.prepare(
            "SELECT txid, vout, pubkey_hash, kind, amount, height FROM utxos
             WHERE network = ?1 AND wallet_id = ?2",
        )?;
        let rows = stmt.query_map(params![network, wallet_id], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, u8>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;
        let mut utxos = Vec::new();
        for row in rows {
            let (txid, vout, hash, kind, amount, height) = row?;
            utxos.push(Utxo {
                txid: Hash::from_slice(&txid)?,
                vout: vout as u32,
                address: Address::with_kind(
                    self.network,
                    AddressKind::from_u8(kind)?,
                    Hash160::from_slice(&hash)?,
                ),
                amount: amount as u64,
                height: height.map(|h| h as u32),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT txid, raw, status, height, block_hash, spent, applied, seq FROM transactions
             WHERE network = ?1 AND wallet_id = ?2",
        )?;
        let rows = stmt.query_map(params![network, wallet_id], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (txid, raw, status, height, block_hash, spent, applied, seq) = row?;
            let status = match status.as_str() {
                "pending" => TxStatus::Pending,
                "confirmed" => TxStatus::Confirmed,
                other => return Err(Error::Storage(format!("unknown status {}", other))),
            };
            records.push(TxRecord {
                txid: Hash::from_slice(&txid)?,
                tx: Tx::from_binary_buf(&raw)?,
                status,
                height: height.map(|h| h as u32),
                block_hash: block_hash.map(|h| Hash::from_slice(&h)).transpose()?,
                spent: self.decode_spent(&spent)?,
                applied,
                seq: seq as u64,
            });
        }

        let synced_height = read_meta(&conn, network, wallet_id, META_SYNCED_HEIGHT)?;
        let next_change_index = read_meta(&conn, network, wallet_id, META_NEXT_CHANGE_INDEX)?;
        let next_receive_index = read_meta(&conn, network, wallet_id, META_NEXT_RECEIVE_INDEX)?;
        tracing::debug!(
            utxos = utxos.len(),
            records = records.len(),
            synced_height,
            "Loaded ledger"
        );
        Ok(Ledger::restore(
            self.network,
            watch,
            utxos,
            records,
            synced_height.unwrap_or(start_height),
            next_change_index.unwrap_or(0),
            next_receive_index.unwrap_or(0),
        ))
    }

    /// Every stored header, parents before children, in the order they were first accepted.
    pub fn load_headers(&self) -> Result<Vec<BlockHeader>> {
        let conn = self.lock()?;
        let (network, wallet_id) = self.key();
        let mut stmt = conn.prepare(
            "SELECT header FROM headers WHERE network = ?1 AND wallet_id = ?2
             ORDER BY height, rowid",
        )?;
        let rows = stmt.query_map(params![network, wallet_id], |row| row.get::<_, Vec<u8>>(0))?;
        let mut headers = Vec::new();
        for row in rows {
            headers.push(BlockHeader::from_binary_buf(&row?)?);
        }
        Ok(headers)
    }

    /// Write ledger changes and newly accepted headers in one transaction.
    pub fn commit(&self, changes: &ChangeSet, headers: &[(u32, BlockHeader)]) -> Result<()> {
        let conn = self.lock()?;
        let (network, wallet_id) = self.key();
        let tx = conn.unchecked_transaction()?;

        for (height, header) in headers {
            tx.execute(
                "INSERT OR IGNORE INTO headers (network, wallet_id, hash, height, header)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    network,
                    wallet_id,
                    header.hash().raw.to_vec(),
                    *height as i64,
                    header.to_binary_buf()?,
                ],
            )?;
        }

        for (outpoint, utxo) in &changes.utxos {
            match utxo {
                Some(u) => tx.execute(
                    "INSERT OR REPLACE INTO utxos
                     (network, wallet_id, txid, vout, pubkey_hash, kind, amount, height)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        network,
                        wallet_id,
                        u.txid.raw.to_vec(),
                        u.vout as i64,
                        u.address.hash160.hash.to_vec(),
                        u.address.kind.as_u8(),
                        u.amount as i64,
                        u.height.map(|h| h as i64),
                    ],
                )?,
                None => tx.execute(
                    "DELETE FROM utxos
                     WHERE network = ?1 AND wallet_id = ?2 AND txid = ?3 AND vout = ?4",
                    params![
                        network,
                        wallet_id,
                        outpoint.tx_hash.raw.to_vec(),
                        outpoint.index as i64
                    ],
                )?,
            };
        }

        for r in &changes.records {
            tx.execute(
                "INSERT OR REPLACE INTO transactions
                 (network, wallet_id, txid, raw, status, height, block_hash, spent, applied, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    network,
                    wallet_id,
                    r.txid.raw.to_vec(),
                    r.tx.to_binary_buf()?,
                    r.status.as_str(),
                    r.height.map(|h| h as i64),
                    r.block_hash.map(|h| h.raw.to_vec()),
                    encode_spent(&r.spent),
                    r.applied,
                    r.seq as i64,
                ],
            )?;
        }

        write_meta(&tx, network, wallet_id, META_SYNCED_HEIGHT, changes.synced_height)?;
        write_meta(
            &tx,
            network,
            wallet_id,
            META_NEXT_CHANGE_INDEX,
            changes.next_change_index,
        )?;
        write_meta(
            &tx,
            network,
            wallet_id,
            META_NEXT_RECEIVE_INDEX,
            changes.next_receive_index,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Run `f` against the ledger, then persist what it changed together with `headers`.
    ///
    /// The write happens on the blocking thread pool. If `f` or the write fails the ledger is
    /// rolled back, so memory never runs ahead of the database.
    pub async fn commit_with<T>(
        store: &Arc<WalletStore>,
        ledger: &mut Ledger,
        headers: Vec<(u32, BlockHeader)>,
        f: impl FnOnce(&mut Ledger) -> Result<T>,
    ) -> Result<T> {
        let snapshot = ledger.snapshot();
        let result = match f(ledger) {
            Ok(value) => {
                let changes = ledger.take_changes();
                let store = store.clone();
                match task::spawn_blocking(move || store.commit(&changes, &headers)).await {
                    Ok(Ok(())) => Ok(value),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(Error::Storage(format!("commit task failed: {}", e))),
                }
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            ledger.rollback(snapshot);
        }
        result
    }

    fn decode_spent(&self, data: &[u8]) -> Result<Vec<Utxo>> {
        if data.len() % SPENT_ENTRY_SIZE != 0 {
            return Err(Error::Storage(format!("spent column of {} bytes", data.len())));
        }
        let mut buf = data;
        let mut spent = Vec::with_capacity(data.len() / SPENT_ENTRY_SIZE);
        while buf.has_remaining() {
            let txid = Hash::from_binary(&mut buf)?;
            let vout = buf.get_u32_le();
            let hash = Hash160::from_slice(&buf[..Hash160::SIZE])?;
            buf.advance(Hash160::SIZE);
            let kind = AddressKind::from_u8(buf.get_u8())?;
            let amount = buf.get_u64_le();
            let height = buf.get_u32_le();
            spent.push(Utxo {
                txid,
                vout,
                address: Address::with_kind(self.network, kind, hash),
                amount,
                height: (height != NO_HEIGHT).then_some(height),
            });
        }
        Ok(spent)
    }
}

fn encode_spent(spent: &[Utxo]) -> Vec<u8> {
    let mut v = Vec::with_capacity(spent.len() * SPENT_ENTRY_SIZE);
    for u in spent {
        v.put_slice(&u.txid.raw);
        v.put_u32_le(u.vout);
        v.put_slice(&u.address.hash160.hash);
        v.put_u8(u.address.kind.as_u8());
        v.put_u64_le(u.amount);
        v.put_u32_le(u.height.unwrap_or(NO_HEIGHT));
    }
    v
}

fn read_meta(conn: &Connection, network: &str, wallet_id: &str, key: &str) -> Result<Option<u32>> {
    let value = conn
        .query_row(
            "SELECT value FROM meta WHERE network = ?1 AND wallet_id = ?2 AND key = ?3",
            params![network, wallet_id, key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(value.map(|v| v as u32))
}

fn write_meta(conn: &Connection, network: &str, wallet_id: &str, key: &str, value: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (network, wallet_id, key, value) VALUES (?1, ?2, ?3, ?4)",
        params![network, wallet_id, key, value as i64],
    )?;
    Ok(())
}

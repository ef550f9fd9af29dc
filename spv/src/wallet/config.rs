use crate::bitcoin::{AddressKind, BlockHeader, Network};
use crate::p2p::PeerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The fee paid by every transaction the wallet builds, in satoshis.
pub const DEFAULT_FEE: u64 = 150;
/// Number of addresses derived on each chain at startup.
pub const DEFAULT_WATCH_WINDOW: u32 = 100;
pub const DEFAULT_WALLET_ID: &str = "primary";
/// Where the database lives unless configured otherwise, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "./.spvwallet";

/// A trusted header to start the chain from instead of genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u32,
    pub header: BlockHeader,
}

/// Configuration of a wallet.
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// The network the wallet is bound to.
    pub network: Network,
    /// The peer, as `host:port`.
    pub peer: String,
    /// The serialized BIP32 extended private key. Read from configuration but never written.
    #[serde(skip_serializing)]
    pub hd_key: String,
    /// Directory of the database file. None keeps the wallet in memory.
    pub data_dir: Option<PathBuf>,
    /// Kind of the addresses derived, and so of the outputs the wallet receives and spends.
    pub address_kind: AddressKind,
    /// Distinguishes wallets sharing a database.
    pub wallet_id: String,
    /// Receive addresses derived at startup.
    pub receive_window: u32,
    /// Change addresses derived at startup.
    pub change_window: u32,
    /// Fixed fee of every transaction built, in satoshis.
    pub fee: u64,
    /// False positive rate of the bloom filter sent to the peer.
    pub bloom_fp_rate: f64,
    pub checkpoint: Option<Checkpoint>,
    /// Time allowed for the initial sync.
    pub sync_timeout: Duration,
    pub peer_config: PeerConfig,
}

impl WalletConfig {
    /// Default configuration for `network`.
    pub fn default_for(network: Network, peer: &str, hd_key: &str) -> WalletConfig {
        WalletConfig {
            network,
            peer: peer.to_string(),
            hd_key: hd_key.to_string(),
            data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            address_kind: AddressKind::P2wpkh,
            wallet_id: DEFAULT_WALLET_ID.to_string(),
            receive_window: DEFAULT_WATCH_WINDOW,
            change_window: DEFAULT_WATCH_WINDOW,
            fee: DEFAULT_FEE,
            bloom_fp_rate: 0.0001,
            checkpoint: None,
            sync_timeout: Duration::from_secs(600),
            peer_config: PeerConfig::default_for(network),
        }
    }

    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> WalletConfig {
        self.data_dir = Some(path.into());
        self
    }

    /// Keep the wallet in memory only. Nothing survives the process.
    pub fn in_memory(mut self) -> WalletConfig {
        self.data_dir = None;
        self
    }

    /// The database file, `<data_dir>/<network>.sqlite`.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|d| d.join(format!("{}.sqlite", self.network)))
    }
}

impl fmt::Debug for WalletConfig {
    // the key never appears in logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("network", &self.network)
            .field("peer", &self.peer)
            .field("hd_key", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("address_kind", &self.address_kind)
            .field("wallet_id", &self.wallet_id)
            .field("receive_window", &self.receive_window)
            .field("change_window", &self.change_window)
            .field("fee", &self.fee)
            .field("checkpoint", &self.checkpoint.as_ref().map(|c| c.height))
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = WalletConfig::default_for(Network::Testnet, "127.0.0.1:18333", "tprv-secret");
        assert_eq!(c.fee, 150);
        assert_eq!(c.wallet_id, "primary");
        assert_eq!(c.receive_window, 100);
        assert_eq!(c.peer_config.network, Network::Testnet);
        assert_eq!(c.address_kind, AddressKind::P2wpkh);
        assert_eq!(
            c.store_path(),
            Some(PathBuf::from("./.spvwallet/testnet.sqlite"))
        );
        assert_eq!(c.in_memory().store_path(), None);
    }

    #[test]
    fn store_path_is_per_network() {
        let c = WalletConfig::default_for(Network::Regtest, "localhost:18444", "k")
            .with_data_dir("/var/lib/spv");
        assert_eq!(c.store_path(), Some(PathBuf::from("/var/lib/spv/regtest.sqlite")));
    }

    #[test]
    fn debug_hides_key() {
        let c = WalletConfig::default_for(Network::Mainnet, "node:8333", "xprv-very-secret");
        let s = format!("{:?}", c);
        assert!(!s.contains("very-secret"));
        assert!(s.contains("redacted"));
    }

    #[test]
    fn json_never_carries_the_key() {
        let c = WalletConfig::default_for(Network::Testnet, "node:18333", "tprv-very-secret");
        let mut json = serde_json::to_value(&c).unwrap();
        assert!(json.get("hd_key").is_none());
        assert!(!json.to_string().contains("very-secret"));

        // a configuration file supplies the key
        json["hd_key"] = serde_json::Value::from("k");
        let back: WalletConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.hd_key, "k");
        assert_eq!(back.network, Network::Testnet);
        assert_eq!(back.address_kind, AddressKind::P2wpkh);
        assert_eq!(back.sync_timeout, c.sync_timeout);
        assert_eq!(back.peer, "node:18333");
    }
}

use crate::bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the connection to the peer.
///
/// Every wait on the network is bounded by one of these timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// The network (mainnet, testnet, regtest) to use. Selects the message magic.
    pub network: Network,
    /// The user agent sent in our version message.
    pub user_agent: String,
    /// Time allowed to establish the TCP connection.
    pub connect_timeout: Duration,
    /// Time allowed for the version/verack exchange.
    pub handshake_timeout: Duration,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Time the peer has to answer a ping.
    pub ping_timeout: Duration,
    /// Time the peer has to acknowledge a broadcast transaction.
    pub broadcast_timeout: Duration,
}

impl PeerConfig {
    /// Get default configuration for a particular network.
    pub fn default_for(network: Network) -> Self {
        PeerConfig {
            network,
            user_agent: format!("/spvwallet:{}/", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(120),
            ping_timeout: Duration::from_secs(60),
            broadcast_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for PeerConfig {
    // Default configuration, connects to mainnet.
    fn default() -> Self {
        PeerConfig::default_for(Network::Mainnet)
    }
}

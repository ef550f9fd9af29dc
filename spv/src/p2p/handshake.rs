//! Handshake protocol implementation for P2P connections
//!
//! The handshake process requires 4 flags to complete:
//! - version_sent: We sent our Version message
//! - version_received: We received peer's Version message
//! - verack_sent: We sent Verack message
//! - verack_received: We received peer's Verack message
//!
//! Messages can arrive in any order.

use crate::p2p::{
    NetworkAddress, Services, VersionMessage, MIN_BLOOM_VERSION, PROTOCOL_VERSION,
};
use crate::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

/// Handshake state tracking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeState {
    /// We sent our version message
    pub version_sent: bool,
    /// We received peer's version message
    pub version_received: bool,
    /// We sent verack message
    pub verack_sent: bool,
    /// We received peer's verack message
    pub verack_received: bool,
    /// Peer's version message (once received)
    pub peer_version: Option<VersionMessage>,
}

impl HandshakeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if handshake is complete (all 4 flags true)
    pub fn is_complete(&self) -> bool {
        self.version_sent && self.version_received && self.verack_sent && self.verack_received
    }

    pub fn mark_version_sent(&mut self) {
        self.version_sent = true;
    }

    /// Mark that we received peer's version. A second version message is a protocol violation.
    pub fn mark_version_received(&mut self, version: VersionMessage) -> Result<()> {
        if self.version_received {
            return Err(Error::ProtocolViolation(
                "duplicate version message".to_string(),
            ));
        }
        self.version_received = true;
        self.peer_version = Some(version);
        Ok(())
    }

    pub fn mark_verack_sent(&mut self) {
        self.verack_sent = true;
    }

    pub fn mark_verack_received(&mut self) {
        self.verack_received = true;
    }
}

/// Build our version message.
///
/// We advertise no services and ask the peer not to relay transactions until a filter is
/// loaded (BIP37 `relay = false`).
pub fn create_version_message(
    peer_addr: SocketAddr,
    nonce: u64,
    user_agent: &str,
    start_height: u32,
) -> VersionMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    VersionMessage {
        version: PROTOCOL_VERSION,
        services: Services::NONE,
        timestamp,
        recv_addr: NetworkAddress::new(peer_addr.ip(), peer_addr.port(), Services::NONE),
        from_addr: NetworkAddress::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, Services::NONE),
        nonce,
        user_agent: user_agent.to_string(),
        start_height,
        relay: false,
    }
}

/// Validate a peer's version message.
///
/// The peer must be able to serve filtered blocks: it advertises NODE_BLOOM, or it predates the
/// protocol version that introduced the flag. A peer echoing our own nonce is ourselves.
pub fn validate_version(version: &VersionMessage, our_nonce: u64) -> Result<()> {
    if version.nonce == our_nonce {
        return Err(Error::HandshakeFailed("connected to self".to_string()));
    }
    if version.version < 70001 {
        return Err(Error::HandshakeFailed(format!(
            "peer protocol version {} is too old",
            version.version
        )));
    }
    if version.version >= MIN_BLOOM_VERSION && !version.services.contains(Services::BLOOM) {
        return Err(Error::HandshakeFailed(format!(
            "peer {} does not serve bloom filters",
            version.user_agent
        )));
    }
    Ok(())
}

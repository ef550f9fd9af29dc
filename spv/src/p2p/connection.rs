//! Peer connection and actor
//!
//! A single outbound connection to one peer. [PeerConnection::connect] establishes the TCP
//! connection and performs the handshake, then spawns an actor task that owns the stream. The
//! caller talks to the actor through a [PeerHandle] and receives everything the peer sends, in
//! arrival order, as [PeerEvent]s.
//!
//! The connection is never re-established by this module. When it fails the event stream ends
//! with [PeerEvent::Disconnected] and the caller decides what to do.

use crate::bitcoin::{BlockHash, BlockHeader, BloomFilter, Tx, TxHash};
use crate::p2p::{
    create_version_message, validate_version, GetHeadersMessage, HandshakeState, InvType,
    Inventory, Message, MessageFramer, PeerConfig, PingPongState, VersionMessage,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, timeout, Instant};

/// Size of the command channel to the peer actor.
pub const ACTOR_CHANNEL_SIZE: usize = 100;

/// State of the wallet's connection to its peer.
///
/// Transitions Disconnected → Connecting → Syncing → Synced, and back to Disconnected when
/// the peer is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Syncing,
    Synced,
}

/// A block delivered by the peer, reduced to what the wallet needs.
///
/// For a `merkleblock` the `txids` are the matches proved by the partial merkle tree and `txs`
/// the matched transactions the peer sent after it. A matched transaction the peer already
/// relayed earlier may be missing from `txs`. For a full `block`, `txids` and `txs` hold every
/// transaction of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredBlock {
    pub header: BlockHeader,
    pub txids: Vec<TxHash>,
    pub txs: Vec<Tx>,
}

impl FilteredBlock {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

/// Everything the peer delivers, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A batch of headers, either answering `getheaders` or announcing new blocks.
    Headers(Vec<BlockHeader>),
    /// A filtered (or full) block, merkle proof already verified.
    Block(FilteredBlock),
    /// A transaction outside of a block: unconfirmed, matched by our filter.
    Transaction(Tx),
    /// The peer announced transactions or blocks.
    Inventory(Vec<Inventory>),
    /// The peer could not serve some requested items.
    NotFound(Vec<Inventory>),
    /// The connection is gone. This is always the last event.
    Disconnected(String),
}

/// The ordered stream of events from the peer.
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// Submits transactions to the network.
#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    /// Broadcast `tx`, resolving once the peer has processed it. Never retried.
    async fn broadcast(&self, tx: &Tx) -> Result<()>;
}

/// Commands to the peer actor.
enum PeerCommand {
    Send(Message),
    Broadcast {
        tx: Tx,
        reply: oneshot::Sender<Result<()>>,
    },
    Ping {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect,
}

/// The handle to a connected peer.
///
/// Handles can be cloned. The actor stops when it is told to disconnect, when the peer fails,
/// or when every handle has been dropped.
#[derive(Clone)]
pub struct PeerHandle {
    sender: mpsc::Sender<PeerCommand>,
    peer_addr: SocketAddr,
    peer_version: VersionMessage,
    broadcast_timeout: Duration,
}

impl PeerHandle {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The version message the peer sent during the handshake.
    pub fn peer_version(&self) -> &VersionMessage {
        &self.peer_version
    }

    /// True while the actor is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a message for the peer.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.command(PeerCommand::Send(message)).await
    }

    /// Replace the peer's filter.
    pub async fn load_filter(&self, filter: BloomFilter) -> Result<()> {
        if !filter.is_within_size_constraints() {
            return Err(Error::BadArgument("bloom filter is too large".to_string()));
        }
        self.send(Message::FilterLoad(filter)).await
    }

    /// Ask for the headers following the block locator.
    pub async fn get_headers(&self, locator: Vec<BlockHash>) -> Result<()> {
        self.send(Message::GetHeaders(GetHeadersMessage::new(locator)))
            .await
    }

    /// Ask for blocks as `merkleblock` messages filtered by the loaded filter.
    pub async fn get_filtered_blocks(&self, hashes: &[BlockHash]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let items = hashes
            .iter()
            .map(|h| Inventory::new(InvType::FilteredBlock, *h))
            .collect();
        self.send(Message::GetData(items)).await
    }

    /// Ask for transactions the peer announced.
    pub async fn get_transactions(&self, txids: &[TxHash]) -> Result<()> {
        if txids.is_empty() {
            return Ok(());
        }
        let items = txids
            .iter()
            .map(|h| Inventory::new(InvType::Tx, *h))
            .collect();
        self.send(Message::GetData(items)).await
    }

    /// Round trip a ping. Resolves once the peer has answered everything sent before it, and
    /// every event for those answers has been queued on the event stream.
    pub async fn ping(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(PeerCommand::Ping { reply }).await?;
        rx.await
            .map_err(|_| Error::Disconnected("peer actor stopped".to_string()))?
    }

    /// Close the connection.
    pub async fn disconnect(&self) {
        let _ = self.sender.send(PeerCommand::Disconnect).await;
    }

    async fn command(&self, command: PeerCommand) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| Error::Disconnected(format!("connection to {} is closed", self.peer_addr)))
    }
}

#[async_trait]
impl TxBroadcaster for PeerHandle {
    async fn broadcast(&self, tx: &Tx) -> Result<()> {
        let txid = tx.hash();
        let (reply, rx) = oneshot::channel();
        self.command(PeerCommand::Broadcast {
            tx: tx.clone(),
            reply,
        })
        .await?;
        match timeout(self.broadcast_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Disconnected(format!(
                "connection to {} closed during broadcast",
                self.peer_addr
            ))),
            Err(_) => Err(Error::BroadcastTimeout(txid.to_string())),
        }
    }
}

/// Establishes peer connections.
pub struct PeerConnection;

impl PeerConnection {
    /// Connect to `peer` (`host:port`), perform the handshake and spawn the actor.
    ///
    /// Fails with `PeerUnreachable` if the peer cannot be reached within the connect timeout and
    /// with `HandshakeFailed` if the handshake does not complete within the handshake timeout or
    /// the peer cannot serve filtered blocks.
    pub async fn connect(
        peer: &str,
        config: PeerConfig,
        start_height: u32,
    ) -> Result<(PeerHandle, PeerEvents)> {
        let mut stream = Self::open_stream(peer, config.connect_timeout).await?;
        let peer_addr = stream.peer_addr()?;
        let mut framer = MessageFramer::new(config.network.magic());

        let peer_version = timeout(
            config.handshake_timeout,
            Self::perform_handshake(&mut stream, &mut framer, peer_addr, &config, start_height),
        )
        .await
        .map_err(|_| Error::HandshakeFailed(format!("{} did not complete the handshake", peer_addr)))??;

        tracing::info!(
            peer = %peer_addr,
            user_agent = %peer_version.user_agent,
            start_height = peer_version.start_height,
            "Handshake complete"
        );

        // announce new blocks with headers (BIP130)
        write_message(&mut stream, &framer, &Message::SendHeaders).await?;

        let (sender, inbox) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        // unbounded: the consumer sends commands to the actor while it drains events
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let broadcast_timeout = config.broadcast_timeout;
        let actor = PeerActor {
            peer_addr,
            ping_pong: PingPongState::new(config.ping_timeout),
            config,
            stream,
            framer,
            inbox,
            events: events_tx,
            waiters: HashMap::new(),
            pending_block: None,
        };
        tokio::spawn(actor.run());

        Ok((
            PeerHandle {
                sender,
                peer_addr,
                peer_version,
                broadcast_timeout,
            },
            events_rx,
        ))
    }

    async fn open_stream(peer: &str, connect_timeout: Duration) -> Result<TcpStream> {
        tracing::debug!(peer = %peer, "Establishing outbound connection");
        let connect = async {
            let addrs: Vec<SocketAddr> = lookup_host(peer)
                .await
                .map_err(|e| Error::PeerUnreachable(format!("{}: {}", peer, e)))?
                .collect();
            let mut last_error = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_error = Some(e),
                }
            }
            Err(Error::PeerUnreachable(match last_error {
                Some(e) => format!("{}: {}", peer, e),
                None => format!("{}: no addresses", peer),
            }))
        };
        timeout(connect_timeout, connect)
            .await
            .map_err(|_| Error::PeerUnreachable(format!("{}: connection timed out", peer)))?
    }

    async fn perform_handshake(
        stream: &mut TcpStream,
        framer: &mut MessageFramer,
        peer_addr: SocketAddr,
        config: &PeerConfig,
        start_height: u32,
    ) -> Result<VersionMessage> {
        let mut handshake = HandshakeState::new();
        let nonce = PingPongState::generate_nonce();
        let version = create_version_message(peer_addr, nonce, &config.user_agent, start_height);
        write_message(stream, framer, &Message::Version(version)).await?;
        handshake.mark_version_sent();

        while !handshake.is_complete() {
            let msg = match framer.decode_message()? {
                Some(msg) => msg,
                None => {
                    let n = stream.read_buf(framer.read_buffer_mut()).await?;
                    if n == 0 {
                        return Err(Error::HandshakeFailed(format!(
                            "{} closed the connection during the handshake",
                            peer_addr
                        )));
                    }
                    continue;
                }
            };
            match msg {
                Message::Version(v) => {
                    validate_version(&v, nonce)?;
                    handshake.mark_version_received(v)?;
                    write_message(stream, framer, &Message::Verack).await?;
                    handshake.mark_verack_sent();
                }
                Message::Verack => handshake.mark_verack_received(),
                Message::Reject(r) => {
                    return Err(Error::HandshakeFailed(format!(
                        "{} rejected our {}: {}",
                        peer_addr, r.message, r.reason
                    )))
                }
                other => {
                    tracing::debug!(
                        peer = %peer_addr,
                        command = other.command(),
                        "Ignoring message during handshake"
                    );
                }
            }
        }
        handshake
            .peer_version
            .ok_or_else(|| Error::Internal("handshake completed without a version".to_string()))
    }
}

async fn write_message(stream: &mut TcpStream, framer: &MessageFramer, msg: &Message) -> Result<()> {
    let encoded = framer.frame_message(msg)?;
    stream.write_all(&encoded).await.map_err(Error::IOError)
}

/// What a pong answers.
enum PongWaiter {
    Broadcast {
        txid: TxHash,
        reply: oneshot::Sender<Result<()>>,
    },
    Ping(oneshot::Sender<Result<()>>),
}

/// A `merkleblock` waiting for its matched transactions.
struct PendingBlock {
    block: FilteredBlock,
    missing: HashSet<TxHash>,
}

/// Peer connection actor.
///
/// Owns the stream. Ends when the peer fails, on a disconnect command, or once every handle is
/// dropped.
struct PeerActor {
    peer_addr: SocketAddr,
    config: PeerConfig,
    stream: TcpStream,
    framer: MessageFramer,
    inbox: mpsc::Receiver<PeerCommand>,
    events: mpsc::UnboundedSender<PeerEvent>,
    ping_pong: PingPongState,
    waiters: HashMap<u64, PongWaiter>,
    pending_block: Option<PendingBlock>,
}

impl PeerActor {
    async fn run(mut self) {
        let reason = match self.message_loop().await {
            Ok(()) => {
                tracing::info!(peer = %self.peer_addr, "Disconnected");
                "disconnected by request".to_string()
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "Connection failed");
                e.to_string()
            }
        };
        self.flush_pending_block();
        for (_, waiter) in self.waiters.drain() {
            let reply = match waiter {
                PongWaiter::Broadcast { reply, .. } => reply,
                PongWaiter::Ping(reply) => reply,
            };
            let _ = reply.send(Err(Error::Disconnected(reason.clone())));
        }
        let _ = self.events.send(PeerEvent::Disconnected(reason));
    }

    async fn message_loop(&mut self) -> Result<()> {
        let mut ping_interval = interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        let mut timeout_check = interval(self.config.ping_timeout.min(Duration::from_secs(1)));

        loop {
            tokio::select! {
                cmd = self.inbox.recv() => {
                    match cmd {
                        Some(PeerCommand::Send(msg)) => self.send(&msg).await?,
                        Some(PeerCommand::Broadcast { tx, reply }) => {
                            let txid = tx.hash();
                            tracing::info!(peer = %self.peer_addr, txid = %txid, "Broadcasting transaction");
                            self.send(&Message::Tx(tx)).await?;
                            let nonce = self.send_ping().await?;
                            self.waiters.insert(nonce, PongWaiter::Broadcast { txid, reply });
                        }
                        Some(PeerCommand::Ping { reply }) => {
                            let nonce = self.send_ping().await?;
                            self.waiters.insert(nonce, PongWaiter::Ping(reply));
                        }
                        Some(PeerCommand::Disconnect) | None => return Ok(()),
                    }
                }

                _ = ping_interval.tick() => {
                    self.send_ping().await?;
                }

                _ = timeout_check.tick() => {
                    let timeouts = self.ping_pong.check_timeouts();
                    if !timeouts.is_empty() {
                        return Err(Error::PingTimeout);
                    }
                }

                read = self.stream.read_buf(self.framer.read_buffer_mut()) => {
                    match read {
                        Ok(0) => {
                            return Err(Error::Disconnected(format!(
                                "{} closed the connection",
                                self.peer_addr
                            )))
                        }
                        Ok(_) => {
                            while let Some(msg) = self.framer.decode_message()? {
                                self.handle_message(msg).await?;
                            }
                        }
                        Err(e) => return Err(Error::Disconnected(e.to_string())),
                    }
                }
            }
        }
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        write_message(&mut self.stream, &self.framer, msg)
            .await
            .map_err(|e| Error::Disconnected(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<u64> {
        let nonce = PingPongState::generate_nonce();
        self.send(&Message::Ping(nonce)).await?;
        self.ping_pong.record_ping(nonce);
        Ok(nonce)
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    /// Handle a message from the peer.
    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        // the transactions of a merkleblock follow it directly, anything else ends the block
        if !matches!(msg, Message::Tx(_)) {
            self.flush_pending_block();
        }

        match msg {
            Message::Ping(nonce) => self.send(&Message::Pong(nonce)).await?,
            Message::Pong(nonce) => {
                if let Some(rtt) = self.ping_pong.validate_pong(nonce) {
                    tracing::trace!(peer = %self.peer_addr, rtt_ms = rtt.as_millis() as u64, "Received pong");
                }
                match self.waiters.remove(&nonce) {
                    Some(PongWaiter::Broadcast { txid, reply }) => {
                        tracing::info!(peer = %self.peer_addr, txid = %txid, "Broadcast accepted");
                        let _ = reply.send(Ok(()));
                    }
                    Some(PongWaiter::Ping(reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    None => {}
                }
            }
            Message::Reject(reject) => {
                tracing::warn!(
                    peer = %self.peer_addr,
                    message = %reject.message,
                    code = reject.code,
                    reason = %reject.reason,
                    "Peer rejected a message"
                );
                if let Some(hash) = reject.rejected_hash() {
                    let nonce = self.waiters.iter().find_map(|(nonce, w)| match w {
                        PongWaiter::Broadcast { txid, .. } if *txid == hash => Some(*nonce),
                        _ => None,
                    });
                    if let Some(PongWaiter::Broadcast { txid, reply }) =
                        nonce.and_then(|n| self.waiters.remove(&n))
                    {
                        let _ = reply.send(Err(Error::BroadcastRejected {
                            txid: txid.to_string(),
                            reason: reject.reason,
                        }));
                    }
                }
            }
            Message::Headers(headers) => self.emit(PeerEvent::Headers(headers)),
            Message::MerkleBlock(mb) => {
                let matches = mb
                    .tree
                    .extract_matches()
                    .map_err(|e| Error::ProtocolViolation(e.to_string()))?;
                if matches.merkle_root != mb.header.merkle_root {
                    return Err(Error::ProtocolViolation(format!(
                        "merkleblock {} does not match its merkle root",
                        mb.header.hash()
                    )));
                }
                let block = FilteredBlock {
                    header: mb.header,
                    txids: matches.matches,
                    txs: Vec::new(),
                };
                if block.txids.is_empty() {
                    self.emit(PeerEvent::Block(block));
                } else {
                    let missing = block.txids.iter().copied().collect();
                    self.pending_block = Some(PendingBlock { block, missing });
                }
            }
            Message::Tx(tx) => {
                let txid = tx.hash();
                let matched = self
                    .pending_block
                    .as_mut()
                    .is_some_and(|p| p.missing.remove(&txid));
                if !matched {
                    self.flush_pending_block();
                    self.emit(PeerEvent::Transaction(tx));
                    return Ok(());
                }
                let complete = match self.pending_block.as_mut() {
                    Some(pending) => {
                        pending.block.txs.push(tx);
                        pending.missing.is_empty()
                    }
                    None => false,
                };
                if complete {
                    self.flush_pending_block();
                }
            }
            Message::Block(block) => {
                if !block.check_merkle_root() {
                    return Err(Error::ProtocolViolation(format!(
                        "block {} does not match its merkle root",
                        block.header.hash()
                    )));
                }
                let txids = block.txs.iter().map(|t| t.hash()).collect();
                self.emit(PeerEvent::Block(FilteredBlock {
                    header: block.header,
                    txids,
                    txs: block.txs,
                }));
            }
            Message::Inv(items) => self.emit(PeerEvent::Inventory(items)),
            Message::NotFound(items) => self.emit(PeerEvent::NotFound(items)),
            Message::Version(_) | Message::Verack => {
                return Err(Error::ProtocolViolation(
                    "handshake message after the handshake".to_string(),
                ))
            }
            other => {
                tracing::trace!(peer = %self.peer_addr, command = other.command(), "Ignoring message");
            }
        }
        Ok(())
    }

    fn flush_pending_block(&mut self) {
        if let Some(pending) = self.pending_block.take() {
            if !pending.missing.is_empty() {
                tracing::debug!(
                    peer = %self.peer_addr,
                    block = %pending.block.hash(),
                    missing = pending.missing.len(),
                    "Matched transactions not sent with merkleblock"
                );
            }
            self.emit(PeerEvent::Block(pending.block));
        }
    }
}

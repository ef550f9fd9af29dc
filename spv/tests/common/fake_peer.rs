//! An in-process peer serving a scripted chain over a real TCP socket.
//!
//! Every block matches the wallet's filter completely: the merkleblock marks all transactions
//! as matched and each one follows it. The wallet has to discard what is not its own.

use bytes::Bytes;
use spvwallet::bitcoin::merkle::calculate_merkle_root;
use spvwallet::bitcoin::{
    Address, BlockHash, BlockHeader, Hash, Hash160, Network, Outpoint, PartialMerkleTree, Script,
    Tx, TxInput, TxOutput,
};
use spvwallet::p2p::{
    GetHeadersMessage, InvType, Inventory, MerkleBlockMessage, Message, MessageFramer,
    NetworkAddress, RejectMessage, Services, VersionMessage, MAX_HEADERS_RESULTS,
    PROTOCOL_VERSION,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How the peer answers transactions sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Accept into the mempool and answer the following ping.
    Accept,
    /// Send a `reject` naming the transaction.
    Reject,
    /// Say nothing, not even a pong.
    Ignore,
}

struct PeerState {
    network: Network,
    services: Services,
    /// Index 0 is the genesis block, which has no transactions here.
    blocks: Vec<(BlockHeader, Vec<Tx>)>,
    mempool: Vec<Tx>,
    received: Vec<Tx>,
    broadcast_mode: BroadcastMode,
    answer_headers: bool,
    reverse_blocks: bool,
    filter_loads: usize,
    connections: usize,
    salt: u32,
}

impl PeerState {
    fn tip(&self) -> &BlockHeader {
        &self.blocks[self.blocks.len() - 1].0
    }

    fn next_block(&mut self, prev: BlockHeader, txs: Vec<Tx>) -> (BlockHeader, Vec<Tx>) {
        self.salt += 1;
        let mut coinbase_script = self.salt.to_le_bytes().to_vec();
        coinbase_script.extend_from_slice(b"fake peer");
        let burn = Address::new(self.network, Hash160::ZERO);
        let coinbase = Tx {
            version: 1,
            inputs: vec![TxInput::new(Outpoint::NULL, Script::new(coinbase_script))],
            outputs: vec![TxOutput::new(5_000_000_000, burn.script_pubkey())],
            lock_time: 0,
        };
        let mut all = vec![coinbase];
        all.extend(txs);
        let txids: Vec<Hash> = all.iter().map(|t| t.hash()).collect();
        let header = BlockHeader {
            version: 0x2000_0000,
            prev_hash: prev.hash(),
            merkle_root: calculate_merkle_root(&txids).unwrap(),
            timestamp: prev.timestamp + 600,
            bits: prev.bits,
            nonce: self.salt,
        };
        (header, all)
    }

    fn find(&self, hash: &BlockHash) -> Option<&(BlockHeader, Vec<Tx>)> {
        self.blocks.iter().find(|(h, _)| h.hash() == *hash)
    }

    fn respond(&mut self, msg: Message) -> Vec<Message> {
        match msg {
            Message::Version(_) => {
                let anywhere =
                    NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, Services::NONE);
                vec![
                    Message::Version(VersionMessage {
                        version: PROTOCOL_VERSION,
                        services: self.services,
                        timestamp: 0,
                        recv_addr: anywhere.clone(),
                        from_addr: anywhere,
                        nonce: rand::random(),
                        user_agent: "/fakepeer:0.1.0/".to_string(),
                        start_height: (self.blocks.len() - 1) as u32,
                        relay: true,
                    }),
                    Message::Verack,
                ]
            }
            Message::Ping(nonce) => match self.broadcast_mode {
                BroadcastMode::Ignore => vec![],
                _ => vec![Message::Pong(nonce)],
            },
            Message::FilterLoad(_) => {
                self.filter_loads += 1;
                vec![]
            }
            Message::GetHeaders(GetHeadersMessage { locator_hashes, .. }) => {
                if !self.answer_headers {
                    return vec![];
                }
                let start = locator_hashes
                    .iter()
                    .find_map(|l| self.blocks.iter().position(|(h, _)| h.hash() == *l))
                    .map_or(1, |i| i + 1);
                let headers = self
                    .blocks
                    .iter()
                    .skip(start)
                    .take(MAX_HEADERS_RESULTS)
                    .map(|(h, _)| h.clone())
                    .collect();
                vec![Message::Headers(headers)]
            }
            Message::GetData(mut items) => {
                if self.reverse_blocks {
                    items.reverse();
                }
                let mut replies = Vec::new();
                let mut missing = Vec::new();
                for item in items {
                    match item.inv_type {
                        InvType::FilteredBlock => match self.find(&item.hash) {
                            Some((header, txs)) => {
                                let txids: Vec<Hash> = txs.iter().map(|t| t.hash()).collect();
                                let matched = vec![true; txids.len()];
                                replies.push(Message::MerkleBlock(MerkleBlockMessage {
                                    header: header.clone(),
                                    tree: PartialMerkleTree::from_txids(&txids, &matched)
                                        .unwrap(),
                                }));
                                replies.extend(txs.iter().cloned().map(Message::Tx));
                            }
                            None => missing.push(item),
                        },
                        InvType::Tx => {
                            match self.mempool.iter().find(|t| t.hash() == item.hash) {
                                Some(tx) => replies.push(Message::Tx(tx.clone())),
                                None => missing.push(item),
                            }
                        }
                        _ => missing.push(item),
                    }
                }
                if !missing.is_empty() {
                    replies.push(Message::NotFound(missing));
                }
                replies
            }
            Message::Tx(tx) => {
                self.received.push(tx.clone());
                match self.broadcast_mode {
                    BroadcastMode::Accept => {
                        self.mempool.push(tx);
                        vec![]
                    }
                    BroadcastMode::Reject => vec![Message::Reject(RejectMessage {
                        message: "tx".to_string(),
                        code: RejectMessage::REJECT_INVALID,
                        reason: "bad-txns-inputs-missingorspent".to_string(),
                        data: Some(Bytes::copy_from_slice(&tx.hash().raw)),
                    })],
                    BroadcastMode::Ignore => vec![],
                }
            }
            Message::Mempool if !self.mempool.is_empty() => vec![Message::Inv(
                self.mempool
                    .iter()
                    .map(|t| Inventory::new(InvType::Tx, t.hash()))
                    .collect(),
            )],
            _ => vec![],
        }
    }
}

/// A listening fake peer. Stops when dropped.
pub struct FakePeer {
    addr: SocketAddr,
    state: Arc<Mutex<PeerState>>,
    announce: broadcast::Sender<Message>,
    server: JoinHandle<()>,
}

impl FakePeer {
    /// A bloom serving peer on `network` holding only the genesis block.
    pub async fn start(network: Network) -> FakePeer {
        FakePeer::start_with(network, Services(Services::NETWORK.0 | Services::BLOOM.0)).await
    }

    pub async fn start_with(network: Network, services: Services) -> FakePeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(PeerState {
            network,
            services,
            blocks: vec![(BlockHeader::genesis(network), Vec::new())],
            mempool: Vec::new(),
            received: Vec::new(),
            broadcast_mode: BroadcastMode::Accept,
            answer_headers: true,
            reverse_blocks: false,
            filter_loads: 0,
            connections: 0,
            salt: 0,
        }));
        let (announce, _) = broadcast::channel(64);
        let server = {
            let state = state.clone();
            let announce = announce.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    state.lock().unwrap().connections += 1;
                    let state = state.clone();
                    let announcements = announce.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = serve(socket, network, state, announcements).await {
                            tracing::debug!(error = %e, "Fake peer connection ended");
                        }
                    });
                }
            })
        };
        FakePeer {
            addr,
            state,
            announce,
            server,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn height(&self) -> u32 {
        (self.state.lock().unwrap().blocks.len() - 1) as u32
    }

    pub fn header_at(&self, height: u32) -> BlockHeader {
        self.state.lock().unwrap().blocks[height as usize].0.clone()
    }

    /// Append a block with `txs` after a coinbase and announce its header.
    pub fn mine(&self, txs: Vec<Tx>) -> BlockHeader {
        let header = {
            let mut state = self.state.lock().unwrap();
            let prev = state.tip().clone();
            let mined: Vec<Hash> = txs.iter().map(|t| t.hash()).collect();
            state.mempool.retain(|t| !mined.contains(&t.hash()));
            let block = state.next_block(prev, txs);
            let header = block.0.clone();
            state.blocks.push(block);
            header
        };
        let _ = self.announce.send(Message::Headers(vec![header.clone()]));
        header
    }

    /// Append blocks without announcing them.
    pub fn mine_quietly(&self, blocks: Vec<Vec<Tx>>) {
        let mut state = self.state.lock().unwrap();
        for txs in blocks {
            let prev = state.tip().clone();
            let block = state.next_block(prev, txs);
            state.blocks.push(block);
        }
    }

    /// Replace every block above `fork_height` with `blocks` and announce the new branch.
    pub fn reorg(&self, fork_height: u32, blocks: Vec<Vec<Tx>>) {
        let headers = {
            let mut state = self.state.lock().unwrap();
            state.blocks.truncate(fork_height as usize + 1);
            let mut headers = Vec::new();
            for txs in blocks {
                let prev = state.tip().clone();
                let block = state.next_block(prev, txs);
                headers.push(block.0.clone());
                state.blocks.push(block);
            }
            headers
        };
        let _ = self.announce.send(Message::Headers(headers));
    }

    /// Put `tx` in the mempool and announce it.
    pub fn relay(&self, tx: Tx) {
        let txid = tx.hash();
        self.state.lock().unwrap().mempool.push(tx);
        let _ = self
            .announce
            .send(Message::Inv(vec![Inventory::new(InvType::Tx, txid)]));
    }

    /// Transactions the wallet sent us.
    pub fn received(&self) -> Vec<Tx> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn set_broadcast_mode(&self, mode: BroadcastMode) {
        self.state.lock().unwrap().broadcast_mode = mode;
    }

    pub fn set_answer_headers(&self, answer: bool) {
        self.state.lock().unwrap().answer_headers = answer;
    }

    /// Serve the blocks of each `getdata` highest first.
    pub fn set_reverse_blocks(&self, reverse: bool) {
        self.state.lock().unwrap().reverse_blocks = reverse;
    }

    pub fn filter_loads(&self) -> usize {
        self.state.lock().unwrap().filter_loads
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    network: Network,
    state: Arc<Mutex<PeerState>>,
    mut announcements: broadcast::Receiver<Message>,
) -> spvwallet::Result<()> {
    let mut framer = MessageFramer::new(network.magic());
    loop {
        let replies = tokio::select! {
            read = socket.read_buf(framer.read_buffer_mut()) => {
                if read? == 0 {
                    return Ok(());
                }
                let mut replies = Vec::new();
                while let Some(msg) = framer.decode_message()? {
                    replies.extend(state.lock().unwrap().respond(msg));
                }
                replies
            }
            announced = announcements.recv() => match announced {
                Ok(msg) => vec![msg],
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        };
        for reply in replies {
            socket.write_all(&framer.frame_message(&reply)?).await?;
        }
    }
}

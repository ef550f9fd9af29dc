use crate::bitcoin::{
    var_str_decode, var_str_encode, varint_decode_len, varint_encode, Block, BlockHash,
    BlockHeader, BloomFilter, Encodable, Hash, PartialMerkleTree, Tx, TxHash,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv6Addr};

/// Largest payload we read, 32 MiB.
pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 70016;

/// Lowest protocol version that supports BIP37 filtering.
pub const MIN_BLOOM_VERSION: u32 = 70011;

/// Maximum number of headers in a `headers` message.
pub const MAX_HEADERS_RESULTS: usize = 2000;

/// Maximum number of entries in an inventory vector.
pub const MAX_INV_SIZE: usize = 50_000;

/// The service bits a node advertises in its `version` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Services(pub u64);

impl Services {
    pub const NONE: Services = Services(0);
    /// Serves the full block chain.
    pub const NETWORK: Services = Services(1);
    /// Serves BIP37 filtered blocks.
    pub const BLOOM: Services = Services(4);

    /// True if every bit of `other` is set.
    pub fn contains(&self, other: Services) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A peer address as carried in `version`: services, IPv6 (or IPv4-mapped) address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub services: Services,
    pub addr: IpAddr,
    pub port: u16,
}

impl NetworkAddress {
    pub const SIZE: usize = 26;

    pub fn new(addr: IpAddr, port: u16, services: Services) -> NetworkAddress {
        NetworkAddress {
            services,
            addr,
            port,
        }
    }

    pub fn encode(&self, buf: &mut dyn BufMut) {
        let ip = match self.addr {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf.put_u64_le(self.services.0);
        buf.put_slice(&ip.octets());
        // big-endian, unlike every other integer on the wire
        buf.put_u16(self.port);
    }

    pub fn decode(buf: &mut dyn Buf) -> Result<Self> {
        let services = Services(buf.try_get_u64_le()?);
        let mut octets = [0u8; 16];
        buf.try_copy_to_slice(&mut octets)?;
        let v6 = Ipv6Addr::from(octets);
        let addr = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(NetworkAddress {
            services,
            addr,
            port: buf.try_get_u16()?,
        })
    }
}

/// The 24 byte envelope in front of every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    /// ASCII, NUL padded.
    pub command: [u8; 12],
    pub payload_size: u32,
    pub checksum: u32,
}

impl MessageHeader {
    pub const SIZE: usize = 24;

    /// Commands longer than 12 bytes are truncated.
    pub fn new(magic: u32, command: &str, payload: &[u8]) -> Self {
        let mut padded = [0u8; 12];
        for (slot, byte) in padded.iter_mut().zip(command.bytes()) {
            *slot = byte;
        }
        MessageHeader {
            magic,
            command: padded,
            payload_size: payload.len() as u32,
            checksum: payload_checksum(payload),
        }
    }

    pub fn command_string(&self) -> String {
        let name = self.command.split(|b| *b == 0).next().unwrap_or(&[]);
        String::from_utf8_lossy(name).into_owned()
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        payload_checksum(payload) == self.checksum
    }

    pub fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u32_le(self.magic);
        buf.put_slice(&self.command);
        buf.put_u32_le(self.payload_size);
        buf.put_u32_le(self.checksum);
    }

    /// Fails on a short buffer or a payload size above [MAX_PAYLOAD_SIZE].
    pub fn decode(buf: &mut dyn Buf) -> Result<Self> {
        let magic = buf.try_get_u32_le()?;
        let mut command = [0u8; 12];
        buf.try_copy_to_slice(&mut command)?;
        let header = MessageHeader {
            magic,
            command,
            payload_size: buf.try_get_u32_le()?,
            checksum: buf.try_get_u32_le()?,
        };
        if header.payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::BadData(format!(
                "{} byte payload announced for {}",
                header.payload_size,
                header.command_string()
            )));
        }
        Ok(header)
    }
}

fn payload_checksum(payload: &[u8]) -> u32 {
    let hash = Hash::sha256d(payload);
    u32::from_le_bytes([hash.raw[0], hash.raw[1], hash.raw[2], hash.raw[3]])
}

/// The messages an SPV client exchanges with its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Ping(u64),
    Pong(u64),
    Reject(RejectMessage),
    SendHeaders,
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    NotFound(Vec<Inventory>),
    GetHeaders(GetHeadersMessage),
    Headers(Vec<BlockHeader>),
    Block(Block),
    MerkleBlock(MerkleBlockMessage),
    Tx(Tx),
    Mempool,
    FilterLoad(BloomFilter),
    /// Anything else the peer sends, `addr` and `feefilter` included. Kept raw and ignored.
    Unknown { command: String, payload: Bytes },
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Reject(_) => "reject",
            Message::SendHeaders => "sendheaders",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::Block(_) => "block",
            Message::MerkleBlock(_) => "merkleblock",
            Message::Tx(_) => "tx",
            Message::Mempool => "mempool",
            Message::FilterLoad(_) => "filterload",
            Message::Unknown { command, .. } => command,
        }
    }

    /// Append the payload, without the header, to `buf`.
    pub fn encode_payload(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Message::Version(msg) => msg.encode(buf),
            Message::Verack | Message::SendHeaders | Message::Mempool => Ok(()),
            Message::Ping(nonce) | Message::Pong(nonce) => {
                buf.put_u64_le(*nonce);
                Ok(())
            }
            Message::Reject(msg) => msg.encode(buf),
            Message::Inv(items) | Message::GetData(items) | Message::NotFound(items) => {
                encode_inventory_vector(items, buf)
            }
            Message::GetHeaders(msg) => msg.encode(buf),
            Message::Headers(headers) => {
                varint_encode(buf, headers.len() as u64)?;
                for header in headers {
                    header.to_binary(buf)?;
                    // tx count, always 0 in a headers message
                    buf.put_u8(0);
                }
                Ok(())
            }
            Message::Block(block) => block.to_binary(buf),
            Message::MerkleBlock(msg) => {
                msg.header.to_binary(buf)?;
                msg.tree.to_binary(buf)
            }
            Message::Tx(tx) => tx.to_binary(buf),
            Message::FilterLoad(filter) => filter.to_binary(buf),
            Message::Unknown { payload, .. } => {
                buf.put_slice(payload);
                Ok(())
            }
        }
    }

    /// Decode a message payload given its command.
    pub fn decode(command: &str, payload: &[u8]) -> Result<Message> {
        let mut buf = payload;
        let msg = match command {
            "version" => Message::Version(VersionMessage::decode(&mut buf)?),
            "verack" => Message::Verack,
            "ping" => Message::Ping(buf.try_get_u64_le()?),
            "pong" => Message::Pong(buf.try_get_u64_le()?),
            "reject" => Message::Reject(RejectMessage::decode(&mut buf)?),
            "sendheaders" => Message::SendHeaders,
            "inv" => Message::Inv(decode_inventory_vector(&mut buf)?),
            "getdata" => Message::GetData(decode_inventory_vector(&mut buf)?),
            "notfound" => Message::NotFound(decode_inventory_vector(&mut buf)?),
            "getheaders" => Message::GetHeaders(GetHeadersMessage::decode(&mut buf)?),
            "headers" => {
                let n = varint_decode_len(&mut buf, BlockHeader::SIZE + 1)?;
                if n > MAX_HEADERS_RESULTS {
                    return Err(Error::BadData(format!("headers with {} entries", n)));
                }
                let mut headers = Vec::with_capacity(n);
                for _ in 0..n {
                    headers.push(BlockHeader::from_binary(&mut buf)?);
                    let tx_count = buf.try_get_u8()?;
                    if tx_count != 0 {
                        return Err(Error::BadData(
                            "headers message carries transactions".to_string(),
                        ));
                    }
                }
                Message::Headers(headers)
            }
            "block" => Message::Block(Block::from_binary(&mut buf)?),
            "merkleblock" => Message::MerkleBlock(MerkleBlockMessage {
                header: BlockHeader::from_binary(&mut buf)?,
                tree: PartialMerkleTree::from_binary(&mut buf)?,
            }),
            "tx" => Message::Tx(Tx::from_binary(&mut buf)?),
            "mempool" => Message::Mempool,
            "filterload" => Message::FilterLoad(BloomFilter::from_binary(&mut buf)?),
            _ => Message::Unknown {
                command: command.to_string(),
                payload: Bytes::copy_from_slice(payload),
            },
        };
        Ok(msg)
    }
}

/// The first message each side sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: Services,
    pub timestamp: i64,
    pub recv_addr: NetworkAddress,
    pub from_addr: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
    pub relay: bool,
}

impl VersionMessage {
    /// Longest user agent we accept.
    pub const MAX_USER_AGENT_LENGTH: usize = 256;

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<()> {
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.services.0);
        buf.put_i64_le(self.timestamp);
        self.recv_addr.encode(buf);
        self.from_addr.encode(buf);
        buf.put_u64_le(self.nonce);
        var_str_encode(buf, &self.user_agent)?;
        buf.put_u32_le(self.start_height);
        buf.put_u8(if self.relay { 1 } else { 0 });
        Ok(())
    }

    pub fn decode(buf: &mut dyn Buf) -> Result<Self> {
        let version = buf.try_get_u32_le()?;
        let services = Services(buf.try_get_u64_le()?);
        let timestamp = buf.try_get_i64_le()?;
        let recv_addr = NetworkAddress::decode(buf)?;
        let from_addr = NetworkAddress::decode(buf)?;
        let nonce = buf.try_get_u64_le()?;
        let user_agent = var_str_decode(buf)?;
        if user_agent.len() > Self::MAX_USER_AGENT_LENGTH {
            return Err(Error::BadData("user agent too long".to_string()));
        }
        let start_height = buf.try_get_u32_le()?;
        // the relay flag is optional, BIP37 says a missing flag means true
        let relay = if buf.has_remaining() {
            buf.get_u8() != 0
        } else {
            true
        };
        Ok(VersionMessage {
            version,
            services,
            timestamp,
            recv_addr,
            from_addr,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// What an inventory entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Error,
    Tx,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTx,
    WitnessBlock,
    Unknown(u32),
}

impl InvType {
    const WITNESS_FLAG: u32 = 1 << 30;

    pub fn as_u32(&self) -> u32 {
        match self {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::FilteredBlock => 3,
            InvType::CompactBlock => 4,
            InvType::WitnessTx => Self::WITNESS_FLAG | 1,
            InvType::WitnessBlock => Self::WITNESS_FLAG | 2,
            InvType::Unknown(v) => *v,
        }
    }

    pub fn from_u32(v: u32) -> InvType {
        match v {
            0 => InvType::Error,
            1 => InvType::Tx,
            2 => InvType::Block,
            3 => InvType::FilteredBlock,
            4 => InvType::CompactBlock,
            v if v == Self::WITNESS_FLAG | 1 => InvType::WitnessTx,
            v if v == Self::WITNESS_FLAG | 2 => InvType::WitnessBlock,
            v => InvType::Unknown(v),
        }
    }
}

/// One entry of an `inv`, `getdata` or `notfound` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Inventory {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl Inventory {
    pub const SIZE: usize = 36;

    pub fn new(inv_type: InvType, hash: Hash) -> Inventory {
        Inventory { inv_type, hash }
    }
}

/// GetHeaders message: a block locator plus the hash to stop at (zero for as many as allowed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    pub locator_hashes: Vec<BlockHash>,
    pub hash_stop: BlockHash,
}

impl GetHeadersMessage {
    /// Maximum number of locator hashes a peer accepts.
    pub const MAX_LOCATOR_SZ: usize = 101;

    pub fn new(locator_hashes: Vec<BlockHash>) -> GetHeadersMessage {
        GetHeadersMessage {
            version: PROTOCOL_VERSION,
            locator_hashes,
            hash_stop: Hash::ZERO,
        }
    }

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<()> {
        buf.put_u32_le(self.version);
        varint_encode(buf, self.locator_hashes.len() as u64)?;
        for hash in &self.locator_hashes {
            hash.to_binary(buf)?;
        }
        self.hash_stop.to_binary(buf)
    }

    pub fn decode(buf: &mut dyn Buf) -> Result<Self> {
        let version = buf.try_get_u32_le()?;
        let n = varint_decode_len(buf, Hash::SIZE as usize)?;
        if n > Self::MAX_LOCATOR_SZ {
            return Err(Error::BadData(format!("locator with {} hashes", n)));
        }
        let mut locator_hashes = Vec::with_capacity(n);
        for _ in 0..n {
            locator_hashes.push(Hash::from_binary(buf)?);
        }
        Ok(GetHeadersMessage {
            version,
            locator_hashes,
            hash_stop: Hash::from_binary(buf)?,
        })
    }
}

/// A BIP37 `merkleblock`: a header and the partial merkle tree proving the matched transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlockMessage {
    pub header: BlockHeader,
    pub tree: PartialMerkleTree,
}

/// BIP61 `reject`. Peers send it for transactions they refuse to relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectMessage {
    pub message: String,
    pub code: u8,
    pub reason: String,
    pub data: Option<Bytes>,
}

impl RejectMessage {
    pub const REJECT_INVALID: u8 = 0x10;
    pub const REJECT_INSUFFICIENTFEE: u8 = 0x42;

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<()> {
        var_str_encode(buf, &self.message)?;
        buf.put_u8(self.code);
        var_str_encode(buf, &self.reason)?;
        if let Some(data) = &self.data {
            buf.put_slice(data);
        }
        Ok(())
    }

    pub fn decode(buf: &mut dyn Buf) -> Result<Self> {
        let message = var_str_decode(buf)?;
        let code = buf.try_get_u8()?;
        let reason = var_str_decode(buf)?;
        let data = buf
            .has_remaining()
            .then(|| buf.copy_to_bytes(buf.remaining()));
        Ok(RejectMessage {
            message,
            code,
            reason,
            data,
        })
    }

    /// The hash of the rejected transaction or block, if the peer included it.
    pub fn rejected_hash(&self) -> Option<TxHash> {
        match &self.data {
            Some(data) if data.len() >= Hash::SIZE as usize => {
                Hash::from_slice(&data[..Hash::SIZE as usize]).ok()
            }
            _ => None,
        }
    }
}

fn encode_inventory_vector(items: &[Inventory], buf: &mut BytesMut) -> Result<()> {
    varint_encode(buf, items.len() as u64)?;
    for item in items {
        buf.put_u32_le(item.inv_type.as_u32());
        item.hash.to_binary(buf)?;
    }
    Ok(())
}

fn decode_inventory_vector(buf: &mut dyn Buf) -> Result<Vec<Inventory>> {
    let n = varint_decode_len(buf, Inventory::SIZE)?;
    if n > MAX_INV_SIZE {
        return Err(Error::BadData(format!("inventory with {} entries", n)));
    }
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        let inv_type = InvType::from_u32(buf.try_get_u32_le()?);
        items.push(Inventory::new(inv_type, Hash::from_binary(buf)?));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{FromHex, Network};
    use std::net::Ipv4Addr;

    fn roundtrip(msg: Message) -> Message {
        let mut buf = BytesMut::new();
        msg.encode_payload(&mut buf).unwrap();
        Message::decode(msg.command(), &buf).unwrap()
    }

    fn version_message() -> VersionMessage {
        VersionMessage {
            version: PROTOCOL_VERSION,
            services: Services::NETWORK,
            timestamp: 1_700_000_000,
            recv_addr: NetworkAddress::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 18333, Services::NONE),
            from_addr: NetworkAddress::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, Services::NONE),
            nonce: 0x1234567890ABCDEF,
            user_agent: "/spvwallet:0.1.0/".to_string(),
            start_height: 700000,
            relay: false,
        }
    }

    #[test]
    fn test_message_header() {
        let payload = b"test payload";
        let header = MessageHeader::new(Network::Mainnet.magic(), "version", payload);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), MessageHeader::SIZE);
        // mainnet magic on the wire
        assert_eq!(&buf[..4], &[0xf9, 0xbe, 0xb4, 0xd9]);

        let mut buf = buf.freeze();
        let decoded = MessageHeader::decode(&mut buf).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(decoded.command_string(), "version");
        assert!(decoded.verify_checksum(payload));
        assert!(!decoded.verify_checksum(b"other payload"));
    }

    #[test]
    fn test_verack_checksum() {
        // checksum of the empty payload
        let header = MessageHeader::new(Network::Mainnet.magic(), "verack", &[]);
        assert_eq!(header.checksum.to_le_bytes(), [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut header = MessageHeader::new(Network::Regtest.magic(), "block", &[]);
        header.payload_size = MAX_PAYLOAD_SIZE + 1;
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert!(MessageHeader::decode(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_network_address_port_is_big_endian() {
        let addr = NetworkAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8333, Services::NETWORK);
        let mut buf = BytesMut::new();
        addr.encode(&mut buf);
        assert_eq!(buf.len(), NetworkAddress::SIZE);
        assert_eq!(&buf[24..], &[0x20, 0x8d]);
        let decoded = NetworkAddress::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, addr);

        let v6 = NetworkAddress::new(
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
            18444,
            Services::NONE,
        );
        let mut buf = BytesMut::new();
        v6.encode(&mut buf);
        assert_eq!(NetworkAddress::decode(&mut buf.freeze()).unwrap(), v6);
    }

    #[test]
    fn test_version_roundtrip() {
        let v = version_message();
        assert_eq!(roundtrip(Message::Version(v.clone())), Message::Version(v));
    }

    #[test]
    fn test_version_without_relay_flag() {
        let v = version_message();
        let mut buf = BytesMut::new();
        v.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        let decoded = VersionMessage::decode(&mut buf.freeze()).unwrap();
        assert!(decoded.relay);
    }

    #[test]
    fn test_ping_pong_messages() {
        let mut buf = BytesMut::new();
        Message::Ping(7).encode_payload(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(roundtrip(Message::Pong(9)), Message::Pong(9));
        assert!(Message::decode("ping", &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_inventory_encoding() {
        let items = vec![
            Inventory::new(InvType::Tx, Hash::sha256d(b"tx")),
            Inventory::new(InvType::FilteredBlock, Hash::sha256d(b"block")),
            Inventory::new(InvType::WitnessTx, Hash::sha256d(b"wtx")),
        ];
        let mut buf = BytesMut::new();
        Message::GetData(items.clone()).encode_payload(&mut buf).unwrap();
        assert_eq!(buf[0], 3);
        assert_eq!(buf[1], 1);
        assert_eq!(buf[1 + 36], 3);
        assert_eq!(roundtrip(Message::Inv(items.clone())), Message::Inv(items));
    }

    #[test]
    fn test_getheaders_roundtrip() {
        let msg = GetHeadersMessage::new(vec![
            BlockHeader::genesis(Network::Testnet).hash(),
            Hash::sha256d(b"x"),
        ]);
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        // version + count + 2 hashes + stop hash
        assert_eq!(buf.len(), 4 + 1 + 64 + 32);
        assert_eq!(
            roundtrip(Message::GetHeaders(msg.clone())),
            Message::GetHeaders(msg)
        );
    }

    #[test]
    fn test_headers_roundtrip() {
        let headers = vec![
            BlockHeader::genesis(Network::Mainnet),
            BlockHeader::genesis(Network::Regtest),
        ];
        let mut buf = BytesMut::new();
        Message::Headers(headers.clone()).encode_payload(&mut buf).unwrap();
        assert_eq!(buf.len(), 1 + 2 * 81);
        assert_eq!(Message::decode("headers", &buf).unwrap(), Message::Headers(headers));
    }

    #[test]
    fn test_merkleblock_roundtrip() {
        let txids: Vec<_> = (0u8..5).map(|i| Hash::sha256d(&[i])).collect();
        let tree =
            PartialMerkleTree::from_txids(&txids, &[false, false, true, false, false]).unwrap();
        let mut header = BlockHeader::genesis(Network::Regtest);
        header.merkle_root = tree.extract_matches().unwrap().merkle_root;
        let msg = MerkleBlockMessage { header, tree };
        assert_eq!(
            roundtrip(Message::MerkleBlock(msg.clone())),
            Message::MerkleBlock(msg)
        );
    }

    #[test]
    fn test_reject_message() {
        let txid = TxHash::from_hex(
            "3abc31f8ff8bd2a4a5a81d5e1e7bd7d4e49e5e7e5c7a59bd1bd46f27d9be4e35",
        )
        .unwrap();
        let reject = RejectMessage {
            message: "tx".to_string(),
            code: RejectMessage::REJECT_INSUFFICIENTFEE,
            reason: "min relay fee not met".to_string(),
            data: Some(Bytes::copy_from_slice(&txid.raw)),
        };
        let decoded = roundtrip(Message::Reject(reject.clone()));
        assert_eq!(decoded, Message::Reject(reject.clone()));
        assert_eq!(reject.rejected_hash(), Some(txid));
    }

    #[test]
    fn test_filter_messages() {
        let filter = BloomFilter::new(10, 0.001, 5, crate::bitcoin::bloom::BLOOM_UPDATE_ALL);
        assert_eq!(
            roundtrip(Message::FilterLoad(filter.clone())),
            Message::FilterLoad(filter)
        );
        assert_eq!(roundtrip(Message::Mempool), Message::Mempool);
    }

    #[test]
    fn test_unknown_command_is_preserved() {
        let msg = Message::decode("sendcmpct", &[0, 1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(msg.command(), "sendcmpct");
        assert!(matches!(msg, Message::Unknown { ref payload, .. } if payload.len() == 9));
        let fee = Message::decode("feefilter", &1000u64.to_le_bytes()).unwrap();
        assert_eq!(fee.command(), "feefilter");
    }

    #[test]
    fn test_services_flags() {
        let s = Services(Services::NETWORK.0 | Services::BLOOM.0 | 8);
        assert!(s.contains(Services::BLOOM));
        assert!(!Services::NETWORK.contains(Services::BLOOM));
        assert!(s.contains(Services::NONE));
    }
}

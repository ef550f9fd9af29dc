use base58::FromBase58Error;
use bytes::TryGetError;
use hex::FromHexError;
use std::io;
use std::string::FromUtf8Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the wallet reports.
#[derive(Debug)]
pub enum Error {
    BadArgument(String),
    /// Bytes or text that do not decode to what was expected.
    BadData(String),
    ChecksumMismatch,
    InvalidNetworkSpecifier(String),
    /// The input ended early.
    DataTooSmall,
    Internal(String),
    FromHexError(FromHexError),
    FromBase58Error(FromBase58Error),
    Secp256k1Error(secp256k1::Error),
    IOError(io::Error),
    Utf8Error(FromUtf8Error),
    TryGet(TryGetError),

    /// The HD key could not be parsed or does not belong to the wallet's network.
    InvalidKeyMaterial(String),
    /// The address could not be parsed or does not belong to the wallet's network.
    InvalidAddress(String),
    /// The network supplied by the caller differs from the wallet's network.
    NetworkMismatch { expected: String, received: String },
    /// Amount plus fee exceeds the spendable outputs.
    InsufficientFunds { needed: u64, available: u64 },
    MalformedTransaction(String),
    /// The SQLite store failed.
    Storage(String),

    PeerUnreachable(String),
    /// The peer sent a malformed or unexpected message.
    ProtocolViolation(String),
    Disconnected(String),
    HandshakeFailed(String),
    PingTimeout,
    /// Initial sync did not finish in time.
    SyncTimeout,
    BroadcastRejected { txid: String, reason: String },
    /// Neither a pong nor a reject arrived for a broadcast.
    BroadcastTimeout(String),
    InvalidConfiguration(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadArgument(s) => write!(f, "bad argument: {}", s),
            Error::BadData(s) => write!(f, "bad data: {}", s),
            Error::ChecksumMismatch => f.write_str("checksum mismatch"),
            Error::InvalidNetworkSpecifier(s) => write!(f, "unknown network: {}", s),
            Error::DataTooSmall => f.write_str("unexpected end of data"),
            Error::Internal(s) => write!(f, "internal error: {}", s),
            Error::FromHexError(e) => write!(f, "invalid hex: {}", e),
            Error::FromBase58Error(e) => write!(f, "invalid base58: {:?}", e),
            Error::Secp256k1Error(e) => write!(f, "secp256k1: {}", e),
            Error::IOError(e) => write!(f, "io: {}", e),
            Error::Utf8Error(e) => write!(f, "invalid utf-8: {}", e),
            Error::TryGet(e) => write!(f, "unexpected end of data: {}", e),
            Error::InvalidKeyMaterial(s) => write!(f, "invalid key material: {}", s),
            Error::InvalidAddress(s) => write!(f, "invalid address: {}", s),
            Error::NetworkMismatch { expected, received } => write!(
                f,
                "This wallet is only connected to the {} network and cannot perform actions on the {} network",
                expected, received
            ),
            Error::InsufficientFunds { needed, available } => write!(
                f,
                "insufficient funds: {} satoshis needed, {} available",
                needed, available
            ),
            Error::MalformedTransaction(s) => write!(f, "malformed transaction: {}", s),
            Error::Storage(s) => write!(f, "storage: {}", s),
            Error::PeerUnreachable(s) => write!(f, "peer unreachable: {}", s),
            Error::ProtocolViolation(s) => write!(f, "protocol violation: {}", s),
            Error::Disconnected(s) => write!(f, "disconnected: {}", s),
            Error::HandshakeFailed(s) => write!(f, "handshake failed: {}", s),
            Error::PingTimeout => f.write_str("ping timeout"),
            Error::SyncTimeout => f.write_str("initial sync timed out"),
            Error::BroadcastRejected { txid, reason } => {
                write!(f, "peer rejected {}: {}", txid, reason)
            }
            Error::BroadcastTimeout(txid) => write!(f, "broadcast of {} not acknowledged", txid),
            Error::InvalidConfiguration(s) => write!(f, "invalid configuration: {}", s),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! wrap_error {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(impl From<$source> for Error {
            fn from(e: $source) -> Self {
                Error::$variant(e)
            }
        })*
    };
}

wrap_error! {
    FromHexError => FromHexError,
    FromBase58Error => FromBase58Error,
    io::Error => IOError,
    FromUtf8Error => Utf8Error,
    secp256k1::Error => Secp256k1Error,
    TryGetError => TryGet,
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl Error {
    /// Connection-layer errors are recoverable by an explicit reconnect.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable(_)
                | Error::ProtocolViolation(_)
                | Error::Disconnected(_)
                | Error::HandshakeFailed(_)
                | Error::PingTimeout
                | Error::SyncTimeout
        )
    }
}

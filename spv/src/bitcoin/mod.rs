//! The Bitcoin primitives used by the wallet: hashes, transactions, headers, scripts, keys
//! and addresses, together with their wire encodings.

mod address;
pub mod base58ck;
mod block;
pub mod bloom;
mod crypto;
mod encoding;
pub mod hash;
mod hash160;
pub mod hd;
mod header;
pub mod merkle;
mod params;
mod script;
pub mod sighash;
mod tx;
mod var_int;

pub use self::address::{Address, AddressKind};
pub use self::block::Block;
pub use self::bloom::BloomFilter;
pub use self::crypto::{PrivateKey, PublicKey};
pub use self::encoding::Encodable;
pub use self::hash::Hash;
pub use self::hash160::Hash160;
pub use self::hd::ExtendedPrivKey;
pub use self::header::{BlockHash, BlockHeader, MerkleRoot};
pub use self::merkle::PartialMerkleTree;
pub use self::params::Network;
pub use self::script::{Script, ScriptBuilder};
pub use self::tx::{Outpoint, Tx, TxHash, TxInput, TxOutput};
pub use self::var_int::{
    var_str_decode, var_str_encode, varint_decode, varint_decode_len, varint_encode, varint_size,
};
pub use hex::{FromHex, ToHex};

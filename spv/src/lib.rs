//! A simplified payment verification (SPV) Bitcoin wallet.
//!
//! The wallet connects to a single peer, registers a BIP37 bloom filter covering a window of
//! HD-derived addresses, follows the header chain and keeps a ledger of the outputs it owns.
//! It can build, sign and broadcast P2PKH payments.
//!
//! The public entry point is [wallet::Wallet].

/// Contains the Bitcoin primitives. Transactions, Block Headers, keys and addresses.
pub mod bitcoin;

/// Contains the header chain tracker.
pub mod chain;

/// Contains the Bitcoin peer-to-peer protocol and the single peer connection.
pub mod p2p;

/// Contains useful utility functions.
pub mod util;

/// Contains the wallet: address derivation, ledger, persistence and the facade.
pub mod wallet;

mod result;
pub use result::{Error, Result};

// re-export the secp256k1 crate
pub extern crate secp256k1;

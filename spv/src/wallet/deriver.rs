use crate::bitcoin::hd::HARDENED;
use crate::bitcoin::{Address, AddressKind, ExtendedPrivKey, Network, PrivateKey};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// The two BIP44 address chains of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Addresses handed out to receive payments.
    Receive,
    /// Addresses our own transactions send change to.
    Change,
}

impl Chain {
    /// The BIP44 path element of the chain.
    pub fn index(&self) -> u32 {
        match self {
            Chain::Receive => 0,
            Chain::Change => 1,
        }
    }

    pub fn from_index(index: u32) -> Result<Chain> {
        match index {
            0 => Ok(Chain::Receive),
            1 => Ok(Chain::Change),
            _ => Err(Error::BadData(format!("unknown address chain {}", index))),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Chain::Receive => "receive",
            Chain::Change => "change",
        })
    }
}

/// An address derived from the wallet key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    pub chain: Chain,
    pub index: u32,
    pub address: Address,
}

/// Derives the wallet's BIP44 addresses and keys.
///
/// Addresses live at `m/44'/coin'/0'/chain/index` for both address kinds. Derivation is a pure
/// function of the key, kind, chain and index, so addresses found on a previous run are found
/// again after a restart.
pub struct KeyDeriver {
    network: Network,
    kind: AddressKind,
    receive: ExtendedPrivKey,
    change: ExtendedPrivKey,
}

impl KeyDeriver {
    /// Create a deriver for `network` from a master key, or from an account key (depth 3).
    ///
    /// Fails with `InvalidKeyMaterial` if the key was serialized for another network.
    pub fn new(key: &ExtendedPrivKey, network: Network) -> Result<KeyDeriver> {
        if !key.is_for(network) {
            return Err(Error::InvalidKeyMaterial(format!(
                "key is not a {} extended private key",
                network
            )));
        }
        let account = match key.depth {
            0 => key.derive_path(&[44 + HARDENED, network.coin_type() + HARDENED, HARDENED])?,
            3 => key.clone(),
            d => {
                return Err(Error::InvalidKeyMaterial(format!(
                    "expected a master or account key, got depth {}",
                    d
                )))
            }
        };
        Ok(KeyDeriver {
            network,
            kind: AddressKind::P2pkh,
            receive: account.ckd_priv(Chain::Receive.index())?,
            change: account.ckd_priv(Chain::Change.index())?,
        })
    }

    /// Parse a serialized extended private key and create a deriver from it.
    pub fn from_key_str(key: &str, network: Network) -> Result<KeyDeriver> {
        KeyDeriver::new(&ExtendedPrivKey::from_str(key)?, network)
    }

    /// Derive addresses of `kind` instead of legacy P2PKH addresses.
    pub fn with_kind(mut self, kind: AddressKind) -> KeyDeriver {
        self.kind = kind;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    fn chain_key(&self, chain: Chain) -> &ExtendedPrivKey {
        match chain {
            Chain::Receive => &self.receive,
            Chain::Change => &self.change,
        }
    }

    /// The signing key of an address.
    pub fn private_key(&self, chain: Chain, index: u32) -> Result<PrivateKey> {
        if index >= HARDENED {
            return Err(Error::BadArgument(format!("address index {} out of range", index)));
        }
        Ok(self.chain_key(chain).ckd_priv(index)?.private_key)
    }

    pub fn derive(&self, chain: Chain, index: u32) -> Result<DerivedAddress> {
        let key = self.private_key(chain, index)?;
        Ok(DerivedAddress {
            chain,
            index,
            address: Address::from_public_key(self.network, self.kind, &key.public_key()),
        })
    }

    pub fn derive_range(&self, chain: Chain, range: Range<u32>) -> Result<Vec<DerivedAddress>> {
        range.map(|i| self.derive(chain, i)).collect()
    }
}

//! BIP32 hierarchical deterministic private keys.
//!
//! Only private derivation is needed: the wallet holds the extended private key and derives
//! both the signing keys and the addresses it watches from it.

use crate::bitcoin::{base58ck, Hash160, Network, PrivateKey, PublicKey};
use crate::{Error, Result};
use ring::hmac;
use secp256k1::Scalar;
use std::fmt;
use std::str::FromStr;

/// Child numbers at or above this value select hardened derivation.
pub const HARDENED: u32 = 0x8000_0000;

const SERIALIZED_SIZE: usize = 78;

/// A BIP32 extended private key (`xprv...` on mainnet, `tprv...` on the test networks).
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedPrivKey {
    /// The version bytes, selecting the network family.
    pub version: [u8; 4],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
    pub chain_code: [u8; 32],
    pub private_key: PrivateKey,
}

impl ExtendedPrivKey {
    /// Derive the master key from a seed.
    pub fn new_master(network: Network, seed: &[u8]) -> Result<ExtendedPrivKey> {
        let key = hmac::Key::new(hmac::HMAC_SHA512, b"Bitcoin seed");
        let i = hmac::sign(&key, seed);
        let (il, ir) = i.as_ref().split_at(32);
        let private_key = PrivateKey::from_slice(il)
            .map_err(|_| Error::InvalidKeyMaterial("seed produces an invalid key".to_string()))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);
        Ok(ExtendedPrivKey {
            version: network.xprv_version(),
            depth: 0,
            parent_fingerprint: [0; 4],
            child_number: 0,
            chain_code,
            private_key,
        })
    }

    /// True when the key was serialized for `network`.
    pub fn is_for(&self, network: Network) -> bool {
        self.version == network.xprv_version()
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// The first four bytes of the hash160 of the public key.
    pub fn fingerprint(&self) -> [u8; 4] {
        let h: Hash160 = self.public_key().pubkey_hash();
        [h.hash[0], h.hash[1], h.hash[2], h.hash[3]]
    }

    /// Derive the child key at `index`. Indices at or above [HARDENED] are hardened.
    pub fn ckd_priv(&self, index: u32) -> Result<ExtendedPrivKey> {
        let mut data = Vec::with_capacity(37);
        if index >= HARDENED {
            data.push(0);
            data.extend_from_slice(&self.private_key.to_bytes());
        } else {
            data.extend_from_slice(&self.public_key().to_bytes());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let key = hmac::Key::new(hmac::HMAC_SHA512, &self.chain_code);
        let i = hmac::sign(&key, &data);
        let (il, ir) = i.as_ref().split_at(32);
        let mut tweak = [0u8; 32];
        tweak.copy_from_slice(il);
        // IL >= n or a zero child key make this index unusable, BIP32 says to skip it
        let tweak = Scalar::from_be_bytes(tweak).map_err(|_| {
            Error::InvalidKeyMaterial(format!("child {} is not a valid key", index))
        })?;
        let child = self
            .private_key
            .inner
            .add_tweak(&tweak)
            .map_err(|_| Error::InvalidKeyMaterial(format!("child {} is not a valid key", index)))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);
        Ok(ExtendedPrivKey {
            version: self.version,
            depth: self.depth.wrapping_add(1),
            parent_fingerprint: self.fingerprint(),
            child_number: index,
            chain_code,
            private_key: PrivateKey::new(child),
        })
    }

    /// Derive along a path of child numbers.
    pub fn derive_path(&self, path: &[u32]) -> Result<ExtendedPrivKey> {
        let mut key = self.clone();
        for index in path {
            key = key.ckd_priv(*index)?;
        }
        Ok(key)
    }

    fn serialize(&self) -> [u8; SERIALIZED_SIZE] {
        let mut out = [0u8; SERIALIZED_SIZE];
        out[0..4].copy_from_slice(&self.version);
        out[4] = self.depth;
        out[5..9].copy_from_slice(&self.parent_fingerprint);
        out[9..13].copy_from_slice(&self.child_number.to_be_bytes());
        out[13..45].copy_from_slice(&self.chain_code);
        out[45] = 0;
        out[46..78].copy_from_slice(&self.private_key.to_bytes());
        out
    }
}

impl FromStr for ExtendedPrivKey {
    type Err = Error;

    /// Parse a base58check serialized extended private key. Public keys (`xpub`/`tpub`) and
    /// unknown versions are rejected.
    fn from_str(s: &str) -> Result<Self> {
        let data = base58ck::decode_with_checksum(s.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("not base58check: {}", e)))?;
        if data.len() != SERIALIZED_SIZE {
            return Err(Error::InvalidKeyMaterial(format!(
                "extended key must be {} bytes, got {}",
                SERIALIZED_SIZE,
                data.len()
            )));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&data[0..4]);
        if !Network::ALL.iter().any(|n| n.xprv_version() == version) {
            return Err(Error::InvalidKeyMaterial(
                "not an extended private key".to_string(),
            ));
        }
        if data[45] != 0 {
            return Err(Error::InvalidKeyMaterial(
                "private key data must start with 0x00".to_string(),
            ));
        }
        let private_key = PrivateKey::from_slice(&data[46..78])
            .map_err(|_| Error::InvalidKeyMaterial("private key out of range".to_string()))?;
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&data[5..9]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[13..45]);
        Ok(ExtendedPrivKey {
            version,
            depth: data[4],
            parent_fingerprint,
            child_number: u32::from_be_bytes([data[9], data[10], data[11], data[12]]),
            chain_code,
            private_key,
        })
    }
}

impl fmt::Display for ExtendedPrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base58ck::encode_with_checksum(&self.serialize()))
    }
}

impl fmt::Debug for ExtendedPrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedPrivKey")
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

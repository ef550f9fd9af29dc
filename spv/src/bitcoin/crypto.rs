//! secp256k1 keys as the wallet uses them: private keys come out of BIP32 derivation, public
//! keys are always compressed.

use crate::bitcoin::hash160::Hash160;
use crate::{Error, Result};
use secp256k1::Secp256k1;

/// A secp256k1 secret key.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub inner: secp256k1::SecretKey,
}

impl PrivateKey {
    pub fn new(key: secp256k1::SecretKey) -> PrivateKey {
        PrivateKey { inner: key }
    }

    /// A fresh key from the thread RNG.
    pub fn generate() -> PrivateKey {
        PrivateKey::new(secp256k1::SecretKey::new(&mut rand::thread_rng()))
    }

    /// 32 big-endian bytes, which must be a valid scalar.
    pub fn from_slice(data: &[u8]) -> Result<PrivateKey> {
        let bytes = <[u8; 32]>::try_from(data).map_err(|_| {
            Error::BadData(format!("a private key is 32 bytes, got {}", data.len()))
        })?;
        Ok(PrivateKey::new(secp256k1::SecretKey::from_slice(&bytes)?))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.inner.secret_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self)
    }
}

// keys must not end up in logs
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// A secp256k1 public key. Serialized compressed, 33 bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    pub inner: secp256k1::PublicKey,
}

impl PublicKey {
    pub fn new(key: impl Into<secp256k1::PublicKey>) -> PublicKey {
        PublicKey { inner: key.into() }
    }

    /// The hash a P2PKH address commits to.
    pub fn pubkey_hash(&self) -> Hash160 {
        Hash160::generate(&self.to_bytes())
    }

    pub fn to_bytes(self) -> [u8; 33] {
        self.inner.serialize()
    }
}

impl From<&PrivateKey> for PublicKey {
    fn from(key: &PrivateKey) -> Self {
        let secp = Secp256k1::signing_only();
        PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, &key.inner))
    }
}

use crate::bitcoin::{base58ck, Hash160, Network, PublicKey, Script};
use crate::{Error, Result};
use bech32::{segwit, Hrp};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// How an address locks coins to a public key hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    /// Legacy pay-to-public-key-hash, base58check encoded.
    #[default]
    P2pkh,
    /// Version 0 witness pay-to-public-key-hash, bech32 encoded.
    P2wpkh,
}

impl AddressKind {
    pub fn as_u8(&self) -> u8 {
        match self {
            AddressKind::P2pkh => 0,
            AddressKind::P2wpkh => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<AddressKind> {
        match v {
            0 => Ok(AddressKind::P2pkh),
            1 => Ok(AddressKind::P2wpkh),
            _ => Err(Error::BadData(format!("unknown address kind {}", v))),
        }
    }
}

/// An address paying to the hash160 of a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub network: Network,
    pub kind: AddressKind,
    pub hash160: Hash160,
}

impl Address {
    /// A legacy P2PKH address.
    pub fn new(network: Network, hash160: Hash160) -> Address {
        Address::with_kind(network, AddressKind::P2pkh, hash160)
    }

    pub fn p2wpkh(network: Network, hash160: Hash160) -> Address {
        Address::with_kind(network, AddressKind::P2wpkh, hash160)
    }

    pub fn with_kind(network: Network, kind: AddressKind, hash160: Hash160) -> Address {
        Address {
            network,
            kind,
            hash160,
        }
    }

    pub fn from_public_key(network: Network, kind: AddressKind, key: &PublicKey) -> Address {
        Address::with_kind(network, kind, key.pubkey_hash())
    }

    /// Parse an address, requiring that it belongs to `network`.
    ///
    /// Base58 testnet and regtest addresses share their prefix so either accepts the other's.
    /// Bech32 addresses carry a distinct prefix per network.
    pub fn parse(s: &str, network: Network) -> Result<Address> {
        if is_bech32(s) {
            return Address::parse_segwit(s, network);
        }
        let data = base58ck::decode_with_checksum(s)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?;
        if data.len() != 1 + Hash160::SIZE {
            return Err(Error::InvalidAddress(format!(
                "{}: payload has length {}",
                s,
                data.len()
            )));
        }
        if data[0] != network.address_prefix() {
            return Err(Error::InvalidAddress(format!(
                "{} is not a P2PKH address for {}",
                s, network
            )));
        }
        Ok(Address::new(network, Hash160::from_slice(&data[1..])?))
    }

    fn parse_segwit(s: &str, network: Network) -> Result<Address> {
        let (hrp, version, program) =
            segwit::decode(s).map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?;
        if hrp.to_string().to_ascii_lowercase() != network.bech32_hrp() {
            return Err(Error::InvalidAddress(format!(
                "{} is not a segwit address for {}",
                s, network
            )));
        }
        if version != segwit::VERSION_0 || program.len() != Hash160::SIZE {
            return Err(Error::InvalidAddress(format!(
                "{}: only version 0 key hash programs are supported",
                s
            )));
        }
        Ok(Address::p2wpkh(network, Hash160::from_slice(&program)?))
    }

    /// The locking script that pays to this address.
    pub fn script_pubkey(&self) -> Script {
        match self.kind {
            AddressKind::P2pkh => Script::p2pkh(&self.hash160),
            AddressKind::P2wpkh => Script::p2wpkh(&self.hash160),
        }
    }
}

/// True if `s` starts with the bech32 prefix of any network.
fn is_bech32(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    Network::ALL.iter().any(|n| {
        lower
            .strip_prefix(n.bech32_hrp())
            .is_some_and(|rest| rest.starts_with('1'))
    })
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressKind::P2pkh => {
                let mut data = Vec::with_capacity(1 + Hash160::SIZE);
                data.push(self.network.address_prefix());
                data.extend_from_slice(&self.hash160.hash);
                f.write_str(&base58ck::encode_with_checksum(&data))
            }
            AddressKind::P2wpkh => {
                let hrp = Hrp::parse(self.network.bech32_hrp()).map_err(|_| fmt::Error)?;
                let encoded = segwit::encode_v0(hrp, &self.hash160.hash).map_err(|_| fmt::Error)?;
                f.write_str(&encoded)
            }
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex::FromHex;

    fn hash() -> Hash160 {
        Hash160::from_hex("751e76e8199196d454941c45d1b3a323f1433bd6").unwrap()
    }

    #[test]
    fn encode_per_network() {
        assert_eq!(
            Address::new(Network::Mainnet, hash()).to_string(),
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
        );
        assert_eq!(
            Address::new(Network::Testnet, hash()).to_string(),
            "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r"
        );
        assert_eq!(
            Address::p2wpkh(Network::Mainnet, hash()).to_string(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
        assert_eq!(
            Address::p2wpkh(Network::Testnet, hash()).to_string(),
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
        );
    }

    #[test]
    fn parse_checks_network() {
        let a = Address::parse("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", Network::Mainnet).unwrap();
        assert_eq!(a.hash160, hash());
        assert_eq!(a.kind, AddressKind::P2pkh);
        assert!(matches!(
            Address::parse("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", Network::Testnet),
            Err(Error::InvalidAddress(_))
        ));
        let t = Address::parse("mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r", Network::Regtest).unwrap();
        assert_eq!(t.script_pubkey().p2pkh_hash(), Some(hash()));
    }

    #[test]
    fn parse_segwit() {
        let a = Address::parse("BC1QW508D6QEJXTDG4Y5R3ZARVARY0C5XW7KV8F3T4", Network::Mainnet)
            .unwrap();
        assert_eq!(a, Address::p2wpkh(Network::Mainnet, hash()));
        assert_eq!(a.script_pubkey().p2wpkh_hash(), Some(hash()));
        assert!(matches!(
            Address::parse("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", Network::Testnet),
            Err(Error::InvalidAddress(_))
        ));
        // a bad checksum
        assert!(matches!(
            Address::parse("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsy", Network::Testnet),
            Err(Error::InvalidAddress(_))
        ));
        // a version 0 script hash
        assert!(matches!(
            Address::parse(
                "tb1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3q0sl5k7",
                Network::Testnet
            ),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            Address::parse("not-an-address", Network::Mainnet),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn kind_byte() {
        for kind in [AddressKind::P2pkh, AddressKind::P2wpkh] {
            assert_eq!(AddressKind::from_u8(kind.as_u8()).unwrap(), kind);
        }
        assert!(AddressKind::from_u8(2).is_err());
    }
}

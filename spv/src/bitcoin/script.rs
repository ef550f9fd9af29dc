use crate::bitcoin::{varint_decode_len, varint_encode, varint_size, Encodable, Hash160};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes};
use hex::{FromHex, ToHex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// A Script represents a Bitcoin Script.
///
/// Scripts lock outputs and unlock those outputs in inputs. The wallet only interprets the
/// pay-to-public-key-hash templates, legacy and witness; everything else is carried as opaque
/// bytes.
#[derive(PartialEq, Eq, Hash, Clone, Default)]
pub struct Script {
    pub raw: Bytes,
}

impl Script {
    pub fn new(raw: impl Into<Bytes>) -> Script {
        Script { raw: raw.into() }
    }

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn p2pkh(pubkey_hash: &Hash160) -> Script {
        ScriptBuilder::new()
            .op(OP_DUP)
            .op(OP_HASH160)
            .push(&pubkey_hash.hash)
            .op(OP_EQUALVERIFY)
            .op(OP_CHECKSIG)
            .build()
    }

    /// The unlocking script of a P2PKH input: `<sig> <pubkey>`.
    pub fn p2pkh_unlock(signature: &[u8], pubkey: &[u8]) -> Script {
        ScriptBuilder::new().push(signature).push(pubkey).build()
    }

    /// The public key hash of a P2PKH locking script, or None for any other script.
    pub fn p2pkh_hash(&self) -> Option<Hash160> {
        let r = &self.raw;
        if r.len() == 25
            && r[0] == OP_DUP
            && r[1] == OP_HASH160
            && r[2] == 20
            && r[23] == OP_EQUALVERIFY
            && r[24] == OP_CHECKSIG
        {
            Hash160::from_slice(&r[3..23]).ok()
        } else {
            None
        }
    }

    /// `OP_0 <hash>`, the version 0 witness program of a public key hash.
    pub fn p2wpkh(pubkey_hash: &Hash160) -> Script {
        ScriptBuilder::new().op(OP_0).push(&pubkey_hash.hash).build()
    }

    /// The public key hash of a P2WPKH locking script, or None for any other script.
    pub fn p2wpkh_hash(&self) -> Option<Hash160> {
        let r = &self.raw;
        if r.len() == 22 && r[0] == OP_0 && r[1] == 20 {
            Hash160::from_slice(&r[2..]).ok()
        } else {
            None
        }
    }

    /// Every data element pushed by the script, in order. Parsing stops at the first
    /// truncated push.
    pub fn pushed_data(&self) -> Vec<&[u8]> {
        let mut out = Vec::new();
        let r = &self.raw[..];
        let mut i = 0;
        while i < r.len() {
            let op = r[i];
            i += 1;
            let len = match op {
                1..=0x4b => op as usize,
                OP_PUSHDATA1 if i < r.len() => {
                    i += 1;
                    r[i - 1] as usize
                }
                OP_PUSHDATA2 if i + 2 <= r.len() => {
                    i += 2;
                    u16::from_le_bytes([r[i - 2], r[i - 1]]) as usize
                }
                OP_PUSHDATA4 if i + 4 <= r.len() => {
                    i += 4;
                    u32::from_le_bytes([r[i - 4], r[i - 3], r[i - 2], r[i - 1]]) as usize
                }
                OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => break,
                _ => continue,
            };
            if i + len > r.len() {
                break;
            }
            out.push(&r[i..i + len]);
            i += len;
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl Encodable for Script {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self> {
        let len = varint_decode_len(buffer, 1)?;
        Ok(Script {
            raw: buffer.copy_to_bytes(len),
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        varint_encode(buffer, self.raw.len() as u64)?;
        buffer.put_slice(&self.raw);
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        varint_size(self.raw.len() as u64) + self.raw.len() as u64
    }
}

impl FromHex for Script {
    type Error = Error;

    fn from_hex<T: AsRef<[u8]>>(hex: T) -> std::result::Result<Self, Self::Error> {
        let raw = hex::decode(hex)?;
        Ok(Script { raw: raw.into() })
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.raw.encode_hex::<String>())
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw.encode_hex::<String>())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

/// Builds scripts from opcodes and data pushes.
#[derive(Default)]
pub struct ScriptBuilder {
    raw: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single opcode.
    pub fn op(mut self, op: u8) -> Self {
        self.raw.push(op);
        self
    }

    /// Append a minimal data push.
    pub fn push(mut self, data: &[u8]) -> Self {
        match data.len() {
            0 => self.raw.push(OP_0),
            n @ 1..=0x4b => self.raw.push(n as u8),
            n @ 0x4c..=0xff => {
                self.raw.push(OP_PUSHDATA1);
                self.raw.push(n as u8);
            }
            n @ 0x100..=0xffff => {
                self.raw.push(OP_PUSHDATA2);
                self.raw.extend_from_slice(&(n as u16).to_le_bytes());
            }
            n => {
                self.raw.push(OP_PUSHDATA4);
                self.raw.extend_from_slice(&(n as u32).to_le_bytes());
            }
        }
        self.raw.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Script {
        Script {
            raw: Bytes::from(self.raw),
        }
    }
}

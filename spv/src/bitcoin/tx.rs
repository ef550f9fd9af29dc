use crate::bitcoin::hash::Hash;
use crate::bitcoin::{varint_decode_len, varint_encode, varint_size};
use crate::bitcoin::{Encodable, Script};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes};
use hex::{FromHex, ToHex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a transaction.
pub type TxHash = Hash;

/// A transaction.
///
/// BIP144 witness data is decoded and re-encoded but never interpreted. The txid is always
/// computed over the serialization without witnesses.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Tx {
    pub fn hash(&self) -> TxHash {
        let mut v = Vec::with_capacity(self.size(false) as usize);
        self.write(&mut v, false);
        Hash::sha256d(&v)
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// A single input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.as_slice(), [only] if only.outpoint.is_null())
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    // Writes into a BufMut cannot fail short of running out of memory, so the varint results
    // are dropped.
    fn write(&self, buffer: &mut dyn BufMut, with_witness: bool) {
        buffer.put_u32_le(self.version);
        if with_witness {
            buffer.put_slice(&[0x00, 0x01]);
        }
        let _ = varint_encode(buffer, self.inputs.len() as u64);
        self.inputs.iter().for_each(|i| {
            let _ = i.to_binary(buffer);
        });
        let _ = varint_encode(buffer, self.outputs.len() as u64);
        self.outputs.iter().for_each(|o| {
            let _ = o.to_binary(buffer);
        });
        if with_witness {
            for input in &self.inputs {
                let _ = varint_encode(buffer, input.witness.len() as u64);
                for item in &input.witness {
                    let _ = varint_encode(buffer, item.len() as u64);
                    buffer.put_slice(item);
                }
            }
        }
        buffer.put_u32_le(self.lock_time);
    }

    fn size(&self, with_witness: bool) -> u64 {
        let inputs: u64 = self.inputs.iter().map(|i| i.encoded_size()).sum();
        let outputs: u64 = self.outputs.iter().map(|o| o.encoded_size()).sum();
        let mut size = 8
            + varint_size(self.inputs.len() as u64)
            + inputs
            + varint_size(self.outputs.len() as u64)
            + outputs;
        if with_witness {
            size += 2;
            for input in &self.inputs {
                size += varint_size(input.witness.len() as u64);
                size += input
                    .witness
                    .iter()
                    .map(|item| varint_size(item.len() as u64) + item.len() as u64)
                    .sum::<u64>();
            }
        }
        size
    }
}

/// Parses the whole string, trailing bytes are an error.
impl FromHex for Tx {
    type Error = Error;

    fn from_hex<T: AsRef<[u8]>>(hex: T) -> std::result::Result<Self, Self::Error> {
        let bytes = Vec::<u8>::from_hex(hex)?;
        let mut rest = bytes.as_slice();
        let tx = Tx::from_binary(&mut rest)?;
        match rest.len() {
            0 => Ok(tx),
            n => Err(Error::BadData(format!("{} bytes follow the transaction", n))),
        }
    }
}

impl ToHex for Tx {
    fn encode_hex<T: FromIterator<char>>(&self) -> T {
        let mut v = Vec::with_capacity(self.encoded_size() as usize);
        self.write(&mut v, self.has_witness());
        v.encode_hex()
    }

    fn encode_hex_upper<T: FromIterator<char>>(&self) -> T {
        let mut v = Vec::with_capacity(self.encoded_size() as usize);
        self.write(&mut v, self.has_witness());
        v.encode_hex_upper()
    }
}

impl Encodable for Tx {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        let version = buffer.try_get_u32_le()?;
        // BIP144 marker: an empty input list followed by flag 0x01
        let mut count = varint_decode_len(buffer, TxInput::MIN_SIZE)?;
        let segwit = count == 0 && buffer.chunk().first() == Some(&0x01);
        if segwit {
            buffer.advance(1);
            count = varint_decode_len(buffer, TxInput::MIN_SIZE)?;
        }
        let mut inputs = (0..count)
            .map(|_| TxInput::from_binary(buffer))
            .collect::<Result<Vec<_>>>()?;
        let count = varint_decode_len(buffer, TxOutput::MIN_SIZE)?;
        let outputs = (0..count)
            .map(|_| TxOutput::from_binary(buffer))
            .collect::<Result<Vec<_>>>()?;
        if segwit {
            for input in inputs.iter_mut() {
                let items = varint_decode_len(buffer, 1)?;
                for _ in 0..items {
                    let len = varint_decode_len(buffer, 1)?;
                    input.witness.push(buffer.copy_to_bytes(len));
                }
            }
        }
        Ok(Tx {
            version,
            inputs,
            outputs,
            lock_time: buffer.try_get_u32_le()?,
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        self.write(buffer, self.has_witness());
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        self.size(self.has_witness())
    }
}

/// Names an output: the transaction that created it and its position there.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub tx_hash: TxHash,
    pub index: u32,
}

impl Outpoint {
    pub const SIZE: u64 = 36;
    /// The outpoint spent by coinbase inputs.
    pub const NULL: Outpoint = Outpoint {
        tx_hash: Hash::ZERO,
        index: 0xffffffff,
    };

    pub fn new(tx_hash: TxHash, index: u32) -> Outpoint {
        Outpoint { tx_hash, index }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

impl Encodable for Outpoint {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        Ok(Outpoint {
            tx_hash: Hash::from_binary(buffer)?,
            index: buffer.try_get_u32_le()?,
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        self.tx_hash.to_binary(buffer)?;
        buffer.put_u32_le(self.index);
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        Self::SIZE
    }
}

/// Spends an earlier output.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: Outpoint,
    pub script: Script,
    pub sequence: u32,
    /// Witness stack, empty for legacy inputs.
    #[serde(default)]
    pub witness: Vec<Bytes>,
}

impl TxInput {
    const MIN_SIZE: usize = 41;

    pub fn new(outpoint: Outpoint, script: Script) -> TxInput {
        TxInput {
            outpoint,
            script,
            sequence: 0xffffffff,
            witness: Vec::new(),
        }
    }
}

impl Encodable for TxInput {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self> {
        Ok(TxInput {
            outpoint: Outpoint::from_binary(buffer)?,
            script: Script::from_binary(buffer)?,
            sequence: buffer.try_get_u32_le()?,
            witness: Vec::new(),
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        self.outpoint.to_binary(buffer)?;
        self.script.to_binary(buffer)?;
        buffer.put_u32_le(self.sequence);
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        Outpoint::SIZE + self.script.encoded_size() + 4
    }
}

/// Locks `value` satoshis behind `script`.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
}

impl TxOutput {
    const MIN_SIZE: usize = 9;

    pub fn new(value: u64, script: Script) -> TxOutput {
        TxOutput { value, script }
    }
}

impl Encodable for TxOutput {
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized,
    {
        Ok(TxOutput {
            value: buffer.try_get_u64_le()?,
            script: Script::from_binary(buffer)?,
        })
    }

    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()> {
        buffer.put_u64_le(self.value);
        self.script.to_binary(buffer)
    }

    fn encoded_size(&self) -> u64 {
        8 + self.script.encoded_size()
    }
}

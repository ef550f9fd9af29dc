use crate::bitcoin::{Encodable, Hash, Outpoint, PrivateKey, PublicKey, Script, Tx};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use secp256k1::{ecdsa::Signature, Message, Secp256k1};

/// The only signature hash type the wallet produces.
pub const SIGHASH_ALL: u8 = 0x01;

/// Calculate the legacy (pre-segwit) SIGHASH_ALL signature hash for an input.
///
/// Every input script is blanked except the one being signed, which carries `subscript`
/// (the locking script of the output being spent).
pub fn signature_hash(tx: &Tx, input_index: usize, subscript: &Script) -> Result<Hash> {
    if input_index >= tx.inputs.len() {
        return Err(Error::BadArgument("Invalid input index".to_string()));
    }
    let mut tx_copy = tx.clone();
    for (i, input) in tx_copy.inputs.iter_mut().enumerate() {
        input.witness.clear();
        input.script = if i == input_index {
            subscript.clone()
        } else {
            Script::default()
        };
    }
    let mut buffer = BytesMut::with_capacity(tx_copy.encoded_size() as usize + 4);
    tx_copy.to_binary(&mut buffer)?;
    buffer.put_u32_le(SIGHASH_ALL as u32);
    Ok(Hash::sha256d(&buffer))
}

/// Calculate the BIP143 SIGHASH_ALL signature hash of a version 0 witness input spending
/// `amount` satoshis.
pub fn witness_signature_hash(
    tx: &Tx,
    input_index: usize,
    script_code: &Script,
    amount: u64,
) -> Result<Hash> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or_else(|| Error::BadArgument("Invalid input index".to_string()))?;
    let mut prevouts = BytesMut::with_capacity(tx.inputs.len() * Outpoint::SIZE as usize);
    let mut sequences = BytesMut::with_capacity(tx.inputs.len() * 4);
    for i in &tx.inputs {
        i.outpoint.to_binary(&mut prevouts)?;
        sequences.put_u32_le(i.sequence);
    }
    let mut outputs = BytesMut::new();
    for o in &tx.outputs {
        o.to_binary(&mut outputs)?;
    }

    let mut buffer = BytesMut::with_capacity(156 + script_code.raw.len());
    buffer.put_u32_le(tx.version);
    buffer.put_slice(&Hash::sha256d(&prevouts).raw);
    buffer.put_slice(&Hash::sha256d(&sequences).raw);
    input.outpoint.to_binary(&mut buffer)?;
    script_code.to_binary(&mut buffer)?;
    buffer.put_u64_le(amount);
    buffer.put_u32_le(input.sequence);
    buffer.put_slice(&Hash::sha256d(&outputs).raw);
    buffer.put_u32_le(tx.lock_time);
    buffer.put_u32_le(SIGHASH_ALL as u32);
    Ok(Hash::sha256d(&buffer))
}

/// Sign a signature hash, returning the DER signature with the sighash byte appended.
fn sign_hash(sighash: &Hash, private_key: &PrivateKey) -> Bytes {
    let message = Message::from_digest(sighash.raw);
    let secp = Secp256k1::signing_only();
    let signature = secp.sign_ecdsa(&message, &private_key.inner);
    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SIGHASH_ALL);
    Bytes::from(sig_bytes)
}

/// Sign a legacy input, returning the DER signature with the sighash byte appended.
pub fn sign_input(
    tx: &Tx,
    input_index: usize,
    subscript: &Script,
    private_key: &PrivateKey,
) -> Result<Bytes> {
    let sighash = signature_hash(tx, input_index, subscript)?;
    Ok(sign_hash(&sighash, private_key))
}

/// Sign a P2PKH input in place, setting its unlocking script to `<sig> <pubkey>`.
pub fn sign_p2pkh_input(tx: &mut Tx, input_index: usize, private_key: &PrivateKey) -> Result<()> {
    let public_key = private_key.public_key();
    let subscript = Script::p2pkh(&public_key.pubkey_hash());
    let sig = sign_input(tx, input_index, &subscript, private_key)?;
    tx.inputs[input_index].script = Script::p2pkh_unlock(&sig, &public_key.to_bytes());
    Ok(())
}

/// Sign a P2WPKH input spending `amount` in place, setting its witness to `<sig> <pubkey>`.
pub fn sign_p2wpkh_input(
    tx: &mut Tx,
    input_index: usize,
    private_key: &PrivateKey,
    amount: u64,
) -> Result<()> {
    let public_key = private_key.public_key();
    // the script code of a key hash program is the legacy P2PKH script
    let script_code = Script::p2pkh(&public_key.pubkey_hash());
    let sighash = witness_signature_hash(tx, input_index, &script_code, amount)?;
    let input = &mut tx.inputs[input_index];
    input.script = Script::default();
    input.witness = vec![
        sign_hash(&sighash, private_key),
        Bytes::from(public_key.to_bytes().to_vec()),
    ];
    Ok(())
}

/// Verify that a P2WPKH input spending `amount` is correctly signed by the key whose hash is
/// in `script_pubkey`.
pub fn verify_p2wpkh_input(
    tx: &Tx,
    input_index: usize,
    script_pubkey: &Script,
    amount: u64,
) -> Result<bool> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or_else(|| Error::BadArgument("Invalid input index".to_string()))?;
    let (sig, pubkey) = match input.witness.as_slice() {
        [sig, pubkey] if !sig.is_empty() && input.script.is_empty() => (sig, pubkey),
        _ => return Ok(false),
    };
    let public_key = PublicKey::new(secp256k1::PublicKey::from_slice(pubkey)?);
    let hash = public_key.pubkey_hash();
    if script_pubkey.p2wpkh_hash() != Some(hash) {
        return Ok(false);
    }
    let sighash = witness_signature_hash(tx, input_index, &Script::p2pkh(&hash), amount)?;
    Ok(verify_signature(&sighash, sig, &public_key))
}

fn verify_signature(sighash: &Hash, sig: &[u8], public_key: &PublicKey) -> bool {
    let (sighash_type, der) = match sig.split_last() {
        Some(parts) => parts,
        None => return false,
    };
    if *sighash_type != SIGHASH_ALL {
        return false;
    }
    let signature = match Signature::from_der(der) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let message = Message::from_digest(sighash.raw);
    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&message, &signature, &public_key.inner).is_ok()
}

/// Verify that a P2PKH input is correctly signed by the key whose hash is in `subscript`.
pub fn verify_p2pkh_input(tx: &Tx, input_index: usize, subscript: &Script) -> Result<bool> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or_else(|| Error::BadArgument("Invalid input index".to_string()))?;
    let pushes = input.script.pushed_data();
    if pushes.len() != 2 || pushes[0].is_empty() {
        return Ok(false);
    }
    let (sig, pubkey) = (pushes[0], pushes[1]);
    let public_key = PublicKey::new(secp256k1::PublicKey::from_slice(pubkey)?);
    if subscript.p2pkh_hash() != Some(public_key.pubkey_hash()) {
        return Ok(false);
    }
    let sighash = signature_hash(tx, input_index, subscript)?;
    Ok(verify_signature(&sighash, sig, &public_key))
}

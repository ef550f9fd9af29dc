//! Builds and signs payments from the ledger's unspent outputs, legacy and witness alike.

use crate::bitcoin::sighash::{sign_p2pkh_input, sign_p2wpkh_input};
use crate::bitcoin::{Address, AddressKind, Network, Script, Tx, TxInput, TxOutput};
use crate::wallet::deriver::{Chain, DerivedAddress, KeyDeriver};
use crate::wallet::ledger::{Ledger, Utxo};
use crate::{Error, Result};

/// Outputs below this value are not relayed; change this small is left to the miner.
pub const DUST_LIMIT: u64 = 546;

/// A signed payment, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub tx: Tx,
    /// The outputs spent.
    pub inputs: Vec<Utxo>,
    /// The change output's address, if the payment has one.
    pub change: Option<DerivedAddress>,
    /// True if the change address had to be added to the watch set.
    pub watch_grew: bool,
    /// The fee actually paid, including any change folded into it.
    pub fee: u64,
}

/// Fail with `NetworkMismatch` unless `requested` is the wallet's network.
pub fn check_network(wallet: Network, requested: Network) -> Result<()> {
    if wallet != requested {
        return Err(Error::NetworkMismatch {
            expected: wallet.to_string(),
            received: requested.to_string(),
        });
    }
    Ok(())
}

/// Choose outputs covering `target`: confirmed before pending, larger before smaller.
pub fn select_coins(utxos: &[Utxo], target: u64) -> Result<Vec<Utxo>> {
    let mut candidates = utxos.to_vec();
    candidates.sort_by(|a, b| {
        b.height
            .is_some()
            .cmp(&a.height.is_some())
            .then(b.amount.cmp(&a.amount))
            .then(a.outpoint().cmp(&b.outpoint()))
    });
    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in candidates {
        if total >= target {
            break;
        }
        total += utxo.amount;
        selected.push(utxo);
    }
    if total < target {
        return Err(Error::InsufficientFunds {
            needed: target,
            available: total,
        });
    }
    Ok(selected)
}

/// Builds payments with a fixed fee.
pub struct TransactionBuilder<'a> {
    deriver: &'a KeyDeriver,
    fee: u64,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(deriver: &'a KeyDeriver, fee: u64) -> Self {
        TransactionBuilder { deriver, fee }
    }

    /// Build and sign a payment of `amount` satoshis to `destination`.
    ///
    /// Nothing in the ledger changes unless the payment can be funded, in which case a change
    /// index is reserved and the spent outputs are held so no other payment selects them. The
    /// payment is not applied: that happens once it is broadcast.
    pub fn build_payment(
        &self,
        ledger: &mut Ledger,
        destination: &str,
        amount: u64,
    ) -> Result<Payment> {
        let network = ledger.network();
        let destination = Address::parse(destination, network)?;
        if amount < DUST_LIMIT {
            return Err(Error::BadArgument(format!(
                "amount {} is below the dust limit",
                amount
            )));
        }
        let needed = amount
            .checked_add(self.fee)
            .ok_or_else(|| Error::BadArgument(format!("amount {} too large", amount)))?;
        let selected = select_coins(&ledger.spendable(), needed)?;
        let total: u64 = selected.iter().map(|u| u.amount).sum();

        let mut tx = Tx {
            version: 1,
            inputs: selected
                .iter()
                .map(|u| TxInput::new(u.outpoint(), Script::default()))
                .collect(),
            outputs: vec![TxOutput::new(amount, destination.script_pubkey())],
            lock_time: 0,
        };

        let change_amount = total - needed;
        let mut change = None;
        let mut watch_grew = false;
        if change_amount >= DUST_LIMIT {
            let index = ledger.reserve_change_index();
            let address = self.deriver.derive(Chain::Change, index)?;
            watch_grew = ledger.watch_address(address);
            tx.outputs
                .push(TxOutput::new(change_amount, address.address.script_pubkey()));
            change = Some(address);
        }

        for (i, utxo) in selected.iter().enumerate() {
            let owner = ledger
                .watch()
                .lookup_hash(&utxo.address.hash160)
                .ok_or_else(|| {
                    Error::Internal(format!("no key for output {}", utxo.outpoint()))
                })?;
            let key = self.deriver.private_key(owner.chain, owner.index)?;
            match utxo.address.kind {
                AddressKind::P2pkh => sign_p2pkh_input(&mut tx, i, &key)?,
                AddressKind::P2wpkh => sign_p2wpkh_input(&mut tx, i, &key, utxo.amount)?,
            }
        }

        let outpoints: Vec<_> = selected.iter().map(|u| u.outpoint()).collect();
        ledger.reserve_outpoints(&outpoints);

        let fee = if change.is_some() { self.fee } else { self.fee + change_amount };
        tracing::debug!(
            txid = %tx.hash(),
            inputs = selected.len(),
            amount,
            fee,
            "Built payment"
        );
        Ok(Payment {
            tx,
            inputs: selected,
            change,
            watch_grew,
            fee,
        })
    }
}

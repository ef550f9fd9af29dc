use core::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Add, Sub};

/// An amount of bitcoin, held in satoshis.
///
/// Display shows the amount in BTC with trailing zeros removed, e.g. `0.0005`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);
    /// Exactly one bitcoin.
    pub const ONE_BTC: Amount = Amount(100_000_000);

    pub fn from_sat(sat: u64) -> Amount {
        Amount(sat as i64)
    }

    pub fn as_sat(&self) -> i64 {
        self.0
    }

    /// Convert to a float, using 1BTC = 10^8 satoshis. Dont use this in calculations.
    pub fn as_btc(&self) -> f64 {
        self.0 as f64 / 100_000_000.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let mut frac = format!("{:08}", abs % 100_000_000);
        while frac.len() > 1 && frac.ends_with('0') {
            frac.pop();
        }
        write!(f, "{}{}.{}", sign, abs / 100_000_000, frac)
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        Amount(iter.map(|a| a.0).sum())
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        f64::serialize(&self.as_btc(), serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let btc = f64::deserialize(deserializer)?;
        Ok(Amount((btc * 100_000_000.0).round() as i64))
    }
}

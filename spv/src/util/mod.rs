mod amount;

pub use self::amount::Amount;

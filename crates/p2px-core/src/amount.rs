//! # Base-Unit Amounts
//!
//! [`Coin`] counts the smallest unit of the base currency (satoshis for
//! BTC). Payout amounts decided by a mediator travel through the protocol
//! as `Coin` and are copied verbatim into the trade's process model.
//!
//! ## Security Invariant
//!
//! Amounts are never represented as floating point. Arithmetic is checked;
//! an overflowing sum is an error, not a wrap.

use serde::{Deserialize, Serialize};

/// A non-negative amount in the smallest unit of the base currency.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Coin(u64);

impl Coin {
    /// The zero amount.
    pub const ZERO: Coin = Coin(0);

    /// Number of smallest units per whole coin.
    pub const UNITS_PER_COIN: u64 = 100_000_000;

    /// Create an amount from a count of smallest units.
    pub const fn from_sat(value: u64) -> Self {
        Self(value)
    }

    /// The amount as a count of smallest units.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Whether the amount is zero.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition. Returns `None` on overflow.
    pub fn checked_add(self, other: Coin) -> Option<Coin> {
        self.0.checked_add(other.0).map(Coin)
    }

    /// Checked subtraction. Returns `None` if `other` exceeds `self`.
    pub fn checked_sub(self, other: Coin) -> Option<Coin> {
        self.0.checked_sub(other.0).map(Coin)
    }

    /// Render as a whole-coin decimal string with eight fractional digits.
    pub fn to_plain_string(&self) -> String {
        format!(
            "{}.{:08}",
            self.0 / Self::UNITS_PER_COIN,
            self.0 % Self::UNITS_PER_COIN
        )
    }
}

impl std::fmt::Display for Coin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} BTC", self.to_plain_string())
    }
}

impl From<u64> for Coin {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_string_pads_fraction() {
        assert_eq!(Coin::from_sat(950_000).to_plain_string(), "0.00950000");
        assert_eq!(Coin::from_sat(150_000_001).to_plain_string(), "1.50000001");
        assert_eq!(Coin::ZERO.to_plain_string(), "0.00000000");
    }

    #[test]
    fn display_includes_unit() {
        assert_eq!(format!("{}", Coin::from_sat(40_000)), "0.00040000 BTC");
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(
            Coin::from_sat(950_000).checked_add(Coin::from_sat(40_000)),
            Some(Coin::from_sat(990_000))
        );
        assert_eq!(Coin::from_sat(1).checked_sub(Coin::from_sat(2)), None);
        assert_eq!(Coin::from_sat(u64::MAX).checked_add(Coin::from_sat(1)), None);
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&Coin::from_sat(950_000)).unwrap();
        assert_eq!(json, "950000");
        assert!(serde_json::from_str::<Coin>("-1").is_err());
    }

    proptest! {
        #[test]
        fn plain_string_parses_back(sat in any::<u64>()) {
            let s = Coin::from_sat(sat).to_plain_string();
            let (whole, frac) = s.split_once('.').unwrap();
            let whole: u64 = whole.parse().unwrap();
            let frac: u64 = frac.parse().unwrap();
            prop_assert_eq!(whole * Coin::UNITS_PER_COIN + frac, sat);
        }
    }
}

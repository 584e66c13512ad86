//! Arbitrary-precision balances in the base-10¹⁸ smallest unit.
//!
//! One CER is 10¹⁸ wei-like units.  Every float that enters the system —
//! RPC amounts, gas — is converted through its exact decimal string so
//! binary floating-point drift never reaches a balance.

use std::fmt;
use std::ops::{Add, AddAssign};

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Number of decimal places in one CER.
pub const DECIMALS: u32 = 18;

/// 10¹⁸, the smallest-unit scale of one CER.
pub fn unit() -> BigUint {
    BigUint::from(10u32).pow(DECIMALS)
}

/// Nonnegative big-integer quantity in units of 10⁻¹⁸ CER.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Coins(BigUint);

impl Coins {
    pub fn zero() -> Coins {
        Coins(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Wraps a raw smallest-unit amount.
    pub fn from_wei(raw: BigUint) -> Coins {
        Coins(raw)
    }

    pub fn from_wei_u64(raw: u64) -> Coins {
        Coins(BigUint::from(raw))
    }

    /// `n` whole CER.
    pub fn whole(n: u64) -> Coins {
        Coins(BigUint::from(n) * unit())
    }

    /// Parses a nonnegative decimal string such as `"3.25"` into smallest
    /// units.  At most [`DECIMALS`] fractional digits are accepted.
    pub fn from_decimal_str(s: &str) -> Result<Coins> {
        let s = s.trim();
        if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
            return Err(Error::BadInput(format!("invalid amount {s:?}")));
        }
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(Error::BadInput(format!("invalid amount {s:?}")));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::BadInput(format!("invalid amount {s:?}")));
        }
        if frac_part.len() > DECIMALS as usize {
            return Err(Error::BadInput(format!(
                "more than {DECIMALS} fractional digits in {s:?}"
            )));
        }
        let int_units = if int_part.is_empty() {
            BigUint::zero()
        } else {
            int_part
                .parse::<BigUint>()
                .map_err(|_| Error::BadInput(format!("invalid amount {s:?}")))?
        };
        let mut frac_units = BigUint::zero();
        if !frac_part.is_empty() {
            let padded = format!("{frac_part:0<width$}", width = DECIMALS as usize);
            frac_units = padded
                .parse::<BigUint>()
                .map_err(|_| Error::BadInput(format!("invalid amount {s:?}")))?;
        }
        Ok(Coins(int_units * unit() + frac_units))
    }

    /// Converts a float through its exact decimal rendering.
    pub fn from_float(x: f64) -> Result<Coins> {
        if !x.is_finite() || x < 0.0 {
            return Err(Error::BadInput(format!("invalid amount {x}")));
        }
        // Display for f64 is the shortest decimal form that round-trips,
        // never scientific notation.
        let mut s = format!("{x}");
        if let Some(dot) = s.find('.') {
            let frac_len = s.len() - dot - 1;
            if frac_len > DECIMALS as usize {
                s.truncate(dot + 1 + DECIMALS as usize);
            }
        }
        Coins::from_decimal_str(&s)
    }

    /// Decimal CER rendering with trailing zeros trimmed, e.g. `"3.25"`.
    pub fn to_decimal_string(&self) -> String {
        let scale = unit();
        let int_part = &self.0 / &scale;
        let frac_part = &self.0 % &scale;
        if frac_part.is_zero() {
            return int_part.to_string();
        }
        let frac = format!("{frac_part:0>width$}", width = DECIMALS as usize);
        format!("{}.{}", int_part, frac.trim_end_matches('0'))
    }

    /// Base-10 rendering of the raw smallest-unit integer.
    pub fn to_wei_string(&self) -> String {
        self.0.to_string()
    }

    pub fn from_wei_str(s: &str) -> Result<Coins> {
        s.parse::<BigUint>()
            .map(Coins)
            .map_err(|_| Error::BadInput(format!("invalid integer amount {s:?}")))
    }

    /// Lossy CER value for display and JSON numbers.
    pub fn as_float(&self) -> f64 {
        let scale = unit();
        let int_part = (&self.0 / &scale).to_f64().unwrap_or(f64::MAX);
        let frac_part = (&self.0 % &scale).to_f64().unwrap_or(0.0);
        int_part + frac_part / 1e18
    }

    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        if self.0 >= other.0 {
            Some(Coins(&self.0 - &other.0))
        } else {
            None
        }
    }

    /// Fixed-point product `self · other / 10¹⁸`, used for gas fees where
    /// both operands carry the 10¹⁸ scale.
    pub fn scale_mul(&self, other: &Coins) -> Coins {
        Coins(&self.0 * &other.0 / unit())
    }

    /// Little-endian magnitude bytes (account-record encoding).
    pub fn to_bytes_le(&self) -> Vec<u8> {
        self.0.to_bytes_le()
    }

    pub fn from_bytes_le(bytes: &[u8]) -> Coins {
        Coins(BigUint::from_bytes_le(bytes))
    }

    /// Big-endian magnitude bytes (transaction payload encoding).
    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    pub fn from_bytes_be(bytes: &[u8]) -> Coins {
        Coins(BigUint::from_bytes_be(bytes))
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl Add for Coins {
    type Output = Coins;

    fn add(self, rhs: Coins) -> Coins {
        Coins(self.0 + rhs.0)
    }
}

impl Add<&Coins> for &Coins {
    type Output = Coins;

    fn add(self, rhs: &Coins) -> Coins {
        Coins(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Coins> for Coins {
    fn add_assign(&mut self, rhs: &Coins) {
        self.0 += &rhs.0;
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} CER", self.to_decimal_string())
    }
}

impl fmt::Debug for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coins({})", self.0)
    }
}

impl Serialize for Coins {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_wei_string())
        } else {
            serializer.serialize_bytes(&self.to_bytes_le())
        }
    }
}

impl<'de> Deserialize<'de> for Coins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        use serde::de::Error as _;
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Coins::from_wei_str(&s).map_err(D::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Ok(Coins::from_bytes_le(&bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional() {
        assert_eq!(Coins::from_decimal_str("10").unwrap(), Coins::whole(10));
        let v = Coins::from_decimal_str("3.25").unwrap();
        assert_eq!(v.to_wei_string(), "3250000000000000000");
        assert_eq!(v.to_decimal_string(), "3.25");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Coins::from_decimal_str("-1").is_err());
        assert!(Coins::from_decimal_str("").is_err());
        assert!(Coins::from_decimal_str("1.2.3").is_err());
        assert!(Coins::from_decimal_str("1,5").is_err());
        assert!(Coins::from_decimal_str("0.0000000000000000001").is_err());
    }

    #[test]
    fn float_path_matches_decimal_path() {
        // The §8 round-trip property: the float's decimal form is canonical.
        for x in [0.000001f64, 3.25, 10.0, 0.5, 1e-7] {
            let via_float = Coins::from_float(x).unwrap();
            let via_string = Coins::from_decimal_str(&format!("{x}")).unwrap();
            assert_eq!(via_float, via_string);
            assert_eq!(
                Coins::from_decimal_str(&via_float.to_decimal_string()).unwrap(),
                via_float
            );
        }
    }

    #[test]
    fn fee_fixed_point() {
        let gas = Coins::from_decimal_str("0.000001").unwrap();
        let price = Coins::whole(1);
        assert_eq!(gas.scale_mul(&price), gas);
        let half_price = Coins::from_decimal_str("0.5").unwrap();
        assert_eq!(
            gas.scale_mul(&half_price),
            Coins::from_decimal_str("0.0000005").unwrap()
        );
    }

    #[test]
    fn checked_sub_underflow() {
        let a = Coins::whole(1);
        let b = Coins::whole(2);
        assert!(a.checked_sub(&b).is_none());
        assert_eq!(b.checked_sub(&a).unwrap(), Coins::whole(1));
    }

    #[test]
    fn le_bytes_round_trip() {
        let v = Coins::from_decimal_str("123456.789").unwrap();
        assert_eq!(Coins::from_bytes_le(&v.to_bytes_le()), v);
    }
}

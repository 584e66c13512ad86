//! 32-byte account addresses with a case-encoded checksum display.
//!
//! An address is derived from the hash of an ECDSA public key (see
//! [`crate::keys::address_of`]).  The display form is `0x` plus 64 hex
//! characters where the case of each alphabetic character encodes a
//! checksum: a BLAKE2b-256 digest of the address's first four bytes is
//! computed, and the character at position *i* is uppercased when the
//! *i*-th nibble of that digest exceeds 7.  Parsing accepts any case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::hash::Hash;

/// Fixed 32-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 32]);

/// The well-known faucet source address.
pub const FAUCET_ADDRESS: Address = Address({
    let mut b = [0xfau8; 32];
    b[31] = 0x0a;
    b
});

impl Address {
    pub const LEN: usize = 32;

    /// The all-zero address, used as the coinbase sender.
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Address> {
        if bytes.len() != Self::LEN {
            return Err(Error::BadInput(format!(
                "address must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut a = [0u8; 32];
        a.copy_from_slice(bytes);
        Ok(Address(a))
    }

    /// `0x`-prefixed hex with the case-encoded checksum.
    pub fn checksum_string(&self) -> String {
        let plain = hex::encode(self.0);
        let digest = Hash::digest(&self.0[..4]);
        let mut out = String::with_capacity(66);
        out.push_str("0x");
        for (i, ch) in plain.chars().enumerate() {
            let byte = digest.0[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if ch.is_ascii_alphabetic() && nibble > 7 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Parses `0x`-prefixed or bare hex of either case.
    pub fn from_hex(s: &str) -> Result<Address> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(s.to_ascii_lowercase()).map_err(|e| Error::BadInput(format!("invalid hex: {e}")))?;
        Address::from_slice(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.checksum_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.checksum_string())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Address> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.checksum_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        use serde::de::Error as _;
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::from_hex(&s).map_err(D::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Address::from_slice(&bytes).map_err(D::Error::custom)
        }
    }
}

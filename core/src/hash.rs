//! 32-byte hashes and the BLAKE2b helpers used across the node.
//!
//! Every identifier in the system — block hashes, transaction hashes, key
//! hashes — is a [`Hash`]: 32 bytes, compared bytewise, rendered as a
//! `0x…` hex string.  The all-zero value is the *empty hash* used for
//! genesis linkage and unset roots.
//!
//! Three digest helpers live here:
//!
//! * [`Hash::digest`] — BLAKE2b-256 of a byte slice, the hash of record for
//!   blocks, transactions and passphrases.
//! * [`blake2b_512`] — the wide digest used by address derivation.
//! * [`keyed_digest`] — the keyed BLAKE2b MAC, used to derive the vault's
//!   cipher key from the configured secret.

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::digest::{KeyInit, Mac};
use blake2::{Blake2b, Blake2b512, Blake2bMac, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// BLAKE2b with a 32-byte output.
pub type Blake2b256 = Blake2b<U32>;

/// Fixed 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const LEN: usize = 32;

    /// The all-zero hash.
    pub const EMPTY: Hash = Hash([0u8; 32]);

    /// BLAKE2b-256 digest of `data`.
    pub fn digest(data: &[u8]) -> Hash {
        let out = Blake2b256::digest(data);
        let mut h = [0u8; 32];
        h.copy_from_slice(&out);
        Hash(h)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Hash> {
        if bytes.len() != Self::LEN {
            return Err(Error::BadInput(format!(
                "hash must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut h = [0u8; 32];
        h.copy_from_slice(bytes);
        Ok(Hash(h))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses `0x`-prefixed or bare hex.
    pub fn from_hex(s: &str) -> Result<Hash> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| Error::BadInput(format!("invalid hex: {e}")))?;
        Hash::from_slice(&bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Hash> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        use serde::de::Error as _;
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Hash::from_hex(&s).map_err(D::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Hash::from_slice(&bytes).map_err(D::Error::custom)
        }
    }
}

/// BLAKE2b-512 digest of `data`.
pub fn blake2b_512(data: &[u8]) -> [u8; 64] {
    let out = Blake2b512::digest(data);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&out);
    wide
}

/// Keyed BLAKE2b-256 of `data` under `key` (at most 64 key bytes).
pub fn keyed_digest(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Blake2bMac<U32> as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::Crypto("MAC key too long".into()))?;
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut h = [0u8; 32];
    h.copy_from_slice(&out);
    Ok(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = Hash::digest(b"cerera");
        let b = Hash::digest(b"cerera");
        assert_eq!(a, b);
        assert_ne!(a, Hash::digest(b"cererb"));
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash::digest(b"round trip");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
        assert!(h.to_hex().starts_with("0x"));
    }

    #[test]
    fn empty_hash_is_zero() {
        assert!(Hash::EMPTY.is_empty());
        assert!(!Hash::digest(b"").is_empty());
    }

    #[test]
    fn keyed_digest_differs_by_key() {
        let a = keyed_digest(b"key-a", b"payload").unwrap();
        let b = keyed_digest(b"key-b", b"payload").unwrap();
        assert_ne!(a, b);
    }
}

//! State-account records.
//!
//! An account couples an address to a balance, a monotonically increasing
//! nonce, a storage root, and the *inputs map* — every transaction hash
//! that credited the account together with the credited amount.  The
//! inputs map sits behind a reader-writer lock so gossip delivery and
//! block execution never race; readers always receive value copies.
//!
//! # Binary layout
//!
//! Account records are little-endian, in contrast to the big-endian block
//! headers.  The asymmetry is inherited from stored data and must not be
//! "fixed".  All lengths are `u32`:
//!
//! ```text
//! Type(1) | AddrLen(4) | Addr | Passphrase(32) | BloomLen(4) | Bloom
//!   | Nonce(8) | Root(32) | Status(1) | BalLen(4) | Bal
//!   | InputsCount(4) | { Hash(32) | ValLen(4) | Val } × InputsCount
//! ```
//!
//! Legacy records predate the leading type byte: when the first byte
//! exceeds 4 it is the low byte of `AddrLen` and the type defaults to
//! normal.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::json;

use crate::address::Address;
use crate::coins::Coins;
use crate::error::{Error, Result};
use crate::hash::Hash;

/// Default bloom length in bytes.
pub const BLOOM_LEN: usize = 10;

/// Bounds for the bloom level byte.
const BLOOM_LEVEL_MIN: u8 = 1;
const BLOOM_LEVEL_MAX: u8 = 0x0f;

/// Account lifecycle status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccountStatus {
    New = 0,
    Staked = 1,
    Faucet = 2,
    Node = 3,
    Void = 4,
}

impl AccountStatus {
    pub fn from_byte(b: u8) -> Result<AccountStatus> {
        match b {
            0 => Ok(AccountStatus::New),
            1 => Ok(AccountStatus::Staked),
            2 => Ok(AccountStatus::Faucet),
            3 => Ok(AccountStatus::Node),
            4 => Ok(AccountStatus::Void),
            other => Err(Error::BadInput(format!("unknown account status {other}"))),
        }
    }
}

/// Account type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccountKind {
    Normal = 0,
    Staking = 1,
    Voting = 2,
    Faucet = 3,
    Coinbase = 4,
}

impl AccountKind {
    pub fn from_byte(b: u8) -> Result<AccountKind> {
        match b {
            0 => Ok(AccountKind::Normal),
            1 => Ok(AccountKind::Staking),
            2 => Ok(AccountKind::Voting),
            3 => Ok(AccountKind::Faucet),
            4 => Ok(AccountKind::Coinbase),
            other => Err(Error::BadInput(format!("unknown account type {other}"))),
        }
    }
}

/// The state-account record.
#[derive(Debug)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    /// Storage-trie root.
    pub root: Hash,
    /// Index of the encrypted key blob in the vault.  Runtime linkage
    /// only; not part of the binary layout.
    pub key_hash: Hash,
    pub status: AccountStatus,
    pub kind: AccountKind,
    pub passphrase: [u8; 32],
    pub bloom: Vec<u8>,
    balance: Coins,
    inputs: RwLock<BTreeMap<Hash, Coins>>,
}

impl Account {
    pub fn new(address: Address) -> Account {
        let mut bloom = vec![0u8; BLOOM_LEN];
        bloom[1] = BLOOM_LEVEL_MIN;
        Account {
            address,
            nonce: 0,
            root: Hash::EMPTY,
            key_hash: Hash::EMPTY,
            status: AccountStatus::New,
            kind: AccountKind::Normal,
            passphrase: [0u8; 32],
            bloom,
            balance: Coins::zero(),
            inputs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_kind(mut self, kind: AccountKind) -> Account {
        self.kind = kind;
        self
    }

    pub fn balance(&self) -> Coins {
        self.balance.clone()
    }

    /// Adds `amount` and records the crediting transaction in the inputs
    /// map.
    pub fn credit(&mut self, amount: &Coins, tx_hash: Hash) {
        self.balance += amount;
        self.inputs.write().insert(tx_hash, amount.clone());
    }

    /// Subtracts `amount`; the balance never goes negative.
    pub fn debit(&mut self, amount: &Coins) -> Result<()> {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                Ok(())
            }
            None => Err(Error::InsufficientFunds),
        }
    }

    /// Copy of the recorded input amount for `tx_hash`.
    pub fn input(&self, tx_hash: &Hash) -> Option<Coins> {
        self.inputs.read().get(tx_hash).cloned()
    }

    /// Snapshot of the whole inputs map.
    pub fn inputs_snapshot(&self) -> BTreeMap<Hash, Coins> {
        self.inputs.read().clone()
    }

    /// Algebraic sum of all recorded inputs.
    pub fn input_sum(&self) -> Coins {
        let guard = self.inputs.read();
        let mut sum = Coins::zero();
        for v in guard.values() {
            sum += v;
        }
        sum
    }

    /// Raises the bloom level, saturating into the overflow byte.
    pub fn bloom_up(&mut self) {
        if self.bloom.len() < 3 {
            return;
        }
        if self.bloom[1] < BLOOM_LEVEL_MAX {
            self.bloom[1] += 1;
        } else {
            self.bloom[2] = BLOOM_LEVEL_MAX;
        }
    }

    /// Lowers the bloom level, saturating into the overflow byte.
    pub fn bloom_down(&mut self) {
        if self.bloom.len() < 3 {
            return;
        }
        if self.bloom[1] > BLOOM_LEVEL_MIN {
            self.bloom[1] -= 1;
        } else {
            self.bloom[2] = BLOOM_LEVEL_MAX;
        }
    }

    /// Canonical little-endian record.
    pub fn encode(&self) -> Vec<u8> {
        let bal = self.balance.to_bytes_le();
        let inputs = self.inputs.read();
        let mut buf = Vec::with_capacity(128 + self.bloom.len() + bal.len() + inputs.len() * 48);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(Address::LEN as u32).to_le_bytes());
        buf.extend_from_slice(self.address.as_bytes());
        buf.extend_from_slice(&self.passphrase);
        buf.extend_from_slice(&(self.bloom.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.bloom);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(self.root.as_bytes());
        buf.push(self.status as u8);
        buf.extend_from_slice(&(bal.len() as u32).to_le_bytes());
        buf.extend_from_slice(&bal);
        buf.extend_from_slice(&(inputs.len() as u32).to_le_bytes());
        for (hash, value) in inputs.iter() {
            buf.extend_from_slice(hash.as_bytes());
            let v = value.to_bytes_le();
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            buf.extend_from_slice(&v);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Account> {
        let mut r = Reader::new(bytes);
        let kind = match r.peek()? {
            b if b <= 4 => {
                let b = r.u8()?;
                AccountKind::from_byte(b)?
            }
            // Legacy record without a type byte: the first byte is the low
            // byte of AddrLen.
            _ => AccountKind::Normal,
        };
        let addr_len = r.u32_le()? as usize;
        let address = Address::from_slice(r.take(addr_len)?)?;
        let mut passphrase = [0u8; 32];
        passphrase.copy_from_slice(r.take(32)?);
        let bloom_len = r.u32_le()? as usize;
        let bloom = r.take(bloom_len)?.to_vec();
        let nonce = r.u64_le()?;
        let root = Hash::from_slice(r.take(32)?)?;
        let status = AccountStatus::from_byte(r.u8()?)?;
        let bal_len = r.u32_le()? as usize;
        let balance = Coins::from_bytes_le(r.take(bal_len)?);
        let count = r.u32_le()? as usize;
        let mut inputs = BTreeMap::new();
        for _ in 0..count {
            let hash = Hash::from_slice(r.take(32)?)?;
            let val_len = r.u32_le()? as usize;
            let value = Coins::from_bytes_le(r.take(val_len)?);
            inputs.insert(hash, value);
        }
        Ok(Account {
            address,
            nonce,
            root,
            key_hash: Hash::EMPTY,
            status,
            kind,
            passphrase,
            bloom,
            balance,
            inputs: RwLock::new(inputs),
        })
    }

    /// JSON form.  The balance is deliberately absent.
    pub fn to_json(&self) -> serde_json::Value {
        let inputs: serde_json::Map<String, serde_json::Value> = self
            .inputs
            .read()
            .iter()
            .map(|(h, v)| (h.to_hex(), json!(v.to_wei_string())))
            .collect();
        json!({
            "address": self.address.checksum_string(),
            "nonce": self.nonce,
            "root": self.root.to_hex(),
            "status": self.status as u8,
            "type": self.kind as u8,
            "bloom": format!("0x{}", hex::encode(&self.bloom)),
            "inputs": inputs,
        })
    }
}

impl Clone for Account {
    fn clone(&self) -> Account {
        Account {
            address: self.address,
            nonce: self.nonce,
            root: self.root,
            key_hash: self.key_hash,
            status: self.status,
            kind: self.kind,
            passphrase: self.passphrase,
            bloom: self.bloom.clone(),
            balance: self.balance.clone(),
            inputs: RwLock::new(self.inputs.read().clone()),
        }
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Account) -> bool {
        self.address == other.address
            && self.nonce == other.nonce
            && self.root == other.root
            && self.status == other.status
            && self.kind == other.kind
            && self.passphrase == other.passphrase
            && self.bloom == other.bloom
            && self.balance == other.balance
            && *self.inputs.read() == *other.inputs.read()
    }
}

/// Little-endian cursor over an account record.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    fn peek(&self) -> Result<u8> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::BadInput("truncated account record".into()))
    }

    fn u8(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::BadInput("truncated account record".into()));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u32_le(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let s = self.take(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(s);
        Ok(u64::from_le_bytes(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Account {
        let mut acc = Account::new(Address([7u8; 32]));
        acc.nonce = 3;
        acc.status = AccountStatus::Staked;
        acc.credit(&Coins::whole(10), Hash::digest(b"tx-1"));
        acc.credit(&Coins::from_decimal_str("0.5").unwrap(), Hash::digest(b"tx-2"));
        acc.credit(&Coins::from_decimal_str("2.25").unwrap(), Hash::digest(b"tx-3"));
        acc
    }

    #[test]
    fn binary_round_trip_is_byte_identical() {
        let acc = sample();
        let bytes = acc.encode();
        let decoded = Account::decode(&bytes).unwrap();
        assert_eq!(decoded, acc);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn legacy_record_without_type_byte() {
        let acc = sample();
        // Strip the leading type byte; AddrLen's low byte (32) now leads.
        let bytes = acc.encode()[1..].to_vec();
        let decoded = Account::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, AccountKind::Normal);
        assert_eq!(decoded.address, acc.address);
        assert_eq!(decoded.balance(), acc.balance());
    }

    #[test]
    fn bloom_saturates() {
        let mut acc = Account::new(Address([1u8; 32]));
        for _ in 0..20 {
            acc.bloom_up();
        }
        assert_eq!(acc.bloom[1], 0x0f);
        assert_eq!(acc.bloom[2], 0x0f);
        let mut acc = Account::new(Address([1u8; 32]));
        acc.bloom_down();
        assert_eq!(acc.bloom[1], 1);
        assert_eq!(acc.bloom[2], 0x0f);
    }

    #[test]
    fn debit_underflow_is_rejected() {
        let mut acc = Account::new(Address([2u8; 32]));
        acc.credit(&Coins::whole(1), Hash::digest(b"tx"));
        assert_eq!(acc.debit(&Coins::whole(2)), Err(Error::InsufficientFunds));
        assert_eq!(acc.balance(), Coins::whole(1));
        acc.debit(&Coins::whole(1)).unwrap();
        assert!(acc.balance().is_zero());
    }

    #[test]
    fn input_sum_tracks_credits() {
        let acc = sample();
        assert_eq!(
            acc.input_sum(),
            Coins::from_decimal_str("12.75").unwrap()
        );
        assert_eq!(
            acc.input(&Hash::digest(b"tx-2")).unwrap(),
            Coins::from_decimal_str("0.5").unwrap()
        );
    }

    #[test]
    fn json_omits_balance() {
        let acc = sample();
        let v = acc.to_json();
        assert!(v.get("balance").is_none());
        assert_eq!(v["nonce"], 3);
    }
}

//! Typed transactions: legacy transfer, faucet credit, coinbase reward.
//!
//! The canonical hash is BLAKE2b-256 over the tag-prefixed inner payload
//! in a fixed field order — the signature and the miner-written per-block
//! nonce are excluded, so the nonce search never invalidates a signature.
//! The full wire encoding appends sender, per-block nonce and signature to
//! the signed payload.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::address::{Address, FAUCET_ADDRESS};
use crate::coins::Coins;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::keys::TxSignature;

/// Default routing tag carried by every transaction.
pub const DEFAULT_DNA: [u8; 2] = [0xce, 0x11];

/// Transaction variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxKind {
    Legacy = 0,
    Faucet = 1,
    Coinbase = 2,
}

impl TxKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(b: u8) -> Result<TxKind> {
        match b {
            0 => Ok(TxKind::Legacy),
            1 => Ok(TxKind::Faucet),
            2 => Ok(TxKind::Coinbase),
            other => Err(Error::BadInput(format!("unknown transaction tag {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TxKind,
    pub nonce: u64,
    pub from: Address,
    pub to: Address,
    pub value: Coins,
    /// Float-coded gas, stored ×10¹⁸.
    pub gas: Coins,
    pub gas_price: Coins,
    pub data: Vec<u8>,
    pub dna: Vec<u8>,
    /// Millisecond timestamp.
    pub time: u64,
    /// Miner-written copy of the header nonce.  Not covered by the
    /// canonical hash.
    pub block_nonce: u64,
    pub signature: Option<TxSignature>,
}

impl Transaction {
    pub fn new_legacy(
        nonce: u64,
        to: Address,
        value: Coins,
        gas: Coins,
        gas_price: Coins,
        data: Vec<u8>,
        time: u64,
    ) -> Transaction {
        Transaction {
            kind: TxKind::Legacy,
            nonce,
            from: Address::ZERO,
            to,
            value,
            gas,
            gas_price,
            data,
            dna: DEFAULT_DNA.to_vec(),
            time,
            block_nonce: 0,
            signature: None,
        }
    }

    /// The reward transaction appended last to every mined block.
    pub fn coinbase(proposer: Address, reward: Coins, time: u64) -> Transaction {
        Transaction {
            kind: TxKind::Coinbase,
            nonce: 0,
            from: Address::ZERO,
            to: proposer,
            value: reward,
            gas: Coins::zero(),
            gas_price: Coins::zero(),
            data: Vec::new(),
            dna: DEFAULT_DNA.to_vec(),
            time,
            block_nonce: 0,
            signature: None,
        }
    }

    /// Administrative credit without a sender debit.
    pub fn faucet(to: Address, amount: Coins, time: u64) -> Transaction {
        Transaction {
            kind: TxKind::Faucet,
            nonce: 0,
            from: FAUCET_ADDRESS,
            to,
            value: amount,
            gas: Coins::zero(),
            gas_price: Coins::zero(),
            data: Vec::new(),
            dna: DEFAULT_DNA.to_vec(),
            time,
            block_nonce: 0,
            signature: None,
        }
    }

    /// Coinbase and faucet transactions bypass the gas budget and the
    /// gas-price floor.
    pub fn is_reward(&self) -> bool {
        !matches!(self.kind, TxKind::Legacy)
    }

    /// The signed payload: variant tag, common fields, dna, timestamp,
    /// data.  Field order is fixed; multi-byte integers are big-endian.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.data.len());
        buf.push(self.kind.tag());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(self.to.as_bytes());
        put_chunk_be(&mut buf, &self.value.to_bytes_be());
        put_chunk_be(&mut buf, &self.gas.to_bytes_be());
        put_chunk_be(&mut buf, &self.gas_price.to_bytes_be());
        put_chunk_be(&mut buf, &self.dna);
        buf.extend_from_slice(&self.time.to_be_bytes());
        put_chunk_be(&mut buf, &self.data);
        buf
    }

    /// Canonical transaction hash.
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.signing_bytes())
    }

    /// Total charge to the sender: `value + gas·gasPrice/10¹⁸`.
    pub fn cost(&self) -> Coins {
        &self.value + &self.gas.scale_mul(&self.gas_price)
    }

    /// Wire size in bytes; the unit of the mempool byte budget.
    pub fn size(&self) -> usize {
        self.encode().len()
    }

    /// Full wire encoding: signed payload plus sender, per-block nonce
    /// and signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.signing_bytes();
        buf.extend_from_slice(self.from.as_bytes());
        buf.extend_from_slice(&self.block_nonce.to_be_bytes());
        match &self.signature {
            Some(sig) => {
                buf.push(1);
                buf.extend_from_slice(&sig.r);
                buf.extend_from_slice(&sig.s);
                buf.extend_from_slice(&sig.x);
                buf.extend_from_slice(&sig.y);
            }
            None => buf.push(0),
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Transaction> {
        let mut r = TxReader { bytes, pos: 0 };
        let kind = TxKind::from_tag(r.u8()?)?;
        let nonce = r.u64_be()?;
        let to = Address::from_slice(r.take(32)?)?;
        let value = Coins::from_bytes_be(r.chunk()?);
        let gas = Coins::from_bytes_be(r.chunk()?);
        let gas_price = Coins::from_bytes_be(r.chunk()?);
        let dna = r.chunk()?.to_vec();
        let time = r.u64_be()?;
        let data = r.chunk()?.to_vec();
        let from = Address::from_slice(r.take(32)?)?;
        let block_nonce = r.u64_be()?;
        let signature = match r.u8()? {
            0 => None,
            1 => {
                let mut sig = TxSignature {
                    r: [0u8; 32],
                    s: [0u8; 32],
                    x: [0u8; 32],
                    y: [0u8; 32],
                };
                sig.r.copy_from_slice(r.take(32)?);
                sig.s.copy_from_slice(r.take(32)?);
                sig.x.copy_from_slice(r.take(32)?);
                sig.y.copy_from_slice(r.take(32)?);
                Some(sig)
            }
            other => {
                return Err(Error::BadInput(format!(
                    "unknown signature flag {other}"
                )))
            }
        };
        Ok(Transaction {
            kind,
            nonce,
            from,
            to,
            value,
            gas,
            gas_price,
            data,
            dna,
            time,
            block_nonce,
            signature,
        })
    }

    /// The unified JSON form: `value`/`gasPrice` as decimal strings,
    /// `data` and hashes as `0x…` hex, `gas` and `nonce` as numbers.
    pub fn to_json(&self) -> serde_json::Value {
        let mut v = json!({
            "type": self.kind.tag(),
            "hash": self.hash().to_hex(),
            "from": self.from.checksum_string(),
            "to": self.to.checksum_string(),
            "value": self.value.to_wei_string(),
            "gas": self.gas.as_float(),
            "gasPrice": self.gas_price.to_wei_string(),
            "nonce": self.nonce,
            "data": format!("0x{}", hex::encode(&self.data)),
            "dna": format!("0x{}", hex::encode(&self.dna)),
            "time": self.time,
        });
        if let Some(sig) = &self.signature {
            v["signature"] = json!({
                "r": format!("0x{}", hex::encode(sig.r)),
                "s": format!("0x{}", hex::encode(sig.s)),
                "x": format!("0x{}", hex::encode(sig.x)),
                "y": format!("0x{}", hex::encode(sig.y)),
            });
        }
        v
    }
}

fn put_chunk_be(buf: &mut Vec<u8>, chunk: &[u8]) {
    buf.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
    buf.extend_from_slice(chunk);
}

struct TxReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TxReader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let b = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::BadInput("truncated transaction".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::BadInput("truncated transaction".into()));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u32_be(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn u64_be(&mut self) -> Result<u64> {
        let s = self.take(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(s);
        Ok(u64::from_be_bytes(b))
    }

    fn chunk(&mut self) -> Result<&'a [u8]> {
        let len = self.u32_be()? as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    fn sample() -> Transaction {
        Transaction::new_legacy(
            1,
            Address([9u8; 32]),
            Coins::from_decimal_str("3.25").unwrap(),
            Coins::from_decimal_str("0.000001").unwrap(),
            Coins::whole(1),
            b"hello".to_vec(),
            1_656_028_800_123,
        )
    }

    #[test]
    fn hash_ignores_signature_and_block_nonce() {
        let mut tx = sample();
        let before = tx.hash();
        tx.block_nonce = 42;
        let key = keys::generate();
        tx.signature = Some(keys::sign_digest(&key, &before).unwrap());
        assert_eq!(tx.hash(), before);
    }

    #[test]
    fn hash_covers_every_signed_field() {
        let base = sample();
        let mut changed = base.clone();
        changed.value = Coins::whole(4);
        assert_ne!(base.hash(), changed.hash());
        let mut changed = base.clone();
        changed.dna = vec![0x00];
        assert_ne!(base.hash(), changed.hash());
        let mut changed = base.clone();
        changed.time += 1;
        assert_ne!(base.hash(), changed.hash());
    }

    #[test]
    fn wire_round_trip() {
        let mut tx = sample();
        let key = keys::generate();
        tx.from = keys::address_of(&p256::ecdsa::VerifyingKey::from(&key));
        tx.signature = Some(keys::sign_digest(&key, &tx.hash()).unwrap());
        tx.block_nonce = 7;
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn cost_is_value_plus_fee() {
        let tx = sample();
        let expected = Coins::from_decimal_str("3.250001").unwrap();
        assert_eq!(tx.cost(), expected);
    }

    #[test]
    fn json_shape() {
        let tx = sample();
        let v = tx.to_json();
        assert_eq!(v["value"], "3250000000000000000");
        assert!(v["data"].as_str().unwrap().starts_with("0x"));
        assert_eq!(v["nonce"], 1);
        assert!(v["gas"].is_number());
    }

    #[test]
    fn reward_variants() {
        assert!(Transaction::coinbase(Address([1; 32]), Coins::whole(5), 0).is_reward());
        assert!(Transaction::faucet(Address([1; 32]), Coins::whole(5), 0).is_reward());
        assert!(!sample().is_reward());
        assert_eq!(
            Transaction::faucet(Address([1; 32]), Coins::whole(5), 0).from,
            FAUCET_ADDRESS
        );
    }
}

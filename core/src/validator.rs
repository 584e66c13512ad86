//! The validator: rule enforcement for transactions and blocks, and the
//! single entry point through which state transitions reach the vault.
//!
//! Transaction admission (`send`) runs the full stateful rule set before a
//! transaction may enter the pool.  Block acceptance (`propose_block`)
//! serializes every append — locally mined or externally received —
//! through one gate, re-validates the header and signatures, executes the
//! transactions in block order and only then commits to the chain and
//! cleans the pool.  Nonce and balance rules are enforced again during
//! execution, where intra-block credits are visible.

use std::sync::Arc;

use p256::ecdsa::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use serde_json::Value;

use crate::address::Address;
use crate::block::{Block, Header};
use crate::chain::Chain;
use crate::coins::Coins;
use crate::config::Config;
use crate::error::{BlockRule, Error, Result, TxRule};
use crate::hash::Hash;
use crate::keys;
use crate::mempool::Mempool;
use crate::now_ms;
use crate::pow;
use crate::transaction::{Transaction, TxKind};
use crate::vault::Vault;

/// Gas price attached to transactions built on a caller's behalf: 1 CER
/// per 10¹⁸ gas, so the fee equals the float-coded gas amount.
pub fn default_gas_price() -> Coins {
    Coins::whole(1)
}

/// Parameters of `transaction.send`, either the structured record or the
/// legacy positional form `[key, nonce, to, amount, gas, msg?]`.
#[derive(Debug, Clone)]
pub struct SendParams {
    /// Hash of the caller's public key; the vault's key-blob index.
    pub key: Hash,
    pub nonce: u64,
    pub to: Address,
    pub amount: String,
    pub gas: f64,
    pub msg: Option<String>,
}

impl SendParams {
    pub fn from_value(v: &Value) -> Result<SendParams> {
        match v {
            Value::Object(map) => {
                let key = map
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadInput("missing key".into()))?;
                let nonce = map
                    .get("nonce")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::BadInput("missing nonce".into()))?;
                let to = map
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadInput("missing to".into()))?;
                let amount = match map.get("amount") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return Err(Error::BadInput("missing amount".into())),
                };
                let gas = map
                    .get("gas")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| Error::BadInput("missing gas".into()))?;
                let msg = map.get("msg").and_then(Value::as_str).map(str::to_owned);
                Ok(SendParams {
                    key: Hash::from_hex(key)?,
                    nonce,
                    to: Address::from_hex(to)?,
                    amount,
                    gas,
                    msg,
                })
            }
            Value::Array(items) if items.len() >= 5 => {
                let obj = serde_json::json!({
                    "key": items[0].clone(),
                    "nonce": items[1].clone(),
                    "to": items[2].clone(),
                    "amount": items[3].clone(),
                    "gas": items[4].clone(),
                    "msg": items.get(5).cloned().unwrap_or(Value::Null),
                });
                SendParams::from_value(&obj)
            }
            _ => Err(Error::BadInput("malformed send parameters".into())),
        }
    }
}

pub struct Validator {
    chain: Arc<Chain>,
    vault: Arc<Vault>,
    mempool: Arc<Mempool>,
    min_gas: Coins,
    /// Serializes every append, mined or external.
    propose_gate: Mutex<()>,
}

impl Validator {
    pub fn new(
        chain: Arc<Chain>,
        vault: Arc<Vault>,
        mempool: Arc<Mempool>,
        config: &Config,
    ) -> Validator {
        Validator {
            chain,
            vault,
            mempool,
            min_gas: config.min_gas.clone(),
            propose_gate: Mutex::new(()),
        }
    }

    /// Builds an unsigned legacy transfer.  The amount is parsed from its
    /// decimal string; gas must be finite and nonnegative.
    pub fn create_transaction(
        &self,
        nonce: u64,
        to: Address,
        amount: &str,
        gas: f64,
        msg: Option<&str>,
    ) -> Result<Transaction> {
        if !gas.is_finite() || gas < 0.0 {
            return Err(Error::BadInput("negative gas".into()));
        }
        let value = Coins::from_decimal_str(amount)?;
        let gas = Coins::from_float(gas)?;
        Ok(Transaction::new_legacy(
            nonce,
            to,
            value,
            gas,
            default_gas_price(),
            msg.map(|m| m.as_bytes().to_vec()).unwrap_or_default(),
            now_ms(),
        ))
    }

    /// Signs `tx` with a PEM-encoded private key, stamping the sender
    /// address and the full signature blob.
    pub fn sign_raw(&self, tx: &mut Transaction, pem: &str) -> Result<()> {
        let key = keys::from_pem(pem)?;
        sign_with_key(tx, &key)
    }

    /// `transaction.send`: construct, sign with the caller's vault key,
    /// validate and queue.  Returns the transaction hash.
    pub fn send(&self, params: &Value) -> Result<Hash> {
        let p = SendParams::from_value(params)?;
        let key = self.vault.private_key_for(&p.key)?;
        let mut tx = self.create_transaction(p.nonce, p.to, &p.amount, p.gas, p.msg.as_deref())?;
        sign_with_key(&mut tx, &key)?;
        self.validate_tx(&tx)?;
        self.mempool.queue(tx)
    }

    /// `account.faucet`: administrative credit, no sender debit.
    pub fn faucet(&self, to: Address, amount: &str) -> Result<Hash> {
        let value = Coins::from_decimal_str(amount)?;
        self.mempool.queue(Transaction::faucet(to, value, now_ms()))
    }

    /// The full stateful transaction rule set.  Reward transactions are
    /// validated structurally by block assembly and pass here.
    pub fn validate_tx(&self, tx: &Transaction) -> Result<()> {
        if tx.is_reward() {
            return Ok(());
        }
        let sig = tx
            .signature
            .as_ref()
            .ok_or(Error::InvalidTx(TxRule::SignatureMismatch))?;
        keys::verify_digest(sig, &tx.hash())?;
        if keys::recover_address(sig)? != tx.from {
            return Err(Error::InvalidTx(TxRule::SignatureMismatch));
        }
        let sender = self.vault.get(&tx.from).ok_or(Error::NotFound)?;
        if tx.nonce != sender.nonce + 1 {
            return Err(Error::InvalidTx(TxRule::NonceOutOfOrder));
        }
        if !tx.gas_price.is_zero() && tx.gas_price < self.min_gas {
            return Err(Error::GasTooLow);
        }
        if sender.balance() < tx.cost() {
            return Err(Error::InsufficientFunds);
        }
        Ok(())
    }

    /// Header and signature rules for a candidate block.  Stateful nonce
    /// and balance rules run again during execution, where intra-block
    /// credits are visible.
    pub fn validate_block(&self, block: &Block) -> Result<()> {
        let header = &block.header;
        let tip = self.chain.latest();
        if header.chain_id != self.chain.chain_id() {
            return Err(Error::InvalidBlock(BlockRule::ChainIdMismatch));
        }
        if header.height != tip.header.height + 1 {
            return Err(Error::InvalidBlock(BlockRule::HeightGap));
        }
        if header.prev_hash != tip.hash() {
            return Err(Error::InvalidBlock(BlockRule::PrevHashMismatch));
        }
        if header.timestamp < tip.header.timestamp {
            return Err(Error::InvalidBlock(BlockRule::TimestampRewind));
        }
        let target = pow::target(header.difficulty)?;
        if !pow::hash_meets_target(&block.hash(), &target) {
            return Err(Error::InvalidBlock(BlockRule::BadPoW));
        }
        for tx in &block.transactions {
            if self.chain.contains_transaction(&tx.hash()) {
                return Err(Error::InvalidTx(TxRule::DuplicateInclusion));
            }
            if tx.is_reward() {
                continue;
            }
            let sig = tx
                .signature
                .as_ref()
                .ok_or(Error::InvalidTx(TxRule::SignatureMismatch))?;
            keys::verify_digest(sig, &tx.hash())?;
            if keys::recover_address(sig)? != tx.from {
                return Err(Error::InvalidTx(TxRule::SignatureMismatch));
            }
        }
        Ok(())
    }

    /// Top-level entry for both miner-built and externally delivered
    /// blocks: validate, execute in block order, append, clean the pool.
    pub fn propose_block(&self, block: Block) -> Result<()> {
        let _gate = self.propose_gate.lock();
        self.validate_block(&block)?;
        for tx in &block.transactions {
            self.execute_transaction(tx, &block.header).map_err(|e| {
                log::error!("validator: execution of {} failed: {e}", tx.hash());
                Error::InvalidBlock(BlockRule::StateExecutionFailed)
            })?;
        }
        let included: Vec<Hash> = block.transactions.iter().map(Transaction::hash).collect();
        self.chain.append(block)?;
        for hash in &included {
            self.mempool.remove(hash);
        }
        Ok(())
    }

    fn execute_transaction(&self, tx: &Transaction, header: &Header) -> Result<()> {
        let hash = tx.hash();
        match tx.kind {
            TxKind::Coinbase => self.vault.credit(&header.node, &tx.value, hash),
            TxKind::Faucet => self.vault.credit(&tx.to, &tx.value, hash),
            TxKind::Legacy => {
                let sender = self.vault.get(&tx.from).ok_or(Error::NotFound)?;
                if tx.nonce != sender.nonce + 1 {
                    return Err(Error::InvalidTx(TxRule::NonceOutOfOrder));
                }
                self.vault.debit(&tx.from, &tx.cost())?;
                self.vault.credit(&tx.to, &tx.value, hash)?;
                self.vault.advance_nonce(&tx.from)?;
                Ok(())
            }
        }
    }
}

/// Stamps the sender address and signature onto `tx`.
pub fn sign_with_key(tx: &mut Transaction, key: &SigningKey) -> Result<()> {
    tx.from = keys::address_of(&VerifyingKey::from(key));
    let digest = tx.hash();
    tx.signature = Some(keys::sign_digest(key, &digest)?);
    Ok(())
}

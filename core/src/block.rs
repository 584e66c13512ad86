//! Blocks and headers with their canonical byte layout.
//!
//! Headers encode big-endian — the opposite of account records.  The
//! asymmetry is inherited from stored data and is a hard compatibility
//! requirement; the widths below are the format constants.
//!
//! ```text
//! Ctx(i32) | Difficulty(u64) | Extra(8) | GasLimit(u64) | GasUsed(u64)
//!   | Height(i64) | Index(u64) | Node(32) | ChainId(i64) | PrevHash(32)
//!   | Root(32) | Size(i64) | Timestamp(u64 ms) | Version(8) | Nonce(u64)
//! ```
//!
//! A serialized block is `Header | TxCount(u32) | TxHash × TxCount |
//! Confirmations(i32)`; the block hash is BLAKE2b-256 over the
//! concatenated transaction hashes followed by the header bytes, so
//! confirmations never perturb the hash.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::hash::{Blake2b256, Hash};
use crate::transaction::Transaction;

use blake2::Digest;

/// Fixed width of an encoded header.
pub const HEADER_LEN: usize = 188;

/// Difficulty of the genesis block; with no retargeting policy it
/// propagates to every descendant.
pub const GENESIS_DIFFICULTY: u64 = 11_111_111;

/// 2022-06-24T00:00:00Z in milliseconds.
pub const GENESIS_TIMESTAMP_MS: u64 = 1_656_028_800_000;

/// Extra bytes stamped into the genesis header.
pub const GENESIS_EXTRA: [u8; 8] = *b"CEREBRUM";

/// Node software version tag carried in every header.
pub const VERSION: [u8; 8] = *b"0.1.0\0\0\0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub ctx: i32,
    pub difficulty: u64,
    pub extra: [u8; 8],
    pub gas_limit: u64,
    pub gas_used: u64,
    pub height: i64,
    pub index: u64,
    /// Address of the proposing node; the coinbase beneficiary.
    pub node: Address,
    pub chain_id: i64,
    pub prev_hash: Hash,
    pub root: Hash,
    /// Length of the serialized block, filled after assembly.
    pub size: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub version: [u8; 8],
    pub nonce: u64,
}

impl Header {
    /// Canonical big-endian layout; exactly [`HEADER_LEN`] bytes.
    pub fn bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut pos = 0;
        let mut put = |chunk: &[u8]| {
            buf[pos..pos + chunk.len()].copy_from_slice(chunk);
            pos += chunk.len();
        };
        put(&self.ctx.to_be_bytes());
        put(&self.difficulty.to_be_bytes());
        put(&self.extra);
        put(&self.gas_limit.to_be_bytes());
        put(&self.gas_used.to_be_bytes());
        put(&self.height.to_be_bytes());
        put(&self.index.to_be_bytes());
        put(self.node.as_bytes());
        put(&self.chain_id.to_be_bytes());
        put(self.prev_hash.as_bytes());
        put(self.root.as_bytes());
        put(&self.size.to_be_bytes());
        put(&self.timestamp.to_be_bytes());
        put(&self.version);
        put(&self.nonce.to_be_bytes());
        debug_assert_eq!(pos, HEADER_LEN);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::BadInput("truncated header".into()));
        }
        fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> &'a [u8] {
            let s = &bytes[*pos..*pos + n];
            *pos += n;
            s
        }
        let p = &mut 0;
        let ctx = i32::from_be_bytes(take(bytes, p, 4).try_into().unwrap());
        let difficulty = u64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let extra: [u8; 8] = take(bytes, p, 8).try_into().unwrap();
        let gas_limit = u64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let gas_used = u64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let height = i64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let index = u64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let node = Address::from_slice(take(bytes, p, 32))?;
        let chain_id = i64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let prev_hash = Hash::from_slice(take(bytes, p, 32))?;
        let root = Hash::from_slice(take(bytes, p, 32))?;
        let size = i64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let timestamp = u64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        let version: [u8; 8] = take(bytes, p, 8).try_into().unwrap();
        let nonce = u64::from_be_bytes(take(bytes, p, 8).try_into().unwrap());
        Ok(Header {
            ctx,
            difficulty,
            extra,
            gas_limit,
            gas_used,
            height,
            index,
            node,
            chain_id,
            prev_hash,
            root,
            size,
            timestamp,
            version,
            nonce,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "ctx": self.ctx,
            "difficulty": self.difficulty,
            "extra": format!("0x{}", hex::encode(self.extra)),
            "gasLimit": self.gas_limit,
            "gasUsed": self.gas_used,
            "height": self.height,
            "index": self.index,
            "node": self.node.checksum_string(),
            "chainId": self.chain_id,
            "prevHash": self.prev_hash.to_hex(),
            "root": self.root.to_hex(),
            "size": self.size,
            "timestamp": self.timestamp,
            "version": format!("0x{}", hex::encode(self.version)),
            "nonce": self.nonce,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub confirmations: i32,
}

/// A block as it appears in persistent storage: transactions reduced to
/// their hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub header: Header,
    pub tx_hashes: Vec<Hash>,
    pub confirmations: i32,
}

impl Block {
    /// Block identifier and proof-of-work input:
    /// `BLAKE2b-256(concat(tx hashes) || header bytes)`.
    pub fn hash(&self) -> Hash {
        let mut hasher = Blake2b256::new();
        for tx in &self.transactions {
            hasher.update(tx.hash().as_bytes());
        }
        hasher.update(self.header.bytes());
        let out = hasher.finalize();
        let mut h = [0u8; 32];
        h.copy_from_slice(&out);
        Hash(h)
    }

    /// Length of [`Block::encode`] output; a fixed function of the
    /// transaction count.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + 4 + self.transactions.len() * Hash::LEN + 4
    }

    /// Stamps `header.size` with the serialized length.  Call once at
    /// assembly, before the nonce search, so the hash input stays fixed.
    pub fn seal_size(&mut self) {
        self.header.size = self.encoded_len() as i64;
    }

    /// Canonical persistent form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.header.bytes());
        buf.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            buf.extend_from_slice(tx.hash().as_bytes());
        }
        buf.extend_from_slice(&self.confirmations.to_be_bytes());
        buf
    }

    /// Decodes the persistent form.  Transaction bodies are not stored in
    /// it, so the result is a [`BlockRecord`].
    pub fn decode(bytes: &[u8]) -> Result<BlockRecord> {
        let header = Header::decode(bytes)?;
        let rest = &bytes[HEADER_LEN..];
        if rest.len() < 4 {
            return Err(Error::BadInput("truncated block".into()));
        }
        let count = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
        let need = count * Hash::LEN + 4;
        let rest = &rest[4..];
        if rest.len() < need {
            return Err(Error::BadInput("truncated block".into()));
        }
        let mut tx_hashes = Vec::with_capacity(count);
        for i in 0..count {
            tx_hashes.push(Hash::from_slice(&rest[i * Hash::LEN..(i + 1) * Hash::LEN])?);
        }
        let confirmations =
            i32::from_be_bytes(rest[count * Hash::LEN..count * Hash::LEN + 4].try_into().unwrap());
        Ok(BlockRecord {
            header,
            tx_hashes,
            confirmations,
        })
    }

    /// The deterministic genesis block for `chain_id`.  Identical across
    /// cold starts by construction: every field is a constant.
    pub fn genesis(chain_id: i64, gas_limit: u64) -> Block {
        let mut block = Block {
            header: Header {
                ctx: 0,
                difficulty: GENESIS_DIFFICULTY,
                extra: GENESIS_EXTRA,
                gas_limit,
                gas_used: 0,
                height: 0,
                index: 0,
                node: Address::ZERO,
                chain_id,
                prev_hash: Hash::EMPTY,
                root: Hash::EMPTY,
                size: 0,
                timestamp: GENESIS_TIMESTAMP_MS,
                version: VERSION,
                nonce: 0,
            },
            transactions: Vec::new(),
            confirmations: 0,
        };
        block.seal_size();
        block
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "hash": self.hash().to_hex(),
            "header": self.header.to_json(),
            "confirmations": self.confirmations,
            "transactions": self
                .transactions
                .iter()
                .map(Transaction::to_json)
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::Coins;

    fn block_with_txs() -> Block {
        let mut block = Block::genesis(11, 1_000_000);
        block.transactions.push(Transaction::faucet(
            Address([3u8; 32]),
            Coins::whole(10),
            GENESIS_TIMESTAMP_MS,
        ));
        block.transactions.push(Transaction::coinbase(
            Address([4u8; 32]),
            Coins::whole(5),
            GENESIS_TIMESTAMP_MS,
        ));
        block.seal_size();
        block
    }

    #[test]
    fn header_layout_width() {
        let block = Block::genesis(11, 1_000_000);
        assert_eq!(block.header.bytes().len(), HEADER_LEN);
        assert_eq!(
            block.header.size as usize,
            HEADER_LEN + 4 + 4,
            "genesis carries no transactions"
        );
    }

    #[test]
    fn header_round_trip() {
        let block = block_with_txs();
        let decoded = Header::decode(&block.header.bytes()).unwrap();
        assert_eq!(decoded, block.header);
    }

    #[test]
    fn block_round_trip_preserves_hash_input() {
        let block = block_with_txs();
        let record = Block::decode(&block.encode()).unwrap();
        assert_eq!(record.header, block.header);
        assert_eq!(
            record.tx_hashes,
            block.transactions.iter().map(|t| t.hash()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn confirmations_do_not_change_hash() {
        let mut block = block_with_txs();
        let before = block.hash();
        block.confirmations = 99;
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn nonce_changes_hash() {
        let mut block = block_with_txs();
        let before = block.hash();
        block.header.nonce += 1;
        assert_ne!(block.hash(), before);
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis(11, 1_000_000);
        let b = Block::genesis(11, 1_000_000);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.header.difficulty, GENESIS_DIFFICULTY);
        assert_eq!(a.header.timestamp, GENESIS_TIMESTAMP_MS);
        assert_ne!(a.hash(), Block::genesis(12, 1_000_000).hash());
    }
}

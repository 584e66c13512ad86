//! Wire messages exchanged between nodes.
//!
//! One logical message per frame.  Blocks travel as their canonical
//! persistent record plus the full transaction bodies, since the record
//! itself carries only transaction hashes; [`WireBlock::into_block`]
//! re-checks that the bodies match the record.

use serde::{Deserialize, Serialize};

use cerera_core::block::BlockRecord;
use cerera_core::{Block, Error, Hash, Header, Result, Transaction};

/// A block in transit: canonical record plus transaction bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBlock {
    pub record: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

impl WireBlock {
    pub fn from_block(block: &Block) -> WireBlock {
        WireBlock {
            record: block.encode(),
            transactions: block
                .transactions
                .iter()
                .map(Transaction::encode)
                .collect(),
        }
    }

    /// Rebuilds the full block, verifying the bodies against the hashes
    /// committed in the record.
    pub fn into_block(self) -> Result<Block> {
        let BlockRecord {
            header,
            tx_hashes,
            confirmations,
        } = Block::decode(&self.record)?;
        if tx_hashes.len() != self.transactions.len() {
            return Err(Error::BadInput("wire block: body count mismatch".into()));
        }
        let mut transactions = Vec::with_capacity(self.transactions.len());
        for (raw, expected) in self.transactions.iter().zip(&tx_hashes) {
            let tx = Transaction::decode(raw)?;
            if tx.hash() != *expected {
                return Err(Error::BadInput("wire block: body hash mismatch".into()));
            }
            transactions.push(tx);
        }
        Ok(Block {
            header,
            transactions,
            confirmations,
        })
    }

    pub fn header(&self) -> Result<Header> {
        Ok(Block::decode(&self.record)?.header)
    }
}

/// One message type per stream exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Opening handshake on every connection.
    Status {
        chain_id: i64,
        height: i64,
        latest: Hash,
    },
    /// Ask for every block above `from_height`.
    SyncRequest { from_height: i64 },
    SyncResponse { blocks: Vec<WireBlock> },
    /// Ask for specific blocks by hash.
    GetBlocks { hashes: Vec<Hash> },
    Blocks { blocks: Vec<WireBlock> },
    NewBlock { block: WireBlock },
    NewTx { tx: Vec<u8> },
    /// Consensus vote; carried, not interpreted by the core.
    Vote { height: i64, hash: Hash },
    Ping { nonce: u64 },
    Pong { nonce: u64 },
}

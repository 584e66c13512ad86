//! The gossip engine: thin glue between the wire layer and the node.
//!
//! Inbound payloads route to the mempool (transactions) and the chain's
//! external-block path (blocks); failures are logged and the message
//! dropped — peer scoring lives outside the core.  Outbound, the engine
//! speaks through the [`Relay`] contract the transport provides:
//! admitted transactions fan out to peers via the pool observer, and
//! every appended block is announced through a chain append observer.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::Block;
use crate::chain::{AppendObserver, Chain};
use crate::error::Result;
use crate::mempool::{Mempool, PoolObserver};
use crate::transaction::Transaction;
use crate::validator::Validator;

/// Outbound broadcast contract implemented by the transport.
pub trait Relay: Send + Sync {
    fn broadcast_block(&self, block: &Block);
    fn broadcast_tx(&self, tx: &Transaction);
}

pub struct Gossip {
    chain: Arc<Chain>,
    validator: Arc<Validator>,
    mempool: Arc<Mempool>,
    relay: RwLock<Option<Arc<dyn Relay>>>,
}

impl Gossip {
    pub fn new(chain: Arc<Chain>, validator: Arc<Validator>, mempool: Arc<Mempool>) -> Gossip {
        Gossip {
            chain,
            validator,
            mempool,
            relay: RwLock::new(None),
        }
    }

    /// Attaches the transport once it exists; messages delivered earlier
    /// are handled without re-broadcast.
    pub fn set_relay(&self, relay: Arc<dyn Relay>) {
        *self.relay.write() = Some(relay);
    }

    /// Routes a block delivered by `peer` into the chain.
    pub fn deliver_block(&self, block: Block, peer: &str) {
        let hash = block.hash();
        match self.chain.receive_external_block(block, &self.validator) {
            Ok(()) => log::info!("gossip: accepted block {hash} from {peer}"),
            Err(e) => log::warn!("gossip: dropped block {hash} from {peer}: {e}"),
        }
    }

    /// Routes a transaction delivered by `peer` into the mempool.
    pub fn deliver_tx(&self, tx: Transaction, peer: &str) {
        let hash = tx.hash();
        match self.mempool.queue(tx) {
            Ok(_) => log::debug!("gossip: queued tx {hash} from {peer}"),
            Err(e) => log::warn!("gossip: dropped tx {hash} from {peer}: {e}"),
        }
    }

    /// Pool observer that fans admitted transactions out to peers.
    pub fn tx_announcer(self: &Arc<Self>) -> Box<dyn PoolObserver> {
        Box::new(TxAnnouncer {
            gossip: Arc::clone(self),
        })
    }

    /// Chain observer that announces every appended block.
    pub fn block_announcer(self: &Arc<Self>) -> Box<dyn AppendObserver> {
        Box::new(BlockAnnouncer {
            gossip: Arc::clone(self),
        })
    }

    fn relay(&self) -> Option<Arc<dyn Relay>> {
        self.relay.read().clone()
    }
}

struct TxAnnouncer {
    gossip: Arc<Gossip>,
}

impl PoolObserver for TxAnnouncer {
    fn transaction_queued(&self, tx: &Arc<Transaction>) -> Result<()> {
        if let Some(relay) = self.gossip.relay() {
            relay.broadcast_tx(tx);
        }
        Ok(())
    }
}

struct BlockAnnouncer {
    gossip: Arc<Gossip>,
}

impl AppendObserver for BlockAnnouncer {
    fn block_appended(&self, block: &Block) {
        if let Some(relay) = self.gossip.relay() {
            relay.broadcast_block(block);
        }
    }
}

//! The chain manager: single source of truth for the canonical block
//! sequence and the height-lock protocol arbitrating between locally
//! mined and externally received candidates.
//!
//! The lock registry holds at most one locked height at a time.  Taking
//! the lock re-arms the single-shot cancel channel; the external-block
//! path signals it so the local miner abandons its candidate.  A receiver
//! obtained before a re-arm observes disconnection instead of a message —
//! the lock has moved, so readers treat both outcomes as cancellation.
//!
//! Append is serialized: preconditions are checked and the block is
//! committed under one write section, so no two blocks can land on the
//! same height.

use std::collections::HashMap;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::block::Block;
use crate::config::Config;
use crate::error::{BlockRule, Error, Result};
use crate::hash::Hash;
use crate::transaction::Transaction;
use crate::validator::Validator;

/// Notified after every successful append, outside the chain locks.
pub trait AppendObserver: Send + Sync {
    fn block_appended(&self, block: &Block);
}

struct ChainInner {
    blocks: Vec<Block>,
    by_hash: HashMap<Hash, usize>,
    /// Minimal transaction → block-height table.
    tx_index: HashMap<Hash, i64>,
}

struct LockState {
    height: Option<i64>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
}

/// Append-only sequence of blocks plus the height-lock registry.
pub struct Chain {
    chain_id: i64,
    inner: RwLock<ChainInner>,
    lock: Mutex<LockState>,
    observers: RwLock<Vec<Box<dyn AppendObserver>>>,
}

impl Chain {
    /// Builds the chain seeded with the deterministic genesis block.
    pub fn new(config: &Config) -> Chain {
        let genesis = Block::genesis(config.chain_id, config.gas_limit);
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash(), 0);
        let (cancel_tx, cancel_rx) = bounded(1);
        Chain {
            chain_id: config.chain_id,
            inner: RwLock::new(ChainInner {
                blocks: vec![genesis],
                by_hash,
                tx_index: HashMap::new(),
            }),
            lock: Mutex::new(LockState {
                height: None,
                cancel_tx,
                cancel_rx,
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn chain_id(&self) -> i64 {
        self.chain_id
    }

    /// The current tip.
    pub fn latest(&self) -> Block {
        self.inner
            .read()
            .blocks
            .last()
            .expect("chain always holds genesis")
            .clone()
    }

    /// Height of the tip; 0 for a fresh chain.
    pub fn height(&self) -> i64 {
        self.latest().header.height
    }

    pub fn by_height(&self, height: i64) -> Option<Block> {
        if height < 0 {
            return None;
        }
        self.inner.read().blocks.get(height as usize).cloned()
    }

    pub fn by_hash(&self, hash: &Hash) -> Option<Block> {
        let inner = self.inner.read();
        inner
            .by_hash
            .get(hash)
            .and_then(|&i| inner.blocks.get(i))
            .cloned()
    }

    /// Looks a transaction up through the tx table.
    pub fn find_transaction(&self, hash: &Hash) -> Option<(Transaction, i64)> {
        let inner = self.inner.read();
        let height = *inner.tx_index.get(hash)?;
        let block = inner.blocks.get(height as usize)?;
        block
            .transactions
            .iter()
            .find(|tx| tx.hash() == *hash)
            .map(|tx| (tx.clone(), height))
    }

    pub fn contains_transaction(&self, hash: &Hash) -> bool {
        self.inner.read().tx_index.contains_key(hash)
    }

    /// Atomically takes the height lock.  Succeeds when no lock exists or
    /// the held lock is for an earlier height; acquiring re-arms the
    /// cancel channel.  Returns `false` when `height` is already locked.
    pub fn try_lock_height(&self, height: i64) -> bool {
        let mut lock = self.lock.lock();
        match lock.height {
            Some(current) if current >= height => false,
            _ => {
                lock.height = Some(height);
                let (tx, rx) = bounded(1);
                lock.cancel_tx = tx;
                lock.cancel_rx = rx;
                true
            }
        }
    }

    pub fn is_height_locked(&self, height: i64) -> bool {
        self.lock.lock().height == Some(height)
    }

    /// Read side of the single-shot cancel channel.  A message or a
    /// disconnect both mean: abandon the current candidate.
    pub fn cancel_channel(&self) -> Receiver<()> {
        self.lock.lock().cancel_rx.clone()
    }

    /// Fires the cancel signal for the currently armed channel.
    pub fn cancel_mining(&self) {
        let _ = self.lock.lock().cancel_tx.try_send(());
    }

    /// Drops the lock if it is held for `height`.
    pub fn release_lock(&self, height: i64) {
        let mut lock = self.lock.lock();
        if lock.height == Some(height) {
            lock.height = None;
        }
    }

    /// Commits a fully validated and executed block.  Preconditions are
    /// re-checked under the write section; on success the height lock is
    /// cleared and observers run.
    pub fn append(&self, block: Block) -> Result<()> {
        let appended = {
            let mut inner = self.inner.write();
            let (tip_height, tip_hash) = {
                let tip = inner.blocks.last().expect("chain always holds genesis");
                (tip.header.height, tip.hash())
            };
            if block.header.chain_id != self.chain_id {
                return Err(Error::InvalidBlock(BlockRule::ChainIdMismatch));
            }
            if block.header.height != tip_height + 1 {
                return Err(Error::InvalidBlock(BlockRule::HeightGap));
            }
            if block.header.prev_hash != tip_hash {
                return Err(Error::InvalidBlock(BlockRule::PrevHashMismatch));
            }
            let idx = inner.blocks.len();
            let height = block.header.height;
            inner.by_hash.insert(block.hash(), idx);
            for tx in &block.transactions {
                inner.tx_index.insert(tx.hash(), height);
            }
            inner.blocks.push(block.clone());
            block
        };
        {
            let mut lock = self.lock.lock();
            lock.height = None;
        }
        log::info!(
            "chain: appended block {} at height {}",
            appended.hash(),
            appended.header.height
        );
        for observer in self.observers.read().iter() {
            observer.block_appended(&appended);
        }
        Ok(())
    }

    /// Entry point for blocks delivered by peers.  The first candidate to
    /// take the height lock wins; the local miner is cancelled before
    /// validation starts, and the lock is released if the block fails.
    pub fn receive_external_block(&self, block: Block, validator: &Validator) -> Result<()> {
        let height = block.header.height;
        if height <= self.height() {
            return Err(Error::InvalidBlock(BlockRule::HeightGap));
        }
        if !self.try_lock_height(height) {
            return Err(Error::InvalidBlock(BlockRule::HeightLocked));
        }
        self.cancel_mining();
        match validator.propose_block(block) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release_lock(height);
                Err(e)
            }
        }
    }

    pub fn register_observer(&self, observer: Box<dyn AppendObserver>) {
        self.observers.write().push(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn chain() -> Chain {
        Chain::new(&ConfigBuilder::new().finish())
    }

    fn child_of(chain: &Chain) -> Block {
        let tip = chain.latest();
        let mut block = tip.clone();
        block.header.height = tip.header.height + 1;
        block.header.index = tip.header.index + 1;
        block.header.prev_hash = tip.hash();
        block.header.timestamp = tip.header.timestamp + 1;
        block.transactions.clear();
        block.seal_size();
        block
    }

    #[test]
    fn starts_at_genesis() {
        let c = chain();
        assert_eq!(c.height(), 0);
        let genesis = c.by_height(0).unwrap();
        assert_eq!(genesis.header.prev_hash, Hash::EMPTY);
        assert_eq!(c.by_hash(&genesis.hash()).unwrap().hash(), genesis.hash());
    }

    #[test]
    fn append_checks_linkage() {
        let c = chain();
        let good = child_of(&c);

        let mut wrong_prev = good.clone();
        wrong_prev.header.prev_hash = Hash::digest(b"elsewhere");
        assert_eq!(
            c.append(wrong_prev),
            Err(Error::InvalidBlock(BlockRule::PrevHashMismatch))
        );

        let mut gap = good.clone();
        gap.header.height += 5;
        assert_eq!(c.append(gap), Err(Error::InvalidBlock(BlockRule::HeightGap)));

        let mut wrong_chain = good.clone();
        wrong_chain.header.chain_id += 1;
        assert_eq!(
            c.append(wrong_chain),
            Err(Error::InvalidBlock(BlockRule::ChainIdMismatch))
        );

        c.append(good).unwrap();
        assert_eq!(c.height(), 1);
    }

    #[test]
    fn lock_is_mutually_exclusive() {
        let c = Arc::new(chain());
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&c);
            let wins = Arc::clone(&wins);
            handles.push(std::thread::spawn(move || {
                if c.try_lock_height(1) {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(c.is_height_locked(1));
    }

    #[test]
    fn later_height_steals_the_lock() {
        let c = chain();
        assert!(c.try_lock_height(1));
        assert!(!c.try_lock_height(1));
        assert!(c.try_lock_height(2));
        assert!(!c.is_height_locked(1));
        assert!(c.is_height_locked(2));
    }

    #[test]
    fn rearm_disconnects_stale_receivers() {
        let c = chain();
        assert!(c.try_lock_height(1));
        let stale = c.cancel_channel();
        assert!(stale.try_recv().is_err()); // empty, still armed
        assert!(c.try_lock_height(2));
        c.cancel_mining();
        // The old receiver sees a disconnect, the new one the signal.
        assert_eq!(
            stale.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        );
        assert_eq!(c.cancel_channel().try_recv(), Ok(()));
    }

    #[test]
    fn append_clears_lock_and_notifies() {
        struct Counter(Arc<AtomicUsize>);
        impl AppendObserver for Counter {
            fn block_appended(&self, _b: &Block) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let c = chain();
        let seen = Arc::new(AtomicUsize::new(0));
        c.register_observer(Box::new(Counter(Arc::clone(&seen))));
        assert!(c.try_lock_height(1));
        c.append(child_of(&c)).unwrap();
        assert!(!c.is_height_locked(1));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tx_index_tracks_inclusion() {
        use crate::address::Address;
        use crate::coins::Coins;

        let c = chain();
        let mut block = child_of(&c);
        let tx = Transaction::faucet(Address([1u8; 32]), Coins::whole(2), 1);
        let hash = tx.hash();
        block.transactions.push(tx);
        block.seal_size();
        c.append(block).unwrap();
        assert!(c.contains_transaction(&hash));
        let (found, height) = c.find_transaction(&hash).unwrap();
        assert_eq!(found.hash(), hash);
        assert_eq!(height, 1);
    }
}

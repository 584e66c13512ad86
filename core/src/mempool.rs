//! The transaction mempool: a bounded, insertion-ordered queue with a
//! synchronous observer fan-out on admission.
//!
//! Admission rejects transactions that would push the pool past its byte
//! budget (`PoolFull`) or whose nonzero gas price undercuts the floor
//! (`GasTooLow` — a zero gas price is the coinbase/faucet sentinel and is
//! always admitted).  Observers receive a reference to the admitted
//! transaction, in admission order, before it can possibly be removed;
//! observer failures are logged and never veto admission.
//!
//! Observers are invoked under the pool lock and must not call back into
//! the pool.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::coins::Coins;
use crate::error::{Error, Result, TxRule};
use crate::hash::Hash;
use crate::transaction::Transaction;

/// Receives every admitted transaction exactly once, in admission order.
pub trait PoolObserver: Send + Sync {
    fn transaction_queued(&self, tx: &Arc<Transaction>) -> Result<()>;
}

struct PoolInner {
    by_hash: HashMap<Hash, Arc<Transaction>>,
    order: VecDeque<Hash>,
    bytes: usize,
}

/// Bounded FIFO-ish pool of admitted, not-yet-included transactions.
pub struct Mempool {
    max_size: usize,
    min_gas: Coins,
    inner: Mutex<PoolInner>,
    observers: RwLock<Vec<Box<dyn PoolObserver>>>,
    entries_gauge: AtomicUsize,
    bytes_gauge: AtomicUsize,
}

impl Mempool {
    pub fn new(max_size: usize, min_gas: Coins) -> Mempool {
        Mempool {
            max_size,
            min_gas,
            inner: Mutex::new(PoolInner {
                by_hash: HashMap::new(),
                order: VecDeque::new(),
                bytes: 0,
            }),
            observers: RwLock::new(Vec::new()),
            entries_gauge: AtomicUsize::new(0),
            bytes_gauge: AtomicUsize::new(0),
        }
    }

    /// Admits a transaction, notifies observers and returns its hash.
    pub fn queue(&self, tx: Transaction) -> Result<Hash> {
        if !tx.gas_price.is_zero() && tx.gas_price < self.min_gas {
            return Err(Error::GasTooLow);
        }
        let hash = tx.hash();
        let size = tx.size();
        let mut inner = self.inner.lock();
        if inner.by_hash.contains_key(&hash) {
            return Err(Error::InvalidTx(TxRule::DuplicateInclusion));
        }
        if inner.bytes + size > self.max_size {
            return Err(Error::PoolFull);
        }
        let tx = Arc::new(tx);
        inner.by_hash.insert(hash, Arc::clone(&tx));
        inner.order.push_back(hash);
        inner.bytes += size;
        self.entries_gauge.store(inner.by_hash.len(), Ordering::Relaxed);
        self.bytes_gauge.store(inner.bytes, Ordering::Relaxed);
        for observer in self.observers.read().iter() {
            if let Err(e) = observer.transaction_queued(&tx) {
                log::warn!("mempool: observer failed on {hash}: {e}");
            }
        }
        Ok(hash)
    }

    /// Snapshot of pending transactions in insertion order.
    pub fn pending(&self) -> Vec<Arc<Transaction>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|h| inner.by_hash.get(h).cloned())
            .collect()
    }

    pub fn get(&self, hash: &Hash) -> Option<Arc<Transaction>> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    /// Removes a transaction; idempotent.
    pub fn remove(&self, hash: &Hash) {
        let mut inner = self.inner.lock();
        if let Some(tx) = inner.by_hash.remove(hash) {
            inner.bytes -= tx.size();
            inner.order.retain(|h| h != hash);
            self.entries_gauge.store(inner.by_hash.len(), Ordering::Relaxed);
            self.bytes_gauge.store(inner.bytes, Ordering::Relaxed);
        }
    }

    /// Subscribes an observer; delivery follows subscription order.
    pub fn register(&self, observer: Box<dyn PoolObserver>) {
        self.observers.write().push(observer);
    }

    /// Pool size in entries.
    pub fn len(&self) -> usize {
        self.entries_gauge.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.bytes_gauge.load(Ordering::Relaxed)
    }
}

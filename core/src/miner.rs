//! The miner: periodic block assembly and an interruptible nonce search.
//!
//! The worker is a dedicated OS thread — the search is CPU-bound — driven
//! by a select over the mining tick, the stop signal, and the wake signal
//! the mempool observer fires on every admission.  During the search the
//! chain's cancel channel and the height lock are consulted every
//! [`CANCEL_CHECK_INTERVAL`] iterations, so an externally delivered block
//! stalls the local candidate within a bounded number of hashes.  A
//! winning nonce is still discarded if the height lock moved while the
//! final hash was being computed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use parking_lot::Mutex;
use serde_json::json;

use crate::address::Address;
use crate::block::{Block, Header, VERSION};
use crate::chain::Chain;
use crate::coins::Coins;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::mempool::{Mempool, PoolObserver};
use crate::now_ms;
use crate::pow;
use crate::transaction::Transaction;
use crate::validator::Validator;

/// Iterations between cancel-channel and height-lock checks.
pub const CANCEL_CHECK_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Stopped,
    Idle,
    Assembling,
    Searching,
    Proposing,
    Cancelled,
}

impl MinerState {
    fn name(self) -> &'static str {
        match self {
            MinerState::Stopped => "stopped",
            MinerState::Idle => "idle",
            MinerState::Assembling => "assembling",
            MinerState::Searching => "searching",
            MinerState::Proposing => "proposing",
            MinerState::Cancelled => "cancelled",
        }
    }
}

/// Lifetime counters of the mining loop.
#[derive(Default)]
pub struct MinerMetrics {
    /// Nonce iterations.
    pub attempts: AtomicU64,
    /// Successful searches.
    pub mined: AtomicU64,
    /// Candidates abandoned on a cancel signal or a lost height lock.
    pub cancelled: AtomicU64,
    /// Mined blocks accepted by the validator.
    pub accepted: AtomicU64,
    /// Mining failures other than cancellation.
    pub errors: AtomicU64,
    /// Cumulative nonce-search wall time.
    pub search_ms: AtomicU64,
}

impl MinerMetrics {
    /// Share of mined candidates that survived validation and append.
    pub fn validation_ratio(&self) -> f64 {
        let mined = self.mined.load(Ordering::Relaxed);
        if mined == 0 {
            return 0.0;
        }
        self.accepted.load(Ordering::Relaxed) as f64 / mined as f64
    }
}

struct MinerWake {
    tx: Sender<()>,
}

impl PoolObserver for MinerWake {
    fn transaction_queued(&self, _tx: &Arc<Transaction>) -> Result<()> {
        // Coalesces: a pending wake is wake enough.
        let _ = self.tx.try_send(());
        Ok(())
    }
}

/// The shared mining context; the spawned thread owns a clone.
#[derive(Clone)]
struct Worker {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    validator: Arc<Validator>,
    node: Address,
    reward: Coins,
    gas_limit: u64,
    interval: Duration,
    state: Arc<Mutex<MinerState>>,
    metrics: Arc<MinerMetrics>,
    /// Shutdown flag observed inside the search loop.  Distinct from the
    /// chain's cancel channel, which only external blocks may fire.
    stopping: Arc<AtomicBool>,
    work_rx: Receiver<()>,
}

pub struct Miner {
    worker: Worker,
    difficulty: u64,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    work_tx: Sender<()>,
}

impl Miner {
    pub fn new(
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        validator: Arc<Validator>,
        node: Address,
        config: &Config,
    ) -> Miner {
        let (work_tx, work_rx) = bounded(1);
        Miner {
            worker: Worker {
                chain,
                mempool,
                validator,
                node,
                reward: config.block_reward.clone(),
                gas_limit: config.gas_limit,
                interval: Duration::from_millis(config.mine_interval_ms),
                state: Arc::new(Mutex::new(MinerState::Stopped)),
                metrics: Arc::new(MinerMetrics::default()),
                stopping: Arc::new(AtomicBool::new(false)),
                work_rx,
            },
            difficulty: config.difficulty,
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
            work_tx,
        }
    }

    /// The observer to register with the mempool; admissions wake the
    /// worker ahead of the next tick.
    pub fn observer(&self) -> Box<dyn PoolObserver> {
        Box::new(MinerWake {
            tx: self.work_tx.clone(),
        })
    }

    pub fn state(&self) -> MinerState {
        *self.worker.state.lock()
    }

    pub fn metrics(&self) -> Arc<MinerMetrics> {
        Arc::clone(&self.worker.metrics)
    }

    pub fn status(&self) -> serde_json::Value {
        let metrics = &self.worker.metrics;
        json!({
            "state": self.state().name(),
            "attempts": metrics.attempts.load(Ordering::Relaxed),
            "mined": metrics.mined.load(Ordering::Relaxed),
            "cancelled": metrics.cancelled.load(Ordering::Relaxed),
            "accepted": metrics.accepted.load(Ordering::Relaxed),
            "errors": metrics.errors.load(Ordering::Relaxed),
            "searchMs": metrics.search_ms.load(Ordering::Relaxed),
            "validationRatio": metrics.validation_ratio(),
        })
    }

    /// Spawns the worker thread.  Fails fast on a zero difficulty; a
    /// second start is a no-op.
    pub fn start(&self) -> Result<()> {
        pow::target(self.difficulty)?;
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        *self.stop_tx.lock() = Some(stop_tx);
        self.worker.stopping.store(false, Ordering::SeqCst);
        *self.worker.state.lock() = MinerState::Idle;
        let worker = self.worker.clone();
        *handle = Some(
            std::thread::Builder::new()
                .name("cerera-miner".into())
                .spawn(move || worker.run(stop_rx))
                .map_err(|e| Error::Persist(format!("spawn miner: {e}")))?,
        );
        log::info!("miner: started for node {}", self.worker.node);
        Ok(())
    }

    /// Stops the worker and joins it; bounded by one tick.
    pub fn stop(&self) {
        self.worker.stopping.store(true, Ordering::SeqCst);
        if let Some(stop) = self.stop_tx.lock().take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        *self.worker.state.lock() = MinerState::Stopped;
        log::info!("miner: stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// One synchronous mining cycle: assemble a candidate, search for a
    /// nonce, propose.  Returns the hash of the accepted block, or
    /// [`Error::MiningCancelled`] when the candidate was abandoned to an
    /// external block.
    pub fn mine_now(&self) -> Result<Hash> {
        self.worker.mine_now()
    }
}

impl Worker {
    fn run(self, stop_rx: Receiver<()>) {
        let ticker = tick(self.interval);
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => self.mine_once(),
                recv(self.work_rx) -> _ => self.mine_once(),
            }
        }
        *self.state.lock() = MinerState::Stopped;
    }

    fn mine_once(&self) {
        match self.mine_now() {
            Ok(_) | Err(Error::MiningCancelled) => {}
            Err(e) => log::error!("miner: cycle failed: {e}"),
        }
        *self.state.lock() = MinerState::Idle;
    }

    fn mine_now(&self) -> Result<Hash> {
        *self.state.lock() = MinerState::Assembling;
        let mut candidate = self.assemble();
        let target_height = candidate.header.height;

        *self.state.lock() = MinerState::Searching;
        let cancel = self.chain.cancel_channel();
        let started = Instant::now();
        let outcome = search_nonce(
            &mut candidate,
            target_height,
            &self.chain,
            &cancel,
            &self.stopping,
            &self.metrics,
        );
        self.metrics
            .search_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                // The lock may have moved while the winning hash was
                // computed; a losing candidate is discarded, not proposed.
                if self.chain.is_height_locked(target_height) {
                    self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                    *self.state.lock() = MinerState::Cancelled;
                    log::info!("miner: height {target_height} locked after search, discarding");
                    Err(Error::MiningCancelled)
                } else {
                    self.metrics.mined.fetch_add(1, Ordering::Relaxed);
                    *self.state.lock() = MinerState::Proposing;
                    let hash = candidate.hash();
                    match self.validator.propose_block(candidate) {
                        Ok(()) => {
                            self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
                            log::info!("miner: block {hash} accepted at height {target_height}");
                            Ok(hash)
                        }
                        Err(e) => {
                            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                            log::error!("miner: proposed block rejected: {e}");
                            Err(e)
                        }
                    }
                }
            }
            Err(Error::MiningCancelled) => {
                self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                *self.state.lock() = MinerState::Cancelled;
                log::info!("miner: candidate at height {target_height} cancelled");
                Err(Error::MiningCancelled)
            }
            Err(e) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Builds the next candidate: pending transactions in pool order under
    /// the gas budget, rewards outside it, coinbase appended last.
    fn assemble(&self) -> Block {
        let tip = self.chain.latest();
        let mut transactions = Vec::new();
        let mut gas_spent = BigUint::from(0u32);
        let budget = BigUint::from(self.gas_limit);
        for tx in self.mempool.pending() {
            if tx.is_reward() {
                transactions.push((*tx).clone());
                continue;
            }
            let next = &gas_spent + tx.gas.as_biguint();
            if next > budget {
                continue;
            }
            gas_spent = next;
            transactions.push((*tx).clone());
        }
        transactions.push(Transaction::coinbase(
            self.node,
            self.reward.clone(),
            now_ms(),
        ));
        let mut block = Block {
            header: Header {
                ctx: 0,
                difficulty: tip.header.difficulty,
                extra: [0u8; 8],
                gas_limit: self.gas_limit,
                gas_used: gas_spent.to_u64().unwrap_or(u64::MAX),
                height: tip.header.height + 1,
                index: tip.header.index + 1,
                node: self.node,
                chain_id: self.chain.chain_id(),
                prev_hash: tip.hash(),
                root: Hash::EMPTY,
                size: 0,
                timestamp: now_ms().max(tip.header.timestamp),
                version: VERSION,
                nonce: 0,
            },
            transactions,
            confirmations: 0,
        };
        block.seal_size();
        block
    }
}

/// The interruptible nonce search.  Increments the header nonce,
/// propagates it into each transaction's per-block nonce field, and
/// re-hashes until the block hash drops below the difficulty target.
/// Every [`CANCEL_CHECK_INTERVAL`] iterations the cancel channel and the
/// height lock are consulted; either aborts with
/// [`Error::MiningCancelled`].
pub fn search_nonce(
    block: &mut Block,
    target_height: i64,
    chain: &Chain,
    cancel: &Receiver<()>,
    abort: &AtomicBool,
    metrics: &MinerMetrics,
) -> Result<()> {
    let target = pow::target(block.header.difficulty)?;
    let mut iterations: u64 = 0;
    loop {
        metrics.attempts.fetch_add(1, Ordering::Relaxed);
        if pow::hash_meets_target(&block.hash(), &target) {
            return Ok(());
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
        for tx in &mut block.transactions {
            tx.block_nonce = block.header.nonce;
        }
        iterations += 1;
        if iterations % CANCEL_CHECK_INTERVAL == 0 {
            match cancel.try_recv() {
                // A disconnect means the lock moved and the channel was
                // re-armed; both outcomes abandon the candidate.
                Ok(()) | Err(TryRecvError::Disconnected) => return Err(Error::MiningCancelled),
                Err(TryRecvError::Empty) => {}
            }
            if chain.is_height_locked(target_height) || abort.load(Ordering::Relaxed) {
                return Err(Error::MiningCancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::transaction::TxKind;
    use crate::vault::Vault;

    fn stack(config: &Config) -> (Arc<Chain>, Arc<Mempool>, Arc<Validator>) {
        let chain = Arc::new(Chain::new(config));
        let vault = Arc::new(Vault::open(config).unwrap());
        let mempool = Arc::new(Mempool::new(config.pool_max_size, config.min_gas.clone()));
        let validator = Arc::new(Validator::new(
            Arc::clone(&chain),
            Arc::clone(&vault),
            Arc::clone(&mempool),
            config,
        ));
        (chain, mempool, validator)
    }

    #[test]
    fn assemble_respects_gas_budget_and_coinbase_is_last() {
        // Budget admits exactly one 0.000001-gas transfer.
        let config = ConfigBuilder::new()
            .difficulty(1)
            .gas_limit(1_000_000_000_000)
            .finish();
        let (chain, mempool, validator) = stack(&config);
        for nonce in 1..=3u64 {
            let tx = Transaction::new_legacy(
                nonce,
                Address([2u8; 32]),
                Coins::whole(1),
                Coins::from_decimal_str("0.000001").unwrap(),
                Coins::whole(1),
                Vec::new(),
                now_ms() + nonce,
            );
            mempool.queue(tx).unwrap();
        }
        let miner = Miner::new(chain, mempool, validator, Address([7u8; 32]), &config);
        let block = miner.worker.assemble();
        // One transfer within budget plus the coinbase.
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions.last().unwrap().kind, TxKind::Coinbase);
        assert_eq!(block.header.gas_used, 1_000_000_000_000);
        assert_eq!(block.header.height, 1);
    }

    #[test]
    fn rewards_bypass_the_budget() {
        let config = ConfigBuilder::new().difficulty(1).gas_limit(0).finish();
        let (chain, mempool, validator) = stack(&config);
        mempool
            .queue(Transaction::faucet(Address([3u8; 32]), Coins::whole(1), now_ms()))
            .unwrap();
        let miner = Miner::new(chain, mempool, validator, Address([7u8; 32]), &config);
        let block = miner.worker.assemble();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].kind, TxKind::Faucet);
    }

    #[test]
    fn search_succeeds_on_loose_target() {
        let config = ConfigBuilder::new().difficulty(2).finish();
        let (chain, mempool, validator) = stack(&config);
        let miner = Miner::new(
            Arc::clone(&chain),
            mempool,
            validator,
            Address([7u8; 32]),
            &config,
        );
        let mut block = miner.worker.assemble();
        block.header.difficulty = 2;
        let cancel = chain.cancel_channel();
        let metrics = MinerMetrics::default();
        let abort = AtomicBool::new(false);
        search_nonce(&mut block, 1, &chain, &cancel, &abort, &metrics).unwrap();
        assert!(pow::block_meets_difficulty(&block).unwrap());
        // The header nonce was propagated into every transaction.
        for tx in &block.transactions {
            assert_eq!(tx.block_nonce, block.header.nonce);
        }
    }

    #[test]
    fn search_aborts_on_external_lock() {
        // A practically unreachable target keeps the search spinning.
        let config = ConfigBuilder::new().difficulty(u64::MAX).finish();
        let (chain, mempool, validator) = stack(&config);
        let miner = Miner::new(
            Arc::clone(&chain),
            mempool,
            validator,
            Address([7u8; 32]),
            &config,
        );
        let mut block = miner.worker.assemble();
        let cancel = chain.cancel_channel();
        let metrics = Arc::new(MinerMetrics::default());
        let worker = {
            let chain = Arc::clone(&chain);
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                let abort = AtomicBool::new(false);
                search_nonce(&mut block, 1, &chain, &cancel, &abort, &metrics)
            })
        };
        // An external candidate takes the lock and fires the cancel.
        std::thread::sleep(Duration::from_millis(50));
        assert!(chain.try_lock_height(1));
        chain.cancel_mining();
        assert_eq!(worker.join().unwrap(), Err(Error::MiningCancelled));
        assert!(metrics.attempts.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn start_rejects_zero_difficulty() {
        let config = ConfigBuilder::new().difficulty(0).finish();
        let (chain, mempool, validator) = stack(&config);
        let miner = Arc::new(Miner::new(chain, mempool, validator, Address([7; 32]), &config));
        assert!(miner.start().is_err());
        assert_eq!(miner.state(), MinerState::Stopped);
    }
}

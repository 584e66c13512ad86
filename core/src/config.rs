//! Consensus and runtime configuration for **Cerera** core.
//!
//! The [`Config`] struct centralises tunable parameters such as the chain
//! id, difficulty and coinbase reward. It is constructed via the
//! [`ConfigBuilder`] using the fluent builder pattern, enabling callers to
//! customise only the fields they care about while keeping sensible
//! defaults.
//!
//! All fields are `pub` so read-only access is ergonomic, however mutation
//! should occur through the builder to preserve validation invariants.
//!
//! ```
//! use cerera_core::config::Config;
//!
//! // default main-net configuration
//! let cfg = Config::default();
//! assert_eq!(cfg.chain_id, 11);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::block::GENESIS_DIFFICULTY;
use crate::coins::Coins;
use crate::error::{Error, Result};
use crate::hash::keyed_digest;

/// Default minimum gas price accepted by the mempool: 0.000001 CER.
pub fn default_min_gas() -> Coins {
    Coins::from_wei_u64(1_000_000_000_000)
}

/// Default per-block gas budget.
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000_000_000_000;

/// Default mempool byte budget.
pub const DEFAULT_POOL_SIZE: usize = 4 * 1024 * 1024;

/// Default mining tick.
pub const DEFAULT_MINE_INTERVAL_MS: u64 = 5_000;

/// Runtime configuration shared across the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Network identifier stamped into every header.
    pub chain_id: i64,

    /// PoW difficulty; the target is `2^256 / difficulty`.  No retargeting
    /// policy exists, so this propagates from genesis forever.
    pub difficulty: u64,

    /// Coinbase subsidy paid to the proposing node.  The production value
    /// is TBD by the operator; this is an injected constant, not a
    /// consensus-derived schedule.
    pub block_reward: Coins,

    /// Mempool admission floor for nonzero gas prices.
    pub min_gas: Coins,

    /// Mempool byte budget.
    pub pool_max_size: usize,

    /// Per-block gas budget written into assembled headers.
    pub gas_limit: u64,

    /// Miner tick in milliseconds.
    pub mine_interval_ms: u64,

    /// Node name; also names the PEM key file `<name>.nodekey.pem`.
    pub name: String,

    /// Secret the vault cipher key is derived from.
    pub secret: String,

    /// Vault directory; `None` keeps every store in memory.
    pub data_dir: Option<PathBuf>,

    pub http_port: u16,
    pub p2p_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: 11,
            difficulty: GENESIS_DIFFICULTY,
            block_reward: Coins::whole(5),
            min_gas: default_min_gas(),
            pool_max_size: DEFAULT_POOL_SIZE,
            gas_limit: DEFAULT_GAS_LIMIT,
            mine_interval_ms: DEFAULT_MINE_INTERVAL_MS,
            name: "cerera".into(),
            secret: "cerera-dev-secret".into(),
            data_dir: None,
            http_port: 8453,
            p2p_port: 30911,
        }
    }
}

impl Config {
    /// Reads `config.json` from `path`.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Persist(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| Error::BadInput(format!("config parse: {e}")))
    }

    /// Writes `config.json` to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Persist(format!("config encode: {e}")))?;
        std::fs::write(path, raw)
            .map_err(|e| Error::Persist(format!("write {}: {e}", path.display())))
    }

    /// 16-byte AES key for the vault, derived from the configured secret.
    pub fn cipher_key(&self) -> Result<[u8; 16]> {
        let wide = keyed_digest(b"cerera.vault", self.secret.as_bytes())?;
        let mut key = [0u8; 16];
        key.copy_from_slice(&wide[..16]);
        Ok(key)
    }
}

/// Fluent builder for [`Config`].
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    /// Starts a new builder pre-populated with [`Config::default`].
    pub fn new() -> Self {
        Self {
            inner: Config::default(),
        }
    }

    pub fn chain_id(mut self, id: i64) -> Self {
        self.inner.chain_id = id;
        self
    }

    pub fn difficulty(mut self, diff: u64) -> Self {
        self.inner.difficulty = diff;
        self
    }

    pub fn block_reward(mut self, reward: Coins) -> Self {
        self.inner.block_reward = reward;
        self
    }

    pub fn min_gas(mut self, floor: Coins) -> Self {
        self.inner.min_gas = floor;
        self
    }

    pub fn pool_max_size(mut self, bytes: usize) -> Self {
        self.inner.pool_max_size = bytes;
        self
    }

    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.inner.gas_limit = limit;
        self
    }

    pub fn mine_interval_ms(mut self, ms: u64) -> Self {
        self.inner.mine_interval_ms = ms;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.inner.name = name.into();
        self
    }

    pub fn secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.inner.secret = secret.into();
        self
    }

    pub fn data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.inner.data_dir = dir;
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.inner.http_port = port;
        self
    }

    pub fn p2p_port(mut self, port: u16) -> Self {
        self.inner.p2p_port = port;
        self
    }

    /// Consumes the builder returning an immutable configuration value.
    pub fn finish(self) -> Config {
        self.inner
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Cerera Core Library
//!
//! The six coordinated subsystems of the node: the account vault, the
//! chain manager with its height-lock protocol, the mempool, the
//! validator, the proof-of-work miner, and the canonical serialization
//! the rest of the system relies on for hashing and persistence.  The
//! transport and RPC surfaces are separate crates that speak to this one
//! through the [`gossip::Relay`] contract and the [`registry::Registry`].

use std::time::{SystemTime, UNIX_EPOCH};

pub mod account;
pub mod address;
pub mod block;
pub mod chain;
pub mod coins;
pub mod config;
pub mod error;
pub mod gossip;
pub mod hash;
pub mod keys;
pub mod mempool;
pub mod miner;
pub mod pow;
pub mod registry;
pub mod transaction;
pub mod validator;
pub mod vault;

pub use account::{Account, AccountKind, AccountStatus};
pub use address::{Address, FAUCET_ADDRESS};
pub use block::{Block, Header};
pub use chain::Chain;
pub use coins::Coins;
pub use config::{Config, ConfigBuilder};
pub use error::{BlockRule, Error, Result, TxRule};
pub use gossip::Gossip;
pub use hash::Hash;
pub use keys::TxSignature;
pub use mempool::Mempool;
pub use miner::Miner;
pub use registry::Registry;
pub use transaction::{Transaction, TxKind};
pub use validator::Validator;
pub use vault::Vault;

/// Returns the UNIX timestamp in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as u64
}

//! Error types for the **Cerera** core crate.
//!
//! All high-level operations return [`crate::Result`] which is a convenient
//! alias for `core::result::Result<T, Error>`.
//!
//! Every surfaced failure belongs to one of the variants below.  Rule
//! violations on blocks and transactions carry a subcode identifying the
//! violated invariant so callers can react without string matching.
//!
//! # Examples
//!
//! ```
//! use cerera_core::{Error, Result};
//!
//! fn demo_fn(fail: bool) -> Result<()> {
//!     if fail {
//!         Err(Error::InsufficientFunds)
//!     } else {
//!         Ok(())
//!     }
//! }
//! ```

use thiserror::Error;

/// Core crate error type.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    /// Malformed parameters: decimal parse failure, negative gas, bad hex.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Missing or wrong passphrase, missing or undecodable key material.
    #[error("authentication failed")]
    Auth,

    /// Unknown address, hash or height.
    #[error("not found")]
    NotFound,

    /// A debit would underflow the account balance.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Transaction gas price is below the pool minimum.
    #[error("gas price below pool minimum")]
    GasTooLow,

    /// Admitting the transaction would exceed the pool byte budget.
    #[error("transaction pool is full")]
    PoolFull,

    /// Block rule violation.
    #[error("invalid block: {0}")]
    InvalidBlock(BlockRule),

    /// Transaction rule violation.
    #[error("invalid transaction: {0}")]
    InvalidTx(TxRule),

    /// The nonce search was interrupted; the candidate is discarded.
    /// Expected during normal operation, never fatal.
    #[error("mining cancelled")]
    MiningCancelled,

    /// I/O failure in the vault or another persistent store.
    #[error("persistence failure: {0}")]
    Persist(String),

    /// Key generation or ECDSA operation failure.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

/// Subcode for [`Error::InvalidBlock`].
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BlockRule {
    /// `prev_hash` does not match the hash of the current tip.
    #[error("previous hash mismatch")]
    PrevHashMismatch,

    /// Height is not exactly one greater than the current tip.
    #[error("height gap")]
    HeightGap,

    /// Header chain id differs from the configured chain id.
    #[error("chain id mismatch")]
    ChainIdMismatch,

    /// Block hash does not satisfy the difficulty target.
    #[error("proof of work below target")]
    BadPoW,

    /// Header timestamp is earlier than the parent's.
    #[error("timestamp rewind")]
    TimestampRewind,

    /// The height lock is held by a competing candidate.
    #[error("height already locked")]
    HeightLocked,

    /// Applying the block's transactions to the vault failed.
    #[error("state execution failed")]
    StateExecutionFailed,
}

/// Subcode for [`Error::InvalidTx`].
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TxRule {
    /// Nonce is not the successor of the sender's current nonce.
    #[error("nonce out of order")]
    NonceOutOfOrder,

    /// Signature missing, unverifiable, or recovered address differs
    /// from the stated sender.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// Transaction hash already present in the chain or the pool.
    #[error("duplicate inclusion")]
    DuplicateInclusion,
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Persist(e.to_string())
    }
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

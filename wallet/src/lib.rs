//! Cerera node identity: the PEM keystore and mnemonic helpers.
//!
//! Every node owns a P-256 key stored as `<name>.nodekey.pem` (SEC1 PEM)
//! next to its data directory.  [`Keystore::load_or_generate`] is the
//! boot path: an existing key is reused, a missing one generated and
//! written, and an unreadable one is a fatal initialization error.

use std::path::{Path, PathBuf};

use p256::ecdsa::{SigningKey, VerifyingKey};
use thiserror::Error;

use cerera_core::{keys, Address};

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("key file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("key material: {0}")]
    Key(#[from] cerera_core::Error),
}

pub type Result<T> = core::result::Result<T, KeystoreError>;

/// The node's signing identity, backed by a PEM file on disk.
pub struct Keystore {
    path: PathBuf,
    key: SigningKey,
}

impl Keystore {
    /// Loads the key at `dir/<name>.nodekey.pem`, generating and
    /// persisting a fresh one when the file does not exist.
    pub fn load_or_generate(dir: &Path, name: &str) -> Result<Keystore> {
        let path = dir.join(format!("{name}.nodekey.pem"));
        if path.exists() {
            let pem = std::fs::read_to_string(&path)
                .map_err(|e| KeystoreError::Io(path.clone(), e))?;
            let key = keys::from_pem(&pem)?;
            log::info!("keystore: loaded node key from {}", path.display());
            return Ok(Keystore { path, key });
        }
        let key = keys::generate();
        let pem = keys::to_pem(&key)?;
        std::fs::write(&path, pem).map_err(|e| KeystoreError::Io(path.clone(), e))?;
        log::info!("keystore: generated node key at {}", path.display());
        Ok(Keystore { path, key })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// The node's account address, derived from the public key.
    pub fn address(&self) -> Address {
        keys::address_of(&VerifyingKey::from(&self.key))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A fresh 12-word BIP-39 mnemonic for `account.restore` workflows.
pub fn generate_mnemonic() -> String {
    let entropy: [u8; 16] = rand::random();
    bip39::Mnemonic::from_entropy(&entropy)
        .expect("16 bytes of entropy is a valid mnemonic length")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_then_reloads_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = Keystore::load_or_generate(dir.path(), "testnode").unwrap();
        let second = Keystore::load_or_generate(dir.path(), "testnode").unwrap();
        assert_eq!(first.address(), second.address());
        assert!(first.path().ends_with("testnode.nodekey.pem"));
    }

    #[test]
    fn distinct_names_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let a = Keystore::load_or_generate(dir.path(), "a").unwrap();
        let b = Keystore::load_or_generate(dir.path(), "b").unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn mnemonic_restores_in_the_vault() {
        let phrase = generate_mnemonic();
        assert_eq!(phrase.split_whitespace().count(), 12);
        let key = keys::master_key_from_mnemonic(&phrase, "pw").unwrap();
        let again = keys::master_key_from_mnemonic(&phrase, "pw").unwrap();
        assert_eq!(key.to_bytes(), again.to_bytes());
    }
}

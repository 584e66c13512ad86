//! The vault: persistent and in-memory custody of accounts.
//!
//! Accounts live in a content-addressed store keyed by address.  With a
//! data directory configured, every record is written through to sled,
//! AES-128-CTR encrypted under a key derived from the configured secret,
//! with a random 16-byte IV prefixed to each ciphertext.  Private keys are
//! held as encrypted SEC1 PEM blobs keyed by the hash of the public key —
//! the validator fetches them through [`Vault::private_key_for`] to sign
//! on a caller's behalf.
//!
//! Reads take short-held read locks and return value copies; mutations go
//! through the write lock, so per-account debit/credit pairs are atomic.
//! Records that fail to decrypt or decode during the bulk load are logged
//! and skipped rather than aborting the open.

use std::collections::HashMap;
use std::path::Path;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use p256::ecdsa::{SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rand::RngCore;

use crate::account::{Account, AccountStatus};
use crate::address::Address;
use crate::coins::Coins;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::keys;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const IV_LEN: usize = 16;

struct DiskStore {
    db: sled::Db,
    accounts: sled::Tree,
    keys: sled::Tree,
    code: sled::Tree,
}

/// Content-addressed account store.
pub struct Vault {
    cipher_key: [u8; 16],
    accounts: RwLock<HashMap<Address, Account>>,
    key_blobs: RwLock<HashMap<Hash, Vec<u8>>>,
    code: RwLock<HashMap<Address, Vec<u8>>>,
    disk: Option<DiskStore>,
}

impl Vault {
    /// Opens the vault.  With `config.data_dir` set, existing records are
    /// bulk-loaded from disk; otherwise the store is memory-only.
    pub fn open(config: &Config) -> Result<Vault> {
        let cipher_key = config.cipher_key()?;
        let disk = match &config.data_dir {
            Some(dir) => Some(Self::open_disk(dir)?),
            None => None,
        };
        let vault = Vault {
            cipher_key,
            accounts: RwLock::new(HashMap::new()),
            key_blobs: RwLock::new(HashMap::new()),
            code: RwLock::new(HashMap::new()),
            disk,
        };
        vault.sync_from_disk()?;
        Ok(vault)
    }

    fn open_disk(dir: &Path) -> Result<DiskStore> {
        let db = sled::open(dir.join("vault"))?;
        let accounts = db.open_tree("accounts")?;
        let keys = db.open_tree("keys")?;
        let code = db.open_tree("code")?;
        Ok(DiskStore {
            db,
            accounts,
            keys,
            code,
        })
    }

    fn sync_from_disk(&self) -> Result<()> {
        let disk = match &self.disk {
            Some(d) => d,
            None => return Ok(()),
        };
        let mut loaded = 0usize;
        let mut accounts = self.accounts.write();
        for item in disk.accounts.iter() {
            let (key, value) = item?;
            let record = match self
                .decrypt(&value)
                .and_then(|plain| Account::decode(&plain))
            {
                Ok(acc) => acc,
                Err(e) => {
                    log::warn!("vault: skipping undecodable record {}: {e}", hex::encode(&key));
                    continue;
                }
            };
            accounts.insert(record.address, record);
            loaded += 1;
        }
        drop(accounts);
        let mut key_blobs = self.key_blobs.write();
        for item in disk.keys.iter() {
            let (key, value) = item?;
            match Hash::from_slice(&key) {
                Ok(h) => {
                    key_blobs.insert(h, value.to_vec());
                }
                Err(e) => log::warn!("vault: skipping malformed key index: {e}"),
            }
        }
        drop(key_blobs);
        let mut code = self.code.write();
        for item in disk.code.iter() {
            let (key, value) = item?;
            match Address::from_slice(&key) {
                Ok(a) => {
                    code.insert(a, value.to_vec());
                }
                Err(e) => log::warn!("vault: skipping malformed code index: {e}"),
            }
        }
        drop(code);
        log::info!("vault: loaded {loaded} accounts");
        Ok(())
    }

    /// Generates a fresh keypair, registers the derived account and
    /// persists the encrypted private key.  Returns the public address.
    pub fn create(&self, passphrase: &str) -> Result<Address> {
        let key = keys::generate();
        self.register_key(&key, passphrase)
    }

    /// Deterministically re-derives an account from a mnemonic plus
    /// passphrase and registers it.
    pub fn restore(&self, mnemonic: &str, passphrase: &str) -> Result<Address> {
        let key = keys::master_key_from_mnemonic(mnemonic, passphrase)?;
        self.register_key(&key, passphrase)
    }

    fn register_key(&self, key: &SigningKey, passphrase: &str) -> Result<Address> {
        let verifying = VerifyingKey::from(key);
        let address = keys::address_of(&verifying);
        let key_hash = keys::key_hash(&verifying);
        let pem = keys::to_pem(key)?;
        let blob = self.encrypt(pem.as_bytes());

        let mut account = Account::new(address);
        account.key_hash = key_hash;
        account.passphrase = Hash::digest(passphrase.as_bytes()).0;
        account.status = AccountStatus::New;

        self.key_blobs.write().insert(key_hash, blob.clone());
        if let Some(disk) = &self.disk {
            disk.keys.insert(key_hash.as_bytes(), blob)?;
        }
        self.put(account)?;
        Ok(address)
    }

    /// Snapshot of one account.
    pub fn get(&self, address: &Address) -> Option<Account> {
        self.accounts.read().get(address).cloned()
    }

    /// Upserts an account.
    pub fn put(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write();
        self.persist(&account)?;
        accounts.insert(account.address, account);
        Ok(())
    }

    /// Subtracts `amount` from the balance of `address`.
    pub fn debit(&self, address: &Address, amount: &Coins) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts.get_mut(address).ok_or(Error::NotFound)?;
        account.debit(amount)?;
        account.bloom_down();
        let snapshot = account.clone();
        drop(accounts);
        self.persist(&snapshot)
    }

    /// Adds `amount` to the balance of `address` and records the
    /// crediting transaction in the inputs map.  Creates the account on
    /// first credit.
    pub fn credit(&self, address: &Address, amount: &Coins, tx_hash: Hash) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .entry(*address)
            .or_insert_with(|| Account::new(*address));
        account.credit(amount, tx_hash);
        account.bloom_up();
        let snapshot = account.clone();
        drop(accounts);
        self.persist(&snapshot)
    }

    /// Advances the sender nonce after a successful debit, returning the
    /// new value.
    pub fn advance_nonce(&self, address: &Address) -> Result<u64> {
        let mut accounts = self.accounts.write();
        let account = accounts.get_mut(address).ok_or(Error::NotFound)?;
        account.nonce += 1;
        let snapshot = account.clone();
        let nonce = account.nonce;
        drop(accounts);
        self.persist(&snapshot)?;
        Ok(nonce)
    }

    /// Decrypts and parses the private key stored for `key_hash`.
    pub fn private_key_for(&self, key_hash: &Hash) -> Result<SigningKey> {
        let blob = self
            .key_blobs
            .read()
            .get(key_hash)
            .cloned()
            .ok_or(Error::NotFound)?;
        let plain = self.decrypt(&blob)?;
        let pem = String::from_utf8(plain).map_err(|_| Error::Auth)?;
        keys::from_pem(&pem).map_err(|_| Error::Auth)
    }

    /// Bytecode blob associated with `address`.
    pub fn contract_code(&self, address: &Address) -> Option<Vec<u8>> {
        self.code.read().get(address).cloned()
    }

    pub fn put_contract_code(&self, address: Address, bytecode: Vec<u8>) -> Result<()> {
        if let Some(disk) = &self.disk {
            disk.code.insert(address.as_bytes(), bytecode.clone())?;
        }
        self.code.write().insert(address, bytecode);
        Ok(())
    }

    pub fn delete_contract_code(&self, address: &Address) -> Result<()> {
        if let Some(disk) = &self.disk {
            disk.code.remove(address.as_bytes())?;
        }
        self.code.write().remove(address);
        Ok(())
    }

    /// Snapshot of every account.
    pub fn all(&self) -> Vec<Account> {
        self.accounts.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Flushes and releases the database handle.  Must run before the
    /// process exits.
    pub fn close(&self) -> Result<()> {
        if let Some(disk) = &self.disk {
            disk.db.flush()?;
        }
        Ok(())
    }

    fn persist(&self, account: &Account) -> Result<()> {
        if let Some(disk) = &self.disk {
            let blob = self.encrypt(&account.encode());
            disk.accounts.insert(account.address.as_bytes(), blob)?;
        }
        Ok(())
    }

    fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let mut out = Vec::with_capacity(IV_LEN + plain.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(plain);
        let mut cipher = Aes128Ctr::new(&self.cipher_key.into(), &iv.into());
        cipher.apply_keystream(&mut out[IV_LEN..]);
        out
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < IV_LEN {
            return Err(Error::BadInput("ciphertext shorter than IV".into()));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&blob[..IV_LEN]);
        let mut out = blob[IV_LEN..].to_vec();
        let mut cipher = Aes128Ctr::new(&self.cipher_key.into(), &iv.into());
        cipher.apply_keystream(&mut out);
        Ok(out)
    }
}

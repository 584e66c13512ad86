//! ECDSA key material on the P-256 curve.
//!
//! Addresses are the last 32 bytes of a BLAKE2b-512 digest over the
//! uncompressed public key (format byte skipped).  Signatures are made over
//! a 32-byte prehash — the canonical transaction hash — and carry the
//! public key's affine coordinates so the signer's address can be
//! recovered without a registry lookup.

use hmac::{Hmac, Mac};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::FromEncodedPoint;
use p256::pkcs8::LineEnding;
use p256::{EncodedPoint, FieldBytes, SecretKey};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::address::Address;
use crate::error::{Error, Result, TxRule};
use crate::hash::{blake2b_512, Hash};

/// PBKDF2 round count of the BIP-39 seed derivation.
const SEED_ROUNDS: u32 = 2048;

/// HMAC domain separator for the master-key derivation.
const MASTER_KEY_DOMAIN: &[u8] = b"Cerera seed";

/// Signature blob carried by transactions: the ECDSA scalars plus the
/// signer's affine public-key coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub x: [u8; 32],
    pub y: [u8; 32],
}

/// Generates a fresh P-256 signing key.
pub fn generate() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// Derives the account address for a public key: the last 32 bytes of
/// BLAKE2b-512 over the uncompressed point without its 0x04 prefix.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = blake2b_512(&point.as_bytes()[1..]);
    let mut addr = [0u8; 32];
    addr.copy_from_slice(&digest[32..]);
    Address(addr)
}

/// Hash of the uncompressed public key; the vault's key-blob index.
pub fn key_hash(key: &VerifyingKey) -> Hash {
    Hash::digest(key.to_encoded_point(false).as_bytes())
}

/// SEC1 PEM rendering of a private key.
pub fn to_pem(key: &SigningKey) -> Result<String> {
    let secret = SecretKey::from(key);
    let pem = secret
        .to_sec1_pem(LineEnding::LF)
        .map_err(|e| Error::Crypto(format!("PEM encode failed: {e}")))?;
    Ok(pem.to_string())
}

/// Parses a SEC1 PEM private key.
pub fn from_pem(pem: &str) -> Result<SigningKey> {
    if pem.trim().is_empty() {
        return Err(Error::Crypto("empty key".into()));
    }
    let secret =
        SecretKey::from_sec1_pem(pem).map_err(|e| Error::Crypto(format!("invalid PEM: {e}")))?;
    Ok(SigningKey::from(secret))
}

/// Signs a 32-byte prehash, returning the full signature blob.
pub fn sign_digest(key: &SigningKey, digest: &Hash) -> Result<TxSignature> {
    let sig: Signature = key
        .sign_prehash(digest.as_bytes())
        .map_err(|e| Error::Crypto(format!("signing failed: {e}")))?;
    let (r, s) = sig.split_scalars();
    let point = VerifyingKey::from(key).to_encoded_point(false);
    let (x, y) = match (point.x(), point.y()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(Error::Crypto("public key at infinity".into())),
    };
    Ok(TxSignature {
        r: r.to_bytes().into(),
        s: s.to_bytes().into(),
        x: (*x).into(),
        y: (*y).into(),
    })
}

/// Rebuilds the verifying key embedded in a signature blob.
pub fn embedded_key(sig: &TxSignature) -> Result<VerifyingKey> {
    let point = EncodedPoint::from_affine_coordinates(
        FieldBytes::from_slice(&sig.x),
        FieldBytes::from_slice(&sig.y),
        false,
    );
    let maybe_key = p256::PublicKey::from_encoded_point(&point);
    if maybe_key.is_some().into() {
        Ok(VerifyingKey::from(maybe_key.unwrap()))
    } else {
        Err(Error::InvalidTx(TxRule::SignatureMismatch))
    }
}

/// Verifies a signature blob against a 32-byte prehash.
pub fn verify_digest(sig: &TxSignature, digest: &Hash) -> Result<()> {
    let key = embedded_key(sig)?;
    let signature = Signature::from_scalars(FieldBytes::from(sig.r), FieldBytes::from(sig.s))
        .map_err(|_| Error::InvalidTx(TxRule::SignatureMismatch))?;
    key.verify_prehash(digest.as_bytes(), &signature)
        .map_err(|_| Error::InvalidTx(TxRule::SignatureMismatch))
}

/// Recovers the signer's address from the embedded public key.
pub fn recover_address(sig: &TxSignature) -> Result<Address> {
    Ok(address_of(&embedded_key(sig)?))
}

/// Derives the deterministic master key for a BIP-39 mnemonic plus
/// passphrase: PBKDF2-HMAC-SHA512 seed, then an HMAC-SHA512 master step
/// whose left half is the P-256 secret scalar.
pub fn master_key_from_mnemonic(phrase: &str, passphrase: &str) -> Result<SigningKey> {
    let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
        .map_err(|e| Error::BadInput(format!("invalid mnemonic: {e}")))?;
    let mut seed = [0u8; 64];
    pbkdf2_hmac::<Sha512>(
        mnemonic.to_string().as_bytes(),
        format!("mnemonic{passphrase}").as_bytes(),
        SEED_ROUNDS,
        &mut seed,
    );
    let mut mac = Hmac::<Sha512>::new_from_slice(MASTER_KEY_DOMAIN)
        .map_err(|_| Error::Crypto("HMAC init failed".into()))?;
    mac.update(&seed);
    let derived = mac.finalize().into_bytes();
    SigningKey::from_slice(&derived[..32])
        .map_err(|_| Error::Crypto("derived scalar outside the curve order".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "legal winner thank year wave sausage worth useful legal winner thank yellow";

    #[test]
    fn sign_verify_round_trip() {
        let key = generate();
        let digest = Hash::digest(b"payload");
        let sig = sign_digest(&key, &digest).unwrap();
        verify_digest(&sig, &digest).unwrap();
        assert!(verify_digest(&sig, &Hash::digest(b"other")).is_err());
    }

    #[test]
    fn recovered_address_matches_signer() {
        let key = generate();
        let sig = sign_digest(&key, &Hash::digest(b"payload")).unwrap();
        let expected = address_of(&VerifyingKey::from(&key));
        assert_eq!(recover_address(&sig).unwrap(), expected);
    }

    #[test]
    fn pem_round_trip() {
        let key = generate();
        let pem = to_pem(&key).unwrap();
        let restored = from_pem(&pem).unwrap();
        assert_eq!(key.to_bytes(), restored.to_bytes());
    }

    #[test]
    fn empty_pem_rejected() {
        assert!(matches!(from_pem("  "), Err(Error::Crypto(_))));
    }

    #[test]
    fn mnemonic_is_deterministic() {
        let a = master_key_from_mnemonic(TEST_MNEMONIC, "pass").unwrap();
        let b = master_key_from_mnemonic(TEST_MNEMONIC, "pass").unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        let c = master_key_from_mnemonic(TEST_MNEMONIC, "other").unwrap();
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn mnemonic_garbage_rejected() {
        assert!(master_key_from_mnemonic("not a mnemonic", "").is_err());
    }
}

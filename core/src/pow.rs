//! Proof-of-Work helpers.
//!
//! The target is a 256-bit value: a block hash is admissible when,
//! interpreted as a big-endian unsigned integer, it is strictly below
//! `⌊2²⁵⁶ / difficulty⌋`.  Difficulty zero has no target and is a fatal
//! configuration error caught at boot.
//!
//! All functions are pure and stateless so they can be used from any
//! thread.

use num_bigint::BigUint;
use num_traits::One;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::Hash;

/// Computes `⌊2²⁵⁶ / difficulty⌋`.
pub fn target(difficulty: u64) -> Result<BigUint> {
    if difficulty == 0 {
        return Err(Error::BadInput("difficulty must be nonzero".into()));
    }
    Ok((BigUint::one() << 256u32) / BigUint::from(difficulty))
}

/// Returns `true` if `hash`, read big-endian, is below `target`.
pub fn hash_meets_target(hash: &Hash, target: &BigUint) -> bool {
    BigUint::from_bytes_be(hash.as_bytes()) < *target
}

/// Convenience check of a whole block against its own difficulty.
pub fn block_meets_difficulty(block: &Block) -> Result<bool> {
    let t = target(block.header.difficulty)?;
    Ok(hash_meets_target(&block.hash(), &t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_difficulty_is_fatal() {
        assert!(target(0).is_err());
    }

    #[test]
    fn difficulty_one_admits_everything() {
        let t = target(1).unwrap();
        assert!(hash_meets_target(&Hash([0xffu8; 32]), &t));
        assert!(hash_meets_target(&Hash::EMPTY, &t));
    }

    #[test]
    fn target_scales_inversely() {
        let loose = target(2).unwrap();
        let tight = target(1_000_000).unwrap();
        assert!(tight < loose);
        // A hash of all 0xff fails any difficulty above one.
        assert!(!hash_meets_target(&Hash([0xffu8; 32]), &loose));
    }

    #[test]
    fn boundary_is_strict() {
        let t = target(2).unwrap();
        // 2^255 is exactly the target for difficulty 2 and must fail.
        let mut boundary = [0u8; 32];
        boundary[0] = 0x80;
        assert!(!hash_meets_target(&Hash(boundary), &t));
        boundary[0] = 0x7f;
        assert!(hash_meets_target(&Hash(boundary), &t));
    }
}

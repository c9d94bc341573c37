//! Deterministic hashing and bucket assignment.
//!
//! Buckets are pinned to FNV-1a 32-bit over `identity:flagKey`; the
//! `(hash mod 100) + 1` mapping is observable by existing users and must
//! never change.

use crate::definition::Variation;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a 32-bit over the UTF-8 bytes of `input`, treated as unsigned.
pub fn fnv1a32(input: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Bucket in 1..=100 for an identity under a specific flag.
///
/// The flag key is folded into the hash so the same identity occupies
/// independent buckets across flags.
pub fn bucket(identity: &str, flag_key: &str) -> u8 {
    let hash = fnv1a32(&format!("{identity}:{flag_key}"));
    (hash % 100) as u8 + 1
}

/// Whether `identity` falls inside a percentage rollout for `flag_key`.
/// 100 admits everyone, 0 admits no one.
pub fn in_rollout(identity: &str, flag_key: &str, percentage: u8) -> bool {
    if percentage >= 100 {
        return true;
    }
    bucket(identity, flag_key) <= percentage
}

/// Pick a variation by walking the declared order and accumulating weights;
/// the first variation whose cumulative weight reaches the bucket wins.
///
/// Returns `None` when the bucket exceeds the weight total (weights summing
/// below 100 leave a slice of identities without a variant).
pub fn choose_variant<'a>(
    identity: &str,
    flag_key: &str,
    variations: &'a [Variation],
) -> Option<&'a Variation> {
    let slot = u32::from(bucket(identity, flag_key));
    let mut cumulative = 0u32;
    for variation in variations {
        cumulative += u32::from(variation.weight);
        if slot <= cumulative {
            return Some(variation);
        }
    }
    None
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use blake3::Hasher;

/// Canonical 256-bit hash used for chain hashes, blob keys and derived ids.
pub type Hash = [u8; 32];

/// Domain prefix for ghost raw id derivation.
const GHOST_DOMAIN: &[u8] = b"ghost:";

/// Domain prefix for author chain hashes (versioned; changing it forks every chain).
pub(crate) const CHAIN_DOMAIN: &[u8] = b"valos:chain:v1\0";

/// BLAKE3 digest of an empty byte slice.
///
/// Serves as the genesis `last_chain_hash` of every chronicle.
#[must_use]
pub fn blake3_empty() -> Hash {
    blake3::hash(&[]).into()
}

/// Derives the raw id of the ghost of `prototype_raw_id` inside `instance_raw_id`.
///
/// `blake3("ghost:" || len(prototype) || prototype || instance)` rendered as
/// lowercase hex. The length prefix keeps `("ab", "c")` and `("a", "bc")`
/// apart.
pub fn derive_ghost_raw_id(prototype_raw_id: &str, instance_raw_id: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(GHOST_DOMAIN);
    hasher.update(&(prototype_raw_id.len() as u64).to_le_bytes());
    hasher.update(prototype_raw_id.as_bytes());
    hasher.update(instance_raw_id.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Parses a 32-byte hash from lowercase or uppercase hex.
pub fn hash_from_hex(text: &str) -> Option<Hash> {
    let bytes = hex::decode(text).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn ghost_ids_are_domain_separated_and_length_prefixed() {
        let a = derive_ghost_raw_id("ab", "c");
        let b = derive_ghost_raw_id("a", "bc");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, derive_ghost_raw_id("ab", "c"));
    }

    #[test]
    fn hex_hash_roundtrip() {
        let h = blake3_empty();
        assert_eq!(hash_from_hex(&hex::encode(h)), Some(h));
        assert_eq!(hash_from_hex("abcd"), None);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic author identities.

use ed25519_dalek::SigningKey;

/// An identity whose key is derived from its name, so every run signs identically.
#[derive(Clone, Debug)]
pub struct TestAuthor {
    name: String,
    key: SigningKey,
}

impl TestAuthor {
    /// Author `name` with key seed `BLAKE3("valos-test-author:" || name)`.
    pub fn new(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"valos-test-author:");
        hasher.update(name.as_bytes());
        let seed: [u8; 32] = hasher.finalize().into();
        Self {
            name: name.to_string(),
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Public identity handle (the name).
    pub fn public_identity(&self) -> &str {
        &self.name
    }

    /// Raw id of the identity resource registered for this author.
    pub fn resource_id(&self) -> String {
        format!("identity-{}", self.name)
    }

    /// Hex verifying key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_per_name() {
        let a = TestAuthor::new("alice");
        assert_eq!(a.public_key_hex(), TestAuthor::new("alice").public_key_hex());
        assert_ne!(a.public_key_hex(), TestAuthor::new("bob").public_key_hex());
        assert_eq!(a.resource_id(), "identity-alice");
    }
}

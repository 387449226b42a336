// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Author key material.

use anyhow::{bail, Context, Result};
use ed25519_dalek::SigningKey;

use crate::cli::KeyArgs;

const SEED_DOMAIN: &[u8] = b"valos-cli-seed:";

impl KeyArgs {
    /// The selected key, `None` when neither flag was given.
    pub fn signing_key(&self) -> Result<Option<SigningKey>> {
        if let Some(seed) = &self.seed {
            let mut hasher = blake3::Hasher::new();
            hasher.update(SEED_DOMAIN);
            hasher.update(seed.as_bytes());
            return Ok(Some(SigningKey::from_bytes(hasher.finalize().as_bytes())));
        }
        let Some(secret) = &self.secret_hex else {
            return Ok(None);
        };
        let bytes = hex::decode(secret.trim()).context("secret key is not hex")?;
        let Ok(bytes) = <[u8; 32]>::try_from(bytes.as_slice()) else {
            bail!("secret key must be 32 bytes, got {}", bytes.len());
        };
        Ok(Some(SigningKey::from_bytes(&bytes)))
    }
}

/// Lowercase hex of the verifying key, as registered in `publicKey`.
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn seed_and_secret_select_the_same_key() {
        let seeded = KeyArgs {
            seed: Some("alice".into()),
            secret_hex: None,
        }
        .signing_key()
        .unwrap()
        .unwrap();
        let explicit = KeyArgs {
            seed: None,
            secret_hex: Some(hex::encode(seeded.to_bytes())),
        }
        .signing_key()
        .unwrap()
        .unwrap();
        assert_eq!(public_key_hex(&seeded), public_key_hex(&explicit));
        assert!(KeyArgs::default().signing_key().unwrap().is_none());
    }

    #[test]
    fn short_secrets_are_rejected() {
        let err = KeyArgs {
            seed: None,
            secret_hex: Some("abcd".into()),
        }
        .signing_key()
        .unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }
}

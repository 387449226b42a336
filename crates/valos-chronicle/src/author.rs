// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authorship integrity: roles, Ed25519 signatures and the author hash chain.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. authored events required but no author aspect
//! 2. author identity not registered as director or contributor
//! 3. signature does not verify over [`EventEnvelope::signing_bytes`]
//! 4. antecedent or chain hash does not continue the chain
//! 5. privileged change not authored by a congruent director
//!
//! Roles live on the chronicle root: `directors` and `contributors` reference
//! identity resources carrying `publicIdentity` and a hex `publicKey`.
//!
//! A chronicle without directors can be bootstrapped: the first director may
//! register itself in the very event it signs, so roles are then looked up in
//! the tentative post-state (apply is pure, nothing is published yet). A
//! bootstrap event whose delta does not apply is rejected as a delta failure
//! and never seals.
use std::fmt;

use blake3::Hasher;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::canonical::CanonError;
use crate::envelope::{AuthorAspect, EventEnvelope};
use crate::ghost::Resolver;
use crate::ident::{blake3_empty, hash_from_hex, Hash, CHAIN_DOMAIN};
use crate::locator::Vrl;
use crate::ontology::{terms, Ontology};
use crate::state::{FieldValue, StateTree};

/// Why an event failed authorship validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvalidationReason {
    /// Authored events are required (or the change is privileged) but no author aspect is present.
    AuthorAspectMissing,
    /// The author identity holds neither role.
    NoIdentity,
    /// The signature is malformed or does not verify.
    InvalidSignature,
    /// The antecedent or chain hash does not continue the chain.
    InvalidChainHash,
    /// A privileged change by a non-director, or one that leaves the author
    /// without a matching director registration.
    IncongruentDirector,
}

impl InvalidationReason {
    /// Stable reason string carried by sealed events.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorAspectMissing => "author aspect missing",
            Self::NoIdentity => "no contributor/director identity found",
            Self::InvalidSignature => "invalid signature",
            Self::InvalidChainHash => "invalid chain hash",
            Self::IncongruentDirector => "incongruent director identity",
        }
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for InvalidationReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A failed check and the log index of the event that failed it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason} (event {index})")]
pub struct Invalidation {
    /// What failed.
    pub reason: InvalidationReason,
    /// `log.index` of the offending event.
    pub index: u64,
}

/// Role held by an identity on the chronicle root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// May author privileged changes.
    Director,
    /// May author ordinary changes.
    Contributor,
}

/// A registered identity found on the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// The identity resource.
    pub resource: Vrl,
    /// Strongest role held.
    pub role: Role,
    /// Hex verifying key as stored.
    pub public_key: String,
}

/// Position of the author hash chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainState {
    /// Log index of the most recent author-bearing event.
    pub last_author_index: Option<u64>,
    /// Chain hash of that event, [`blake3_empty`] before the first.
    pub last_chain_hash: Hash,
}

impl ChainState {
    /// Chain position of a chronicle with no authored events.
    pub fn genesis() -> Self {
        Self {
            last_author_index: None,
            last_chain_hash: blake3_empty(),
        }
    }

    /// Chain position after `link` was accepted.
    pub fn advanced(self, link: ChainLink) -> Self {
        Self {
            last_author_index: Some(link.index),
            last_chain_hash: link.chain_hash,
        }
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Chain position contributed by an accepted authored event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainLink {
    /// Its log index.
    pub index: u64,
    /// Its chain hash.
    pub chain_hash: Hash,
}

/// `BLAKE3(domain || prev || signature || signing_bytes)`.
pub fn chain_hash(prev: &Hash, signature: &[u8], signing_bytes: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(CHAIN_DOMAIN);
    hasher.update(prev);
    hasher.update(signature);
    hasher.update(signing_bytes);
    hasher.finalize().into()
}

/// Signs `envelope` as `public_identity`, continuing `chain`.
///
/// Fills in the author aspect and returns the link the event will contribute
/// once accepted.
pub fn sign_envelope(
    envelope: &mut EventEnvelope,
    public_identity: &str,
    key: &SigningKey,
    chain: &ChainState,
) -> Result<ChainLink, CanonError> {
    let bytes = envelope.signing_bytes()?;
    let signature = key.sign(&bytes).to_bytes();
    let hash = chain_hash(&chain.last_chain_hash, &signature, &bytes);
    envelope.author = Some(AuthorAspect {
        public_identity: public_identity.to_string(),
        signature: hex::encode(signature),
        antecedent: chain.last_author_index,
        chain_hash: hex::encode(hash),
    });
    Ok(ChainLink {
        index: envelope.index(),
        chain_hash: hash,
    })
}

/// Runs the authorship checks for one event.
#[derive(Clone, Copy, Debug)]
pub struct AuthorshipValidator<'a> {
    ontology: &'a Ontology,
}

impl<'a> AuthorshipValidator<'a> {
    /// Validator reading roles through `ontology`.
    pub fn new(ontology: &'a Ontology) -> Self {
        Self { ontology }
    }

    /// Validates `envelope` given the state before (`pre`) and after (`post`)
    /// its delta and the current chain position.
    ///
    /// Returns the chain link for authored events, `None` for accepted
    /// unauthored ones.
    pub fn validate(
        &self,
        pre: &StateTree,
        post: &StateTree,
        chain: &ChainState,
        envelope: &EventEnvelope,
    ) -> Result<Option<ChainLink>, Invalidation> {
        let fail = |reason| Invalidation {
            reason,
            index: envelope.index(),
        };
        let bootstrapping = self.is_bootstrapping(pre);
        let privileged = self.is_privileged(pre, post);

        let Some(author) = &envelope.author else {
            if self.requires_authored_events(pre) || (privileged && !bootstrapping) {
                return Err(fail(InvalidationReason::AuthorAspectMissing));
            }
            return Ok(None);
        };

        let roles = if bootstrapping { post } else { pre };
        let registration = self
            .registration(roles, &author.public_identity)
            .ok_or_else(|| fail(InvalidationReason::NoIdentity))?;

        let bytes = envelope
            .signing_bytes()
            .map_err(|_| fail(InvalidationReason::InvalidSignature))?;
        let signature =
            verify(&registration.public_key, &author.signature, &bytes).ok_or_else(|| {
                fail(InvalidationReason::InvalidSignature)
            })?;

        if author.antecedent != chain.last_author_index {
            return Err(fail(InvalidationReason::InvalidChainHash));
        }
        let expected = chain_hash(&chain.last_chain_hash, &signature.to_bytes(), &bytes);
        if hash_from_hex(&author.chain_hash) != Some(expected) {
            return Err(fail(InvalidationReason::InvalidChainHash));
        }

        if privileged {
            let congruent = registration.role == Role::Director
                && self
                    .registration(post, &author.public_identity)
                    .is_some_and(|after| {
                        after.role == Role::Director && after.public_key == registration.public_key
                    });
            if !congruent {
                return Err(fail(InvalidationReason::IncongruentDirector));
            }
        }

        Ok(Some(ChainLink {
            index: envelope.index(),
            chain_hash: expected,
        }))
    }

    /// Effective `requireAuthoredEvents` of the root.
    pub fn requires_authored_events(&self, state: &StateTree) -> bool {
        let resolver = Resolver::new(state, self.ontology);
        resolver
            .read_field(&state.root(), terms::REQUIRE_AUTHORED_EVENTS)
            .as_ref()
            .and_then(FieldValue::as_literal)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Looks `public_identity` up among the root's directors, then contributors.
    pub fn registration(&self, state: &StateTree, public_identity: &str) -> Option<Registration> {
        let resolver = Resolver::new(state, self.ontology);
        [(terms::DIRECTORS, Role::Director), (terms::CONTRIBUTORS, Role::Contributor)]
            .into_iter()
            .find_map(|(term, role)| {
                self.role_holders(state, term).into_iter().find_map(|holder| {
                    let literal = |term: &str| {
                        resolver
                            .read_field(&holder, term)?
                            .as_literal()?
                            .as_str()
                            .map(str::to_string)
                    };
                    if literal(terms::PUBLIC_IDENTITY)? != public_identity {
                        return None;
                    }
                    Some(Registration {
                        public_key: literal(terms::PUBLIC_KEY)?,
                        resource: holder.without_coupling(),
                        role,
                    })
                })
            })
    }

    fn role_holders(&self, state: &StateTree, term: &str) -> Vec<Vrl> {
        Resolver::new(state, self.ontology)
            .read_field(&state.root(), term)
            .map(|value| value.refs().to_vec())
            .unwrap_or_default()
    }

    /// `true` while the root has no directors; roles are then read from the
    /// post-state of the event being validated.
    pub fn is_bootstrapping(&self, state: &StateTree) -> bool {
        self.role_holders(state, terms::DIRECTORS).is_empty()
    }

    /// A root field flagged `privileged` in the ontology changed between `pre`
    /// and `post`.
    fn is_privileged(&self, pre: &StateTree, post: &StateTree) -> bool {
        let before = Resolver::new(pre, self.ontology);
        let after = Resolver::new(post, self.ontology);
        self.ontology.privileged_terms().any(|(term, def)| {
            let old = before.read_field(&pre.root(), term);
            let new = after.read_field(&post.root(), term);
            if def.is_reference() {
                let ids = |value: Option<&FieldValue>| -> Vec<String> {
                    value.map_or_else(Vec::new, |value| {
                        value
                            .refs()
                            .iter()
                            .map(|vrl| vrl.raw_id().to_string())
                            .collect()
                    })
                };
                ids(old.as_ref()) != ids(new.as_ref())
            } else {
                let on = |value: Option<&FieldValue>| {
                    value.and_then(FieldValue::as_literal) == Some(&serde_json::Value::Bool(true))
                };
                on(old.as_ref()) && !on(new.as_ref())
            }
        })
    }
}

fn verify(public_key_hex: &str, signature_hex: &str, message: &[u8]) -> Option<Signature> {
    let key_bytes: [u8; 32] = hex::decode(public_key_hex).ok()?.try_into().ok()?;
    let key = VerifyingKey::from_bytes(&key_bytes).ok()?;
    let sig_bytes: [u8; 64] = hex::decode(signature_hex).ok()?.try_into().ok()?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(message, &signature).ok()?;
    Some(signature)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::delta::DeltaEngine;
    use serde_json::{json, Value};

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn directors_delta(name: &str, key: &SigningKey) -> Value {
        json!({
            "&+": {
                "id-alice": {
                    "@type": "Identity",
                    "publicIdentity": name,
                    "publicKey": hex::encode(key.verifying_key().to_bytes()),
                },
            },
            "directors": [{"@id": "~id-alice"}],
        })
    }

    fn bootstrap() -> (DeltaEngine, StateTree, EventEnvelope, SigningKey) {
        let engine = DeltaEngine::default();
        let alice = key(7);
        let pre = StateTree::new("chronicle");
        let envelope = EventEnvelope::new(0, "c0", directors_delta("alice", &alice));
        (engine, pre, envelope, alice)
    }

    #[test]
    fn first_director_can_bootstrap_itself() {
        let (engine, pre, mut envelope, alice) = bootstrap();
        let link = sign_envelope(&mut envelope, "alice", &alice, &ChainState::genesis()).unwrap();
        let post = engine.apply(&pre, &envelope.event.delta).unwrap().state;
        let validator = AuthorshipValidator::new(engine.ontology());
        let accepted = validator
            .validate(&pre, &post, &ChainState::genesis(), &envelope)
            .unwrap();
        assert_eq!(accepted, Some(link));
        assert_eq!(
            validator.registration(&post, "alice").map(|r| r.role),
            Some(Role::Director)
        );
    }

    #[test]
    fn failures_report_reason_and_index() {
        let (engine, pre, mut envelope, alice) = bootstrap();
        sign_envelope(&mut envelope, "alice", &alice, &ChainState::genesis()).unwrap();
        let post = engine.apply(&pre, &envelope.event.delta).unwrap().state;
        let validator = AuthorshipValidator::new(engine.ontology());
        let genesis = ChainState::genesis();

        let mut forged = envelope.clone();
        forged.command.id = "tampered".into();
        let err = validator.validate(&pre, &post, &genesis, &forged).unwrap_err();
        assert_eq!(err.reason, InvalidationReason::InvalidSignature);
        assert_eq!(err.index, 0);
        assert_eq!(err.to_string(), "invalid signature (event 0)");

        let mut stranger = envelope.clone();
        sign_envelope(&mut stranger, "mallory", &key(9), &genesis).unwrap();
        let err = validator.validate(&pre, &post, &genesis, &stranger).unwrap_err();
        assert_eq!(err.reason, InvalidationReason::NoIdentity);

        let mut rechained = envelope.clone();
        if let Some(author) = rechained.author.as_mut() {
            author.chain_hash = hex::encode([0u8; 32]);
        }
        let err = validator.validate(&pre, &post, &genesis, &rechained).unwrap_err();
        assert_eq!(err.reason, InvalidationReason::InvalidChainHash);

        let mut unsigned = envelope;
        unsigned.author = None;
        assert_eq!(
            validator.validate(&pre, &post, &genesis, &unsigned),
            Ok(None),
            "bootstrap without a requirement may stay unauthored"
        );
    }

    #[test]
    fn contributors_cannot_change_directors() {
        let (engine, pre, mut envelope, alice) = bootstrap();
        let genesis = ChainState::genesis();
        let link = sign_envelope(&mut envelope, "alice", &alice, &genesis).unwrap();
        let state = engine.apply(&pre, &envelope.event.delta).unwrap().state;
        let chain = genesis.advanced(link);

        let bob = key(8);
        let register = json!({
            "&+": {"id-bob": {
                "@type": "Identity",
                "publicIdentity": "bob",
                "publicKey": hex::encode(bob.verifying_key().to_bytes()),
            }},
            "contributors": [{"@id": "~id-bob"}],
        });
        let mut second = EventEnvelope::new(1, "c1", register);
        let link = sign_envelope(&mut second, "alice", &alice, &chain).unwrap();
        let validator = AuthorshipValidator::new(engine.ontology());
        let with_bob = engine.apply(&state, &second.event.delta).unwrap().state;
        validator.validate(&state, &with_bob, &chain, &second).unwrap();
        let chain = chain.advanced(link);

        let mut coup = EventEnvelope::new(2, "c2", json!({"directors": [{"@id": "~id-bob"}]}));
        sign_envelope(&mut coup, "bob", &bob, &chain).unwrap();
        let post = engine.apply(&with_bob, &coup.event.delta).unwrap().state;
        let err = validator.validate(&with_bob, &post, &chain, &coup).unwrap_err();
        assert_eq!(err.reason, InvalidationReason::IncongruentDirector);

        let mut unsigned = coup;
        unsigned.author = None;
        let err = validator.validate(&with_bob, &post, &chain, &unsigned).unwrap_err();
        assert_eq!(err.reason, InvalidationReason::AuthorAspectMissing);
    }

    #[test]
    fn privilege_follows_the_ontology_flags() {
        let (engine, pre, envelope, _) = bootstrap();
        let validator = AuthorshipValidator::new(engine.ontology());
        let state = engine.apply(&pre, &envelope.event.delta).unwrap().state;
        assert!(validator.is_bootstrapping(&pre));
        assert!(!validator.is_bootstrapping(&state));
        assert!(validator.is_privileged(&pre, &state));

        let strict = engine
            .apply(&state, &json!({"requireAuthoredEvents": true}))
            .unwrap()
            .state;
        assert!(!validator.is_privileged(&state, &strict));
        let relaxed = engine
            .apply(&strict, &json!({"requireAuthoredEvents": false}))
            .unwrap()
            .state;
        assert!(validator.is_privileged(&strict, &relaxed));
        let renamed = engine.apply(&strict, &json!({"name": "x"})).unwrap().state;
        assert!(!validator.is_privileged(&strict, &renamed));
    }

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(
            InvalidationReason::AuthorAspectMissing.to_string(),
            "author aspect missing"
        );
        assert_eq!(
            InvalidationReason::NoIdentity.as_str(),
            "no contributor/director identity found"
        );
        assert_eq!(
            InvalidationReason::IncongruentDirector.as_str(),
            "incongruent director identity"
        );
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Chronicle state machine: ordered ingestion, authorship checks, sealing.
//!
//! A chronicle is `Open` until an integrity violation arrives from a remote
//! peer (or [`Chronicle::freeze`] is called); from then on it is sealed and
//! every mutation is rejected without re-validation.
//!
//! Per event: index check, pure delta apply, authorship validation against the
//! pre- and post-state, then publication of the new snapshot. Nothing is
//! published unless every step succeeds.
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::author::{AuthorshipValidator, ChainState, Invalidation, InvalidationReason};
use crate::config::ChronicleConfig;
use crate::delta::{DeltaEngine, DeltaError, SideEffect};
use crate::envelope::EventEnvelope;
use crate::plot::PlotError;
use crate::state::StateTree;
use crate::store::{EventLogStore, LogStoreError};

/// Error taxonomy shared by every rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    /// Plot or locator parse failure; rejects the event.
    MalformedAddress,
    /// Illegal delta structure; rejects the event.
    StructuralViolation,
    /// Signature, chain or role failure; seals remote chronicles.
    IntegrityViolation,
    /// Mutation of a sealed or frozen chronicle.
    FrozenChronicleViolation,
}

/// Why an event was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChronicleError {
    /// The chronicle is sealed or frozen.
    #[error("chronicle '{chronicle_id}' is frozen")]
    Frozen {
        /// The chronicle.
        chronicle_id: String,
    },
    /// `log.index` is not the next index.
    #[error("out of order event: expected index {expected}, found {found}")]
    OutOfOrder {
        /// Next index the chronicle accepts.
        expected: u64,
        /// Index carried by the envelope.
        found: u64,
    },
    /// The delta was rejected.
    #[error("event {index} rejected: {source}")]
    Delta {
        /// `log.index` of the event.
        index: u64,
        /// Engine failure.
        #[source]
        source: DeltaError,
    },
    /// Authorship validation failed.
    #[error("integrity violation: {invalidation}")]
    Integrity {
        /// The failed check.
        invalidation: Invalidation,
        /// `true` when the failure sealed the chronicle.
        sealed: bool,
    },
    /// Invalid construction parameters.
    #[error("invalid chronicle config: {0}")]
    Config(#[from] PlotError),
    /// The event log failed.
    #[error(transparent)]
    Store(#[from] LogStoreError),
}

impl ChronicleError {
    /// Taxonomy bucket of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Frozen { .. } => ErrorClass::FrozenChronicleViolation,
            Self::Delta { source, .. } => source.class(),
            Self::Integrity { .. } => ErrorClass::IntegrityViolation,
            Self::Config(_) => ErrorClass::MalformedAddress,
            Self::OutOfOrder { .. } | Self::Store(_) => ErrorClass::StructuralViolation,
        }
    }
}

/// An applied event and the snapshot it produced.
#[derive(Clone, Debug)]
pub struct AcceptedEvent {
    /// The event.
    pub envelope: Arc<EventEnvelope>,
    /// Snapshot after the event.
    pub state: Arc<StateTree>,
    /// Linking side effects of the delta.
    pub effects: Arc<[SideEffect]>,
}

impl AcceptedEvent {
    /// `log.index` of the event.
    pub fn index(&self) -> u64 {
        self.envelope.log.index
    }
}

/// Author details carried by a sealed event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedAuthor {
    /// Antecedent claimed by the offending event.
    pub antecedent: Option<u64>,
    /// Identity claimed by the offending event.
    pub public_identity: String,
}

/// Synthetic `SEALED` pseudo-event emitted when a chronicle is quarantined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedEvent {
    /// The sealed chronicle.
    pub chronicle_id: String,
    /// `log.index` of the event that failed validation.
    pub invalid_antecedent_index: u64,
    /// What failed.
    pub invalidation_reason: InvalidationReason,
    /// Author aspect of the offending event, if it had one.
    pub author: Option<SealedAuthor>,
}

impl SealedEvent {
    /// JSON rendering with `"type": "SEALED"`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({ "type": "SEALED" });
        if let (Some(map), Ok(serde_json::Value::Object(fields))) =
            (value.as_object_mut(), serde_json::to_value(self))
        {
            map.extend(fields);
        }
        value
    }
}

/// Emitted to subscribers for every accepted event and on sealing.
#[derive(Clone, Debug)]
pub enum ChronicleEvent {
    /// An event was applied.
    Accepted(AcceptedEvent),
    /// The chronicle was sealed.
    Sealed(SealedEvent),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
}

/// One chronicle: current snapshot, chain position and lifecycle.
#[derive(Debug)]
pub struct Chronicle {
    config: ChronicleConfig,
    engine: DeltaEngine,
    state: Arc<StateTree>,
    next_index: u64,
    frozen: bool,
    seal: Option<SealedEvent>,
    chain: ChainState,
    subscribers: Vec<Sender<ChronicleEvent>>,
}

impl Chronicle {
    /// Empty chronicle with the built-in ontology.
    pub fn new(config: ChronicleConfig) -> Result<Self, ChronicleError> {
        Self::with_engine(config, DeltaEngine::default())
    }

    /// Empty chronicle applying deltas with `engine`.
    pub fn with_engine(config: ChronicleConfig, engine: DeltaEngine) -> Result<Self, ChronicleError> {
        config.validate()?;
        let mut state = StateTree::new(config.chronicle_id.as_str());
        if config.require_authored_events {
            let init = serde_json::json!({ "requireAuthoredEvents": true });
            state = engine
                .apply(&state, &init)
                .map_err(|source| ChronicleError::Delta { index: 0, source })?
                .state;
        }
        Ok(Self {
            config,
            engine,
            state: Arc::new(state),
            next_index: 0,
            frozen: false,
            seal: None,
            chain: ChainState::genesis(),
            subscribers: Vec::new(),
        })
    }

    /// Raw id of the root resource.
    pub fn id(&self) -> &str {
        &self.config.chronicle_id
    }

    /// Construction parameters.
    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    /// Current snapshot. Holders keep it alive across later events.
    pub fn current_state(&self) -> Arc<StateTree> {
        Arc::clone(&self.state)
    }

    /// Index the next event must carry.
    pub fn current_index(&self) -> u64 {
        self.next_index
    }

    /// Author chain position.
    pub fn chain(&self) -> ChainState {
        self.chain
    }

    /// Log index of the most recent accepted authored event.
    pub fn last_author_index(&self) -> Option<u64> {
        self.chain.last_author_index
    }

    /// `true` once sealed or frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The sealing record, if an integrity violation sealed the chronicle.
    pub fn seal(&self) -> Option<&SealedEvent> {
        self.seal.as_ref()
    }

    /// Freezes the chronicle. Irreversible.
    pub fn freeze(&mut self) {
        if !self.frozen {
            debug!(chronicle = %self.config.chronicle_id, "chronicle frozen");
        }
        self.frozen = true;
    }

    /// Receiver of every subsequent [`ChronicleEvent`].
    pub fn subscribe(&mut self) -> Receiver<ChronicleEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Applies locally authored events in order.
    ///
    /// Integrity failures reject the offending event without sealing; later
    /// envelopes are still attempted (and typically fail the index check).
    pub fn proclaim_events(
        &mut self,
        envelopes: impl IntoIterator<Item = EventEnvelope>,
    ) -> Vec<Result<AcceptedEvent, ChronicleError>> {
        envelopes
            .into_iter()
            .map(|envelope| self.ingest(envelope, Origin::Local))
            .collect()
    }

    /// Applies one event received from a remote peer. Integrity failures seal.
    pub fn receive(&mut self, envelope: EventEnvelope) -> Result<AcceptedEvent, ChronicleError> {
        self.ingest(envelope, Origin::Remote)
    }

    /// Replays `store` entries `from <= index < to` as remote events.
    ///
    /// Entries below the current index are skipped; replay stops at the first
    /// rejection.
    pub fn narrate_event_log(
        &mut self,
        store: &dyn EventLogStore,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<AcceptedEvent>, ChronicleError> {
        let envelopes = store.read_range(&self.config.chronicle_id, from, to)?;
        let mut accepted = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            if envelope.log.index < self.next_index {
                continue;
            }
            accepted.push(self.receive(envelope)?);
        }
        Ok(accepted)
    }

    fn ingest(
        &mut self,
        envelope: EventEnvelope,
        origin: Origin,
    ) -> Result<AcceptedEvent, ChronicleError> {
        if self.frozen {
            return Err(ChronicleError::Frozen {
                chronicle_id: self.config.chronicle_id.clone(),
            });
        }
        let index = envelope.log.index;
        if index != self.next_index {
            return Err(ChronicleError::OutOfOrder {
                expected: self.next_index,
                found: index,
            });
        }

        let applied = self.engine.apply(&self.state, &envelope.event.delta);
        let validator = AuthorshipValidator::new(self.engine.ontology());
        let verdict = match &applied {
            Ok(outcome) => {
                Some(validator.validate(&self.state, &outcome.state, &self.chain, &envelope))
            }
            // A bootstrap author registers itself in the delta that failed.
            Err(_) if validator.is_bootstrapping(&self.state) => None,
            Err(_) => {
                Some(validator.validate(&self.state, &self.state, &self.chain, &envelope))
            }
        };
        let link = match verdict {
            Some(Ok(link)) => link,
            Some(Err(invalidation)) => return Err(self.reject(&envelope, invalidation, origin)),
            None => None,
        };
        let outcome = applied.map_err(|source| {
            warn!(chronicle = %self.config.chronicle_id, index, error = %source, "delta rejected");
            ChronicleError::Delta { index, source }
        })?;

        if let Some(link) = link {
            self.chain = self.chain.advanced(link);
        }
        self.state = Arc::new(outcome.state);
        self.next_index += 1;
        let accepted = AcceptedEvent {
            envelope: Arc::new(envelope),
            state: Arc::clone(&self.state),
            effects: outcome.effects.into(),
        };
        debug!(
            chronicle = %self.config.chronicle_id,
            index,
            effects = accepted.effects.len(),
            authored = link.is_some(),
            "event accepted"
        );
        self.publish(&ChronicleEvent::Accepted(accepted.clone()));
        Ok(accepted)
    }

    fn reject(
        &mut self,
        envelope: &EventEnvelope,
        invalidation: Invalidation,
        origin: Origin,
    ) -> ChronicleError {
        if origin == Origin::Local {
            warn!(
                chronicle = %self.config.chronicle_id,
                index = invalidation.index,
                reason = %invalidation.reason,
                "proclaimed event rejected"
            );
            return ChronicleError::Integrity {
                invalidation,
                sealed: false,
            };
        }
        let sealed = SealedEvent {
            chronicle_id: self.config.chronicle_id.clone(),
            invalid_antecedent_index: invalidation.index,
            invalidation_reason: invalidation.reason,
            author: envelope.author.as_ref().map(|author| SealedAuthor {
                antecedent: author.antecedent,
                public_identity: author.public_identity.clone(),
            }),
        };
        warn!(
            chronicle = %self.config.chronicle_id,
            index = invalidation.index,
            reason = %invalidation.reason,
            "integrity violation, chronicle sealed"
        );
        self.frozen = true;
        self.seal = Some(sealed.clone());
        self.publish(&ChronicleEvent::Sealed(sealed));
        ChronicleError::Integrity {
            invalidation,
            sealed: true,
        }
    }

    fn publish(&mut self, event: &ChronicleEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A [`Chronicle`] behind a mutex: one writer at a time, snapshot readers unblocked.
#[derive(Debug)]
pub struct SharedChronicle {
    inner: Mutex<Chronicle>,
}

impl SharedChronicle {
    /// Wraps `chronicle`.
    pub fn new(chronicle: Chronicle) -> Self {
        Self {
            inner: Mutex::new(chronicle),
        }
    }

    // A panicking writer never leaves a half-applied event behind (state is
    // swapped in one assignment), so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Chronicle> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<StateTree> {
        self.lock().current_state()
    }

    /// `true` once sealed or frozen.
    pub fn is_frozen(&self) -> bool {
        self.lock().is_frozen()
    }

    /// See [`Chronicle::proclaim_events`].
    pub fn proclaim_events(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope>,
    ) -> Vec<Result<AcceptedEvent, ChronicleError>> {
        self.lock().proclaim_events(envelopes)
    }

    /// See [`Chronicle::receive`].
    pub fn receive(&self, envelope: EventEnvelope) -> Result<AcceptedEvent, ChronicleError> {
        self.lock().receive(envelope)
    }

    /// See [`Chronicle::subscribe`].
    pub fn subscribe(&self) -> Receiver<ChronicleEvent> {
        self.lock().subscribe()
    }

    /// Runs `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Chronicle) -> R) -> R {
        f(&mut self.lock())
    }

    /// Unwraps the chronicle.
    pub fn into_inner(self) -> Chronicle {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Envelope sequence builder.

use serde_json::Value;
use valos_chronicle::{sign_envelope, ChainState, EventEnvelope};

use crate::authors::TestAuthor;

/// Builds gapless envelope sequences, tracking the author chain like a chronicle would.
///
/// The builder assumes every envelope it produces gets accepted.
#[derive(Debug, Default)]
pub struct LogBuilder {
    envelopes: Vec<EventEnvelope>,
    chain: ChainState,
}

impl LogBuilder {
    /// Empty sequence starting at index 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, delta: Value) -> EventEnvelope {
        let index = self.envelopes.len() as u64;
        let mut envelope = EventEnvelope::new(index, format!("cmd-{index}"), delta);
        envelope.command.time_stamp = 1_700_000_000_000 + index;
        envelope.log.time_stamp = envelope.command.time_stamp;
        envelope
    }

    /// Appends an unsigned event.
    pub fn unsigned(&mut self, delta: Value) -> &mut Self {
        let envelope = self.next(delta);
        self.envelopes.push(envelope);
        self
    }

    /// Appends an event signed by `author`, continuing the chain.
    ///
    /// # Panics
    ///
    /// When the delta cannot be encoded for signing.
    #[allow(clippy::expect_used)]
    pub fn signed(&mut self, author: &TestAuthor, delta: Value) -> &mut Self {
        let mut envelope = self.next(delta);
        let link = sign_envelope(
            &mut envelope,
            author.public_identity(),
            author.signing_key(),
            &self.chain,
        )
        .expect("sign fixture envelope");
        self.chain = self.chain.advanced(link);
        self.envelopes.push(envelope);
        self
    }

    /// Chain position after the last signed event.
    pub fn chain(&self) -> ChainState {
        self.chain
    }

    /// Envelopes built so far.
    pub fn envelopes(&self) -> &[EventEnvelope] {
        &self.envelopes
    }

    /// Takes the envelopes.
    pub fn build(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deltas::bootstrap_director;
    use serde_json::json;

    #[test]
    fn antecedents_point_at_the_previous_signed_event() {
        let alice = TestAuthor::new("alice");
        let log = LogBuilder::new()
            .signed(&alice, bootstrap_director(&alice))
            .unsigned(json!({"name": "x"}))
            .signed(&alice, json!({"name": "y"}))
            .build();
        assert_eq!(log.len(), 3);
        let antecedents: Vec<_> = log
            .iter()
            .map(|e| e.author.as_ref().map(|a| a.antecedent))
            .collect();
        assert_eq!(antecedents, vec![Some(None), None, Some(Some(0))]);
    }

    #[test]
    fn signed_events_carry_the_author_and_advance_the_chain() {
        let alice = TestAuthor::new("alice");
        let mut builder = LogBuilder::new();
        builder.signed(&alice, bootstrap_director(&alice));
        let after_first = builder.chain();
        builder.signed(&alice, json!({"name": "x"}));
        assert_ne!(builder.chain(), after_first);
        assert_eq!(builder.chain().last_author_index, Some(1));
        assert!(builder
            .envelopes()
            .iter()
            .all(|e| e.author.as_ref().map(|a| a.public_identity.as_str()) == Some("alice")));
    }
}

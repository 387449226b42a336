// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end chronicle scenarios: sub-resource creation, authored-event
//! enforcement on both sides of the wire, plural reordering and role changes.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::{json, Value};
use valos_chronicle::{
    sign_envelope, Chronicle, ChronicleConfig, ChronicleError, ChronicleEvent, ErrorClass,
    EventEnvelope, FieldValue, InvalidationReason, StateTree,
};
use valos_dry_tests::{deltas, TestAuthor};

fn open(require_authored_events: bool) -> Chronicle {
    Chronicle::new(
        ChronicleConfig::new("chronicle").with_require_authored_events(require_authored_events),
    )
    .unwrap()
}

fn next(chronicle: &Chronicle, delta: Value) -> EventEnvelope {
    let index = chronicle.current_index();
    EventEnvelope::new(index, format!("cmd-{index}"), delta)
}

fn signed(chronicle: &Chronicle, author: &TestAuthor, delta: Value) -> EventEnvelope {
    let mut envelope = next(chronicle, delta);
    sign_envelope(
        &mut envelope,
        author.public_identity(),
        author.signing_key(),
        &chronicle.chain(),
    )
    .unwrap();
    envelope
}

fn proclaim_one(chronicle: &mut Chronicle, envelope: EventEnvelope) -> Result<(), ChronicleError> {
    chronicle
        .proclaim_events([envelope])
        .pop()
        .expect("one result per envelope")
        .map(|_| ())
}

fn literal(state: &StateTree, raw: &str, term: &str) -> Option<Value> {
    state.get(raw)?.field(term)?.as_literal().cloned()
}

fn ref_ids(state: &StateTree, raw: &str, term: &str) -> Vec<String> {
    state
        .get(raw)
        .and_then(|node| node.field(term))
        .map(|value| value.refs().iter().map(|v| v.raw_id().to_string()).collect())
        .unwrap_or_default()
}

#[test]
fn sub_resource_on_empty_state() {
    let mut chronicle = open(false);
    let delta = json!({"&~": {"1/": {"name": "X"}}});
    let accepted = chronicle.receive(next(&chronicle, delta)).unwrap();
    let state = chronicle.current_state();
    let entities: Vec<_> = state.resources_of_type("Entity").collect();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].id().raw_id(), "1/");
    assert_eq!(literal(&state, "1/", "name"), Some(json!("X")));
    assert!(!accepted.effects.is_empty());
}

#[test]
fn unauthored_event_is_rejected_locally_without_sealing() {
    let mut chronicle = open(true);
    let rx = chronicle.subscribe();
    let proclamation = next(&chronicle, json!({"name": "X"}));
    let err = proclaim_one(&mut chronicle, proclamation).unwrap_err();
    assert!(err.to_string().contains("author aspect missing"));
    assert_eq!(err.class(), ErrorClass::IntegrityViolation);
    assert!(!chronicle.is_frozen());
    assert!(chronicle.seal().is_none());
    assert!(rx.try_recv().is_err(), "no SEALED for a local rejection");
    assert_eq!(chronicle.current_index(), 0);
}

#[test]
fn unauthored_event_from_a_peer_seals() {
    let mut chronicle = open(true);
    let rx = chronicle.subscribe();
    let err = chronicle
        .receive(next(&chronicle, json!({"name": "X"})))
        .unwrap_err();
    assert!(matches!(err, ChronicleError::Integrity { sealed: true, .. }));
    assert!(chronicle.is_frozen());

    let Ok(ChronicleEvent::Sealed(sealed)) = rx.try_recv() else {
        panic!("expected SEALED");
    };
    assert_eq!(sealed.invalid_antecedent_index, 0);
    assert_eq!(sealed.invalidation_reason, InvalidationReason::AuthorAspectMissing);
    assert_eq!(sealed.author, None);
    assert_eq!(chronicle.seal(), Some(&sealed));

    let later = chronicle.receive(next(&chronicle, json!({}))).unwrap_err();
    assert_eq!(later.class(), ErrorClass::FrozenChronicleViolation);
}

#[test]
fn re_adding_a_reference_moves_it_to_the_end() {
    let mut chronicle = open(false);
    let first = json!({
        "&+": {"aa": {}, "bb": {}},
        "tags": [{"@id": "~aa"}, {"@id": "~bb"}],
    });
    chronicle.receive(next(&chronicle, first)).unwrap();
    let second = json!({"tags": [{"@id": "~aa"}]});
    chronicle.receive(next(&chronicle, second)).unwrap();
    let state = chronicle.current_state();
    assert_eq!(ref_ids(&state, "chronicle", "tags"), vec!["bb", "aa"]);
}

#[test]
fn director_and_contributor_lifecycle() {
    let alice = TestAuthor::new("alice");
    let bob = TestAuthor::new("bob");
    let mut chronicle = open(true);

    let bootstrap = signed(&chronicle, &alice, deltas::bootstrap_director(&alice));
    proclaim_one(&mut chronicle, bootstrap).unwrap();
    let hire = signed(&chronicle, &alice, deltas::add_contributor(&bob));
    proclaim_one(&mut chronicle, hire).unwrap();
    let edit = signed(&chronicle, &bob, json!({"&~": {"notes/": {"name": "by bob"}}}));
    proclaim_one(&mut chronicle, edit).unwrap();
    assert_eq!(chronicle.last_author_index(), Some(2));

    let coup = signed(&chronicle, &bob, deltas::require_authored_events(false));
    let err = proclaim_one(&mut chronicle, coup).unwrap_err();
    let ChronicleError::Integrity { invalidation, sealed } = err else {
        panic!("expected an integrity rejection");
    };
    assert_eq!(invalidation.reason, InvalidationReason::IncongruentDirector);
    assert!(!sealed);

    let relax = signed(&chronicle, &alice, deltas::require_authored_events(false));
    proclaim_one(&mut chronicle, relax).unwrap();
    let unsigned = next(&chronicle, json!({"name": "open for all"}));
    proclaim_one(&mut chronicle, unsigned).unwrap();

    let state = chronicle.current_state();
    assert_eq!(literal(&state, "chronicle", "name"), Some(json!("open for all")));
    assert_eq!(literal(&state, "notes/", "name"), Some(json!("by bob")));
    assert_eq!(
        state
            .get(&bob.resource_id())
            .and_then(|n| n.field("contributorOf").cloned())
            .map(|v| v.refs().len()),
        Some(1)
    );
    assert_eq!(chronicle.last_author_index(), Some(3));
}

#[test]
fn requirement_is_visible_on_the_root() {
    let chronicle = open(true);
    let state = chronicle.current_state();
    assert_eq!(
        state
            .get("chronicle")
            .and_then(|n| n.field("requireAuthoredEvents").cloned()),
        Some(FieldValue::Literal(json!(true)))
    );
}

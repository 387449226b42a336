// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshots stay valid while the chronicle moves on, and untouched parts of
//! the tree are shared between consecutive snapshots.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use valos_chronicle::{
    Chronicle, ChronicleConfig, ChronicleEvent, DeltaEngine, EventEnvelope, SharedChronicle,
    StateTree,
};

fn dump(state: &StateTree) -> Vec<Value> {
    state.iter().map(|node| node.to_json()).collect()
}

fn seeded() -> StateTree {
    let delta = json!({
        "&+": {
            "aa": {"name": "a"},
            "bb": {"name": "b"},
            "cc": {"name": "c"},
            "m1": {"@type": "Media", "name": "clip"},
        },
    });
    DeltaEngine::default()
        .apply(&StateTree::new("chronicle"), &delta)
        .unwrap()
        .state
}

#[test]
fn apply_leaves_the_input_untouched_and_shares_the_rest() {
    let engine = DeltaEngine::default();
    let before = seeded();
    let dumped = dump(&before);

    let after = engine
        .apply(&before, &json!({"&+": {"aa": {"name": "renamed"}}}))
        .unwrap()
        .state;

    assert_eq!(dump(&before), dumped);
    assert!(Arc::ptr_eq(
        before.type_table("Media").unwrap(),
        after.type_table("Media").unwrap()
    ));
    assert!(!Arc::ptr_eq(
        before.type_table("Entity").unwrap(),
        after.type_table("Entity").unwrap()
    ));
    assert!(Arc::ptr_eq(before.get("bb").unwrap(), after.get("bb").unwrap()));
    assert!(!Arc::ptr_eq(before.get("aa").unwrap(), after.get("aa").unwrap()));
    assert_eq!(
        after.get("aa").unwrap().field("name").unwrap().as_literal(),
        Some(&json!("renamed"))
    );
}

#[test]
fn failed_delta_changes_nothing() {
    let engine = DeltaEngine::default();
    let before = seeded();
    let dumped = dump(&before);
    let bad = json!({"&+": {"aa": {"name": "x"}}, "&~": {"missing/child/": {}}});
    assert!(engine.apply(&before, &bad).is_err());
    assert_eq!(dump(&before), dumped);
}

#[test]
fn readers_keep_their_snapshot_while_the_writer_advances() {
    let shared = SharedChronicle::new(Chronicle::new(ChronicleConfig::default()).unwrap());
    shared
        .receive(EventEnvelope::new(0, "cmd-0", json!({"name": "first"})))
        .unwrap();
    let rx = shared.subscribe();
    let held = shared.snapshot();

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for index in 1..=20_u64 {
                let delta = json!({ "name": format!("rev {index}") });
                shared
                    .receive(EventEnvelope::new(index, format!("cmd-{index}"), delta))
                    .unwrap();
            }
        });
        let reader = scope.spawn(|| {
            for _ in 0..50 {
                let name = held
                    .get("chronicle")
                    .and_then(|root| root.field("name"))
                    .and_then(|v| v.as_literal().cloned());
                assert_eq!(name, Some(json!("first")));
                let _ = shared.snapshot();
            }
        });
        writer.join().unwrap();
        reader.join().unwrap();
    });

    let accepted = rx
        .try_iter()
        .filter(|event| matches!(event, ChronicleEvent::Accepted(_)))
        .count();
    assert_eq!(accepted, 20);
    let latest = shared.snapshot();
    assert_eq!(
        latest.get("chronicle").unwrap().field("name").unwrap().as_literal(),
        Some(&json!("rev 20"))
    );
    assert_eq!(shared.into_inner().current_index(), 21);
}

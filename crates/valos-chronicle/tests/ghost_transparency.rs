// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Materializing any subset of ghosts, in any order, never changes what a
//! read returns, and a ghost once materialized stays materialized.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use serde_json::json;
use valos_chronicle::{
    immaterialize, materialize, DeltaEngine, FieldValue, IriLookup, Ontology, Plot, Resolver,
    StateTree, Vrl,
};

const GHOSTS: [&str; 4] = ["/inst/a/", "/inst/a/b/", "/inst2/a/", "/inst2/a/b/"];
const TERMS: [&str; 5] = ["name", "owner", "target", "ghostPrototype", "instancePrototype"];

fn fixture(engine: &DeltaEngine) -> StateTree {
    let deltas = [
        json!({"&~": {
            "proto/": {"name": "P"},
            "proto/a/": {"name": "A"},
            "proto/a/b/": {"@type": "Media", "name": "B"},
        }}),
        json!({"&~": {"proto/a/": {"target": {"@id": "/proto/a/b/"}}}}),
        json!({"&~": {"inst/": {"instancePrototype": {"@id": "/proto/"}}}}),
        json!({"&~": {"inst2/": {"instancePrototype": {"@id": "/inst/"}}}}),
    ];
    deltas
        .iter()
        .fold(StateTree::new("chronicle"), |state, delta| {
            engine.apply(&state, delta).unwrap().state
        })
}

fn ghost(state: &StateTree, ontology: &Ontology, path: &str) -> Vrl {
    let plot = Plot::parse_path(path, &IriLookup::new()).unwrap();
    Resolver::new(state, ontology)
        .resolve_plot(&state.root(), &plot)
        .unwrap_or_else(|| panic!("{path} resolves"))
}

type Reads = Vec<(String, Option<String>, Vec<Option<FieldValue>>)>;

fn observe(state: &StateTree, ontology: &Ontology) -> Reads {
    let resolver = Resolver::new(state, ontology);
    GHOSTS
        .iter()
        .map(|path| {
            let vrl = ghost(state, ontology, path);
            let fields = TERMS.iter().map(|t| resolver.read_field(&vrl, t)).collect();
            let type_name = resolver.type_of(&vrl).map(|t| t.to_string());
            (vrl.raw_id().to_string(), type_name, fields)
        })
        .collect()
}

#[test]
fn fixture_ghosts_are_immaterial_and_inherit() {
    let engine = DeltaEngine::default();
    let state = fixture(&engine);
    let ontology = engine.ontology();
    for path in GHOSTS {
        let vrl = ghost(&state, ontology, path);
        assert!(vrl.is_ghost(), "{path}");
        assert!(!state.contains(vrl.raw_id()), "{path}");
    }
    let resolver = Resolver::new(&state, ontology);
    let deep = ghost(&state, ontology, "/inst2/a/b/");
    assert_eq!(
        resolver.read_field(&deep, "name"),
        Some(FieldValue::Literal(json!("B")))
    );
    assert_eq!(resolver.type_of(&deep).as_deref(), Some("Media"));
    let target = resolver.read_field(&ghost(&state, ontology, "/inst2/a/"), "target");
    assert_eq!(
        target.as_ref().and_then(FieldValue::as_vrl).map(Vrl::raw_id),
        Some(deep.raw_id())
    );
}

#[test]
fn immaterializing_leaves_ownlings_materialized() {
    let engine = DeltaEngine::default();
    let ontology = engine.ontology();
    let mut state = fixture(&engine);
    let baseline = observe(&state, ontology);
    let a = ghost(&state, ontology, "/inst/a/");
    let b = ghost(&state, ontology, "/inst/a/b/");
    materialize(&mut state, ontology, &a).unwrap();
    materialize(&mut state, ontology, &b).unwrap();

    immaterialize(&mut state, ontology, &a).unwrap();
    assert!(!state.contains(a.raw_id()));
    assert!(state.contains(b.raw_id()));
    assert_eq!(observe(&state, ontology), baseline);
}

proptest! {
    #[test]
    fn materialization_is_monotonic_and_never_changes_reads(
        order in Just((0..GHOSTS.len()).collect::<Vec<_>>()).prop_shuffle(),
        picked in prop::collection::vec(any::<bool>(), GHOSTS.len()),
    ) {
        let engine = DeltaEngine::default();
        let ontology = engine.ontology();
        let mut state = fixture(&engine);
        let baseline = observe(&state, ontology);

        let mut materialized: Vec<String> = Vec::new();
        for i in order.into_iter().filter(|&i| picked[i]) {
            let vrl = ghost(&state, ontology, GHOSTS[i]);
            materialize(&mut state, ontology, &vrl).unwrap();
            materialized.push(vrl.raw_id().to_string());
            for raw_id in &materialized {
                prop_assert!(state.contains(raw_id), "{} was dematerialized", raw_id);
            }
            prop_assert_eq!(&observe(&state, ontology), &baseline);
        }
    }
}

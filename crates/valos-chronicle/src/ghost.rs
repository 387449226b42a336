// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ghost resolution: structural lookup, inherited reads and (im)materialization.
//!
//! An instance `I` of a prototype `P` sees a ghost for every resource `R`
//! owned (transitively) by `P`. The ghost's identity is
//! `Vrl::ghost_of(R, P, I)`; it has no state entry until something writes to
//! it. Reads go, in order, through:
//!
//! 1. the own entry, when materialized,
//! 2. the ghost prototype (recursively), elevating references into `I`,
//! 3. the instance prototype chain for inherited terms,
//! 4. the term's default.
//!
//! Materializing stores exactly the values a read would have computed, so
//! reads never depend on which ancestors happen to be materialized.
use std::sync::Arc;

use thiserror::Error;

use crate::locator::Vrl;
use crate::ontology::{terms, Ontology};
use crate::plot::{escape_literal, Plot, PlotBase, PlotStep};
use crate::state::{FieldValue, ResourceNode, StateTree, DEFAULT_TYPE};

/// Bound on owner/prototype walks; deeper chains are treated as unresolvable.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Materialization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GhostError {
    /// The locator does not denote a ghost.
    #[error("'{raw_id}' is not a ghost")]
    NotAGhost {
        /// Raw id of the resource.
        raw_id: String,
    },
    /// Immaterialize on a ghost without an entry.
    #[error("ghost '{raw_id}' is not materialized")]
    NotMaterialized {
        /// Raw id of the ghost.
        raw_id: String,
    },
    /// A `prevents_destroy` field still holds references.
    #[error("'{raw_id}' still has references in '{term}'")]
    PreventsDestroy {
        /// Raw id of the resource.
        raw_id: String,
        /// The blocking field.
        term: String,
    },
}

/// Raw id of the structural child `segment` of `parent_raw`.
///
/// Children of the chronicle root are `seg/`; children of path-shaped ids
/// extend the path; anything else is anchored as `~parent/seg/`.
pub fn child_raw_id(state: &StateTree, parent_raw: &str, segment: &str) -> String {
    let segment = escape_literal(segment);
    if parent_raw == state.root_raw_id() {
        format!("{segment}/")
    } else if parent_raw.ends_with('/') {
        format!("{parent_raw}{segment}/")
    } else {
        format!("~{parent_raw}/{segment}/")
    }
}

/// Text of a child step: literals as-is, indices as their bound IRI.
pub fn segment_text(state: &StateTree, step: &PlotStep) -> Option<String> {
    match step {
        PlotStep::Literal(text) => Some(text.clone()),
        PlotStep::Index(index) => Some(
            state
                .lookup()
                .get(*index)
                .map_or_else(|| index.to_string(), str::to_string),
        ),
        PlotStep::Parent => None,
    }
}

/// Read-only view that resolves ghosts over one snapshot.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    state: &'a StateTree,
    ontology: &'a Ontology,
}

impl<'a> Resolver<'a> {
    /// Resolver over `state`.
    pub fn new(state: &'a StateTree, ontology: &'a Ontology) -> Self {
        Self { state, ontology }
    }

    /// Best locator for `raw_id`: the stored id (with ghost path) or a bare locator.
    pub fn locate(&self, raw_id: &str) -> Vrl {
        self.state
            .get(raw_id)
            .map_or_else(|| Vrl::new(raw_id), |node| node.id().clone())
    }

    /// `true` for the root, resources with entries, and ghosts whose prototype exists.
    pub fn exists(&self, vrl: &Vrl) -> bool {
        self.exists_at(vrl, 0)
    }

    fn exists_at(&self, vrl: &Vrl, depth: usize) -> bool {
        if self.state.contains(vrl.raw_id()) || vrl.raw_id() == self.state.root_raw_id() {
            return true;
        }
        if depth >= MAX_CHAIN_DEPTH {
            return false;
        }
        vrl.ghost_prototype()
            .is_some_and(|proto| self.exists_at(&proto, depth + 1))
    }

    /// Type of `vrl`, following ghost prototypes for immaterial ghosts.
    pub fn type_of(&self, vrl: &Vrl) -> Option<Arc<str>> {
        let mut current = vrl.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            if let Some(node) = self.state.get(current.raw_id()) {
                return Some(Arc::from(node.type_name()));
            }
            current = current.ghost_prototype()?;
        }
        None
    }

    /// Resolves the child `segment` of `parent`, discovering ghosts of prototype ownlings.
    pub fn resolve_child(&self, parent: &Vrl, segment: &str) -> Option<Vrl> {
        self.resolve_child_at(parent, segment, 0)
    }

    fn resolve_child_at(&self, parent: &Vrl, segment: &str, depth: usize) -> Option<Vrl> {
        let raw = child_raw_id(self.state, parent.raw_id(), segment);
        if let Some(node) = self.state.get(&raw) {
            return Some(node.id().clone());
        }
        if depth >= MAX_CHAIN_DEPTH {
            return None;
        }
        if parent.is_ghost() {
            let step = parent.ghost_path()?.last_step()?;
            let proto = parent.ghost_prototype()?;
            let proto_child = self.resolve_child_at(&proto, segment, depth + 1)?;
            return Some(Vrl::ghost_of(
                &proto_child,
                &step.prototype_raw_id,
                &step.instance_raw_id,
            ));
        }
        let proto = self
            .state
            .get(parent.raw_id())?
            .field(terms::INSTANCE_PROTOTYPE)?
            .as_vrl()?
            .without_coupling();
        let proto_child = self.resolve_child_at(&proto, segment, depth + 1)?;
        Some(Vrl::ghost_of(&proto_child, proto.raw_id(), parent.raw_id()))
    }

    /// Resolves a path plot relative to `base`. Every step must resolve.
    pub fn resolve_plot(&self, base: &Vrl, plot: &Plot) -> Option<Vrl> {
        let mut current = match plot.base() {
            PlotBase::Relative => base.clone(),
            PlotBase::Root => self.state.root(),
            PlotBase::Resource(raw) => {
                let vrl = self.locate(raw);
                if !self.exists(&vrl) {
                    return None;
                }
                vrl
            }
        };
        for step in plot.steps() {
            current = match step {
                PlotStep::Parent => self.owner_of(&current)?,
                _ => {
                    let segment = segment_text(self.state, step)?;
                    self.resolve_child(&current, &segment)?
                }
            };
        }
        Some(current)
    }

    /// Owner of `vrl` (without its coupling).
    pub fn owner_of(&self, vrl: &Vrl) -> Option<Vrl> {
        match self.read_field(vrl, terms::OWNER)? {
            FieldValue::Ref(owner) => Some(owner.without_coupling()),
            _ => None,
        }
    }

    /// `true` when `vrl` is owned, directly or transitively, by `ancestor_raw`.
    pub fn is_owned_by(&self, vrl: &Vrl, ancestor_raw: &str) -> bool {
        let mut current = vrl.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            match self.owner_of(&current) {
                Some(owner) if owner.raw_id() == ancestor_raw => return true,
                Some(owner) => current = owner,
                None => return false,
            }
        }
        false
    }

    /// Reads `term` on `vrl` through the ghost and prototype chains.
    pub fn read_field(&self, vrl: &Vrl, term: &str) -> Option<FieldValue> {
        self.read_at(vrl, term, 0)
            .or_else(|| self.ontology.def(term).default.clone().map(FieldValue::Literal))
    }

    fn read_at(&self, vrl: &Vrl, term: &str, depth: usize) -> Option<FieldValue> {
        if depth >= MAX_CHAIN_DEPTH {
            return None;
        }
        let node = self.state.get(vrl.raw_id());
        if let Some(value) = node.and_then(|n| n.field(term)) {
            return Some(value.clone());
        }
        let id = node.map_or_else(|| vrl.clone(), |n| n.id().clone());
        if id.is_ghost() {
            let proto = id.ghost_prototype()?;
            if term == terms::GHOST_PROTOTYPE {
                return Some(FieldValue::Ref(proto));
            }
            let step = id.ghost_path()?.last_step()?;
            let instance = self.locate(&step.instance_raw_id);
            let inherited = self.read_at(&proto, term, depth + 1)?;
            return Some(self.elevate(inherited, &step.prototype_raw_id, &instance));
        }
        if !self.ontology.def(term).inherited {
            return None;
        }
        let proto = node?
            .field(terms::INSTANCE_PROTOTYPE)?
            .as_vrl()?
            .without_coupling();
        let inherited = self.read_at(&proto, term, depth + 1)?;
        Some(self.elevate(inherited, proto.raw_id(), &id))
    }

    /// Maps references into the prototype's ownership subtree onto their ghosts in `instance`.
    fn elevate(&self, value: FieldValue, prototype_raw: &str, instance: &Vrl) -> FieldValue {
        let lift = |vrl: &Vrl| -> Vrl {
            let lifted = if vrl.raw_id() == prototype_raw {
                instance.without_coupling()
            } else if self.is_owned_by(vrl, prototype_raw) {
                Vrl::ghost_of(&vrl.without_coupling(), prototype_raw, instance.raw_id())
            } else {
                return vrl.clone();
            };
            match vrl.coupled_field() {
                Some(field) => lifted.with_coupling(field),
                None => lifted,
            }
        };
        match value {
            FieldValue::Literal(_) => value,
            FieldValue::Ref(vrl) => FieldValue::Ref(lift(&vrl)),
            FieldValue::Refs(list) => FieldValue::Refs(Arc::new(list.iter().map(lift).collect())),
        }
    }
}

/// Gives `ghost` its own entry, materializing ghost-prototype ancestors first.
///
/// Returns the ghosts that were materialized, outermost prototype first.
/// The owner is never materialized: ownership and ghost-prototype-hood are
/// independent.
pub fn materialize(
    state: &mut StateTree,
    ontology: &Ontology,
    ghost: &Vrl,
) -> Result<Vec<Vrl>, GhostError> {
    if !ghost.is_ghost() {
        return Err(GhostError::NotAGhost {
            raw_id: ghost.raw_id().to_string(),
        });
    }
    let mut created = Vec::new();
    materialize_into(state, ontology, &ghost.without_coupling(), &mut created, 0)?;
    Ok(created)
}

fn materialize_into(
    state: &mut StateTree,
    ontology: &Ontology,
    ghost: &Vrl,
    created: &mut Vec<Vrl>,
    depth: usize,
) -> Result<(), GhostError> {
    if state.contains(ghost.raw_id()) || depth >= MAX_CHAIN_DEPTH {
        return Ok(());
    }
    let Some(proto) = ghost.ghost_prototype() else {
        return Err(GhostError::NotAGhost {
            raw_id: ghost.raw_id().to_string(),
        });
    };
    if proto.is_ghost() {
        materialize_into(state, ontology, &proto, created, depth + 1)?;
    }
    let resolver = Resolver::new(state, ontology);
    let owner = resolver.read_field(ghost, terms::OWNER);
    let type_name = resolver
        .type_of(&proto)
        .unwrap_or_else(|| Arc::from(DEFAULT_TYPE));

    let mut node = ResourceNode::new(type_name, ghost.clone());
    node.set_field(terms::GHOST_PROTOTYPE, FieldValue::Ref(proto));
    if let Some(owner) = owner {
        node.set_field(terms::OWNER, owner);
    }
    state.insert(node);
    tracing::debug!(raw_id = ghost.raw_id(), "materialized ghost");
    created.push(ghost.clone());
    Ok(())
}

/// Drops the entry of a materialized ghost so reads fall back to its prototype.
///
/// Fails while any `prevents_destroy` field of the entry holds references.
/// Reverse couplings are removed from targets that have entries; ownlings
/// and other targets are never touched.
pub fn immaterialize(
    state: &mut StateTree,
    ontology: &Ontology,
    ghost: &Vrl,
) -> Result<(), GhostError> {
    if !ghost.is_ghost() {
        return Err(GhostError::NotAGhost {
            raw_id: ghost.raw_id().to_string(),
        });
    }
    let Some(node) = state.get(ghost.raw_id()).cloned() else {
        return Err(GhostError::NotMaterialized {
            raw_id: ghost.raw_id().to_string(),
        });
    };
    if let Some((term, _)) = node
        .fields()
        .find(|(term, value)| ontology.def(term).prevents_destroy && !value.refs().is_empty())
    {
        return Err(GhostError::PreventsDestroy {
            raw_id: ghost.raw_id().to_string(),
            term: term.to_string(),
        });
    }
    state.remove_entry(ghost.raw_id());
    for (term, value) in node.fields() {
        let Some(reverse) = ontology.def(term).coupled else {
            continue;
        };
        for target in value.refs() {
            remove_reference(state, target.raw_id(), reverse, ghost.raw_id());
        }
    }
    tracing::debug!(raw_id = ghost.raw_id(), "immaterialized ghost");
    Ok(())
}

/// Removes `referrer_raw` from `term` on the entry of `target_raw`, if any.
pub(crate) fn remove_reference(
    state: &mut StateTree,
    target_raw: &str,
    term: &str,
    referrer_raw: &str,
) -> bool {
    state
        .update(target_raw, |node| match node.field(term) {
            Some(FieldValue::Ref(vrl)) if vrl.raw_id() == referrer_raw => {
                node.remove_field(term);
                true
            }
            Some(FieldValue::Refs(list)) if list.iter().any(|v| v.raw_id() == referrer_raw) => {
                let kept: Vec<Vrl> = list
                    .iter()
                    .filter(|v| v.raw_id() != referrer_raw)
                    .cloned()
                    .collect();
                node.set_field(term, FieldValue::Refs(Arc::new(kept)));
                true
            }
            _ => false,
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    /// Prototype `proto/` owning `proto/a/` owning `proto/a/b/`; `inst/` instantiates `proto/`.
    fn fixture() -> (StateTree, Ontology) {
        let ontology = Ontology::valospace();
        let mut state = StateTree::new("chronicle");
        let root = state.root();
        let proto = Vrl::new("proto/");
        let a = Vrl::new("proto/a/");
        let b = Vrl::new("proto/a/b/");

        let mut node = ResourceNode::new("Entity", proto.clone());
        node.set_field("owner", FieldValue::Ref(root.with_coupling("ownlings")));
        node.set_field("name", FieldValue::Literal(json!("P")));
        state.insert(node);

        let mut node = ResourceNode::new("Entity", a.clone());
        node.set_field("owner", FieldValue::Ref(proto.with_coupling("ownlings")));
        node.set_field("name", FieldValue::Literal(json!("A")));
        node.set_field("target", FieldValue::Ref(b.with_coupling("targetOf")));
        state.insert(node);

        let mut node = ResourceNode::new("Media", b.clone());
        node.set_field("owner", FieldValue::Ref(a.with_coupling("ownlings")));
        node.set_field("name", FieldValue::Literal(json!("B")));
        state.insert(node);

        let inst = Vrl::instance_of(&Vrl::new("inst/"), &proto);
        let mut node = ResourceNode::new("Entity", inst);
        node.set_field("owner", FieldValue::Ref(root.with_coupling("ownlings")));
        node.set_field(
            "instancePrototype",
            FieldValue::Ref(proto.with_coupling("instances")),
        );
        state.insert(node);
        (state, ontology)
    }

    #[test]
    fn children_of_instances_are_ghosts() {
        let (state, ontology) = fixture();
        let resolver = Resolver::new(&state, &ontology);
        let inst = resolver.locate("inst/");
        let ghost_a = resolver.resolve_child(&inst, "a").unwrap();
        assert!(ghost_a.is_ghost());
        assert_eq!(ghost_a.ghost_prototype().unwrap().raw_id(), "proto/a/");
        let ghost_b = resolver.resolve_child(&ghost_a, "b").unwrap();
        assert_eq!(ghost_b.ghost_prototype().unwrap().raw_id(), "proto/a/b/");
        assert!(resolver.resolve_child(&inst, "zz").is_none());
    }

    #[test]
    fn ghost_reads_elevate_into_the_instance() {
        let (state, ontology) = fixture();
        let resolver = Resolver::new(&state, &ontology);
        let inst = resolver.locate("inst/");
        let ghost_a = resolver.resolve_child(&inst, "a").unwrap();
        let ghost_b = resolver.resolve_child(&ghost_a, "b").unwrap();

        assert_eq!(
            resolver.read_field(&ghost_a, "name"),
            Some(FieldValue::Literal(json!("A")))
        );
        assert_eq!(resolver.owner_of(&ghost_a).unwrap().raw_id(), "inst/");
        assert_eq!(resolver.owner_of(&ghost_b).unwrap(), ghost_a);
        let target = resolver.read_field(&ghost_a, "target").unwrap();
        assert_eq!(target.as_vrl().unwrap().raw_id(), ghost_b.raw_id());
        assert_eq!(target.as_vrl().unwrap().coupled_field(), Some("targetOf"));
        assert_eq!(resolver.type_of(&ghost_b).as_deref(), Some("Media"));
    }

    #[test]
    fn instances_inherit_only_inherited_terms() {
        let (state, ontology) = fixture();
        let resolver = Resolver::new(&state, &ontology);
        let inst = resolver.locate("inst/");
        assert_eq!(
            resolver.read_field(&inst, "name"),
            Some(FieldValue::Literal(json!("P")))
        );
        assert_eq!(resolver.owner_of(&inst).unwrap().raw_id(), "chronicle");
        assert_eq!(resolver.read_field(&inst, "ownlings"), None);
    }

    #[test]
    fn materialization_is_transparent_and_local() {
        let (mut state, ontology) = fixture();
        let (ghost_a, ghost_b) = {
            let resolver = Resolver::new(&state, &ontology);
            let inst = resolver.locate("inst/");
            let a = resolver.resolve_child(&inst, "a").unwrap();
            let b = resolver.resolve_child(&a, "b").unwrap();
            (a, b)
        };
        let before: Vec<_> = ["name", "owner", "target", "ghostPrototype"]
            .iter()
            .map(|t| Resolver::new(&state, &ontology).read_field(&ghost_b, t))
            .collect();

        let created = materialize(&mut state, &ontology, &ghost_b).unwrap();
        assert_eq!(created, vec![ghost_b.clone()]);
        assert!(!state.contains(ghost_a.raw_id()), "owner stays immaterial");
        assert!(materialize(&mut state, &ontology, &ghost_b).unwrap().is_empty());

        let after: Vec<_> = ["name", "owner", "target", "ghostPrototype"]
            .iter()
            .map(|t| Resolver::new(&state, &ontology).read_field(&ghost_b, t))
            .collect();
        assert_eq!(before, after);

        immaterialize(&mut state, &ontology, &ghost_b).unwrap();
        assert!(!state.contains(ghost_b.raw_id()));
        assert!(matches!(
            immaterialize(&mut state, &ontology, &ghost_b),
            Err(GhostError::NotMaterialized { .. })
        ));
    }

    #[test]
    fn immaterialize_respects_prevents_destroy() {
        let (mut state, ontology) = fixture();
        let ghost_a = {
            let resolver = Resolver::new(&state, &ontology);
            resolver.resolve_child(&resolver.locate("inst/"), "a").unwrap()
        };
        materialize(&mut state, &ontology, &ghost_a).unwrap();
        state.update(ghost_a.raw_id(), |node| {
            node.set_field(
                "ownlings",
                FieldValue::Refs(Arc::new(vec![Vrl::new("extra/").with_coupling("owner")])),
            );
        });
        assert!(matches!(
            immaterialize(&mut state, &ontology, &ghost_a),
            Err(GhostError::PreventsDestroy { .. })
        ));
        assert!(matches!(
            materialize(&mut state, &ontology, &Vrl::new("proto/")),
            Err(GhostError::NotAGhost { .. })
        ));
    }

    #[test]
    fn child_ids_follow_the_parent_shape() {
        let state = StateTree::new("chronicle");
        assert_eq!(child_raw_id(&state, "chronicle", "1"), "1/");
        assert_eq!(child_raw_id(&state, "1/", "x y"), "1/x%20y/");
        assert_eq!(child_raw_id(&state, "abc", "x"), "~abc/x/");
    }
}

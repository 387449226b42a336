// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delta application engine.
//!
//! A delta is a JSON object. Reserved keys per node:
//!
//! - `@context`: index table merged into the chronicle IRI lookup (top level only)
//! - `@type`: type of a resource created by this node
//! - `&+`: global resources keyed by raw id (top level only)
//! - `&~`: sub-resources keyed by plot relative to the node's resource
//! - `&-`: removals (`{"term": value}`; `{"&~": [plot, ...]}` destroys)
//!
//! Every other key upserts a field. Reference values are `{"@id": plot}`
//! (or `{"@id": [locator tuple]}`); plural fields take an array of them.
//!
//! Application runs two passes over the whole delta, removals first, so a
//! remove and re-add of the same reference in one delta nets to a move.
//! [`DeltaEngine::apply`] is pure: the input tree is never mutated and the
//! output shares every untouched subtree with it.
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::chronicle::ErrorClass;
use crate::ghost::{self, child_raw_id, segment_text, GhostError, Resolver};
use crate::locator::{LocatorError, Vrl};
use crate::ontology::{terms, FieldKind, Ontology};
use crate::plot::{is_valid_resource_id, Plot, PlotError};
use crate::state::{FieldValue, ResourceNode, StateTree, DEFAULT_TYPE, ROOT_TYPE};

const CONTEXT: &str = "@context";
const TYPE: &str = "@type";
const ID: &str = "@id";
const GLOBALS: &str = "&+";
const SUB_RESOURCES: &str = "&~";
const REMOVALS: &str = "&-";

/// Errors that reject a single delta.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// A plot key or reference failed to parse.
    #[error(transparent)]
    Plot(#[from] PlotError),
    /// A locator tuple failed to decode.
    #[error(transparent)]
    Locator(#[from] LocatorError),
    /// Ghost (im)materialization failed.
    #[error(transparent)]
    Ghost(#[from] GhostError),
    /// The delta does not have the expected shape.
    #[error("malformed delta: {0}")]
    Malformed(String),
    /// An intermediate step of a multi-step sub-resource key does not exist.
    #[error("missing ancestor resource for '{plot}'")]
    MissingAncestor {
        /// The offending key.
        plot: String,
    },
    /// A sub-resource section nested more than one level under its owner.
    #[error("sub-resource section under '{plot}' nests more than one level; address it relative to its parent instead")]
    IllegalNesting {
        /// Key of the node carrying the nested section.
        plot: String,
    },
    /// Direct write to a term maintained only through its coupled forward field.
    #[error("'{term}' is inferred and cannot be manipulated directly")]
    InferredField {
        /// The term.
        term: String,
    },
    /// A reference field got something other than `{"@id": ...}`.
    #[error("'{term}' expects a reference value {{\"@id\": plot}}")]
    ExpectedReference {
        /// The term.
        term: String,
    },
    /// A reference or key names a resource that does not exist.
    #[error("unknown resource '{plot}'")]
    UnknownResource {
        /// The plot or raw id that failed to resolve.
        plot: String,
    },
    /// Destruction blocked by a `prevents_destroy` field.
    #[error("'{raw_id}' cannot be destroyed while '{term}' has references")]
    PreventsDestroy {
        /// Raw id of the resource.
        raw_id: String,
        /// The blocking field.
        term: String,
    },
}

impl DeltaError {
    /// Taxonomy bucket of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Plot(_) | Self::Locator(_) => ErrorClass::MalformedAddress,
            _ => ErrorClass::StructuralViolation,
        }
    }
}

/// Plural reorder behaviour when an element is already present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReorderPolicy {
    /// Re-adding moves the element to the end.
    MoveToEnd,
    /// Re-adding keeps the current position (coupling-driven updates).
    Preserve,
}

/// Linking side effect reported alongside a new state.
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    /// A resource entry was created.
    Created {
        /// The new resource.
        id: Vrl,
        /// Its type.
        type_name: Arc<str>,
    },
    /// A resource entry was destroyed.
    Destroyed {
        /// The destroyed resource.
        id: Vrl,
    },
    /// A ghost got its own entry.
    Materialized {
        /// The ghost.
        id: Vrl,
    },
    /// A ghost entry was dropped.
    Immaterialized {
        /// The ghost.
        id: Vrl,
    },
    /// `source` was added to the reverse field `term` of `target`.
    Coupled {
        /// The referrer.
        source: Vrl,
        /// Reverse term updated on `target`.
        term: Arc<str>,
        /// The referenced resource.
        target: Vrl,
    },
    /// `source` was removed from the reverse field `term` of `target`.
    Decoupled {
        /// The former referrer.
        source: Vrl,
        /// Reverse term updated on `target`.
        term: Arc<str>,
        /// The referenced resource.
        target: Vrl,
    },
}

/// Result of a successful apply.
#[derive(Clone, Debug)]
pub struct ApplyOutcome {
    /// The new snapshot.
    pub state: StateTree,
    /// Linking side effects in application order.
    pub effects: Vec<SideEffect>,
}

/// Applies deltas against a fixed ontology.
#[derive(Clone, Debug)]
pub struct DeltaEngine {
    ontology: Arc<Ontology>,
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self::new(Arc::new(Ontology::valospace()))
    }
}

impl DeltaEngine {
    /// Engine dispatching through `ontology`.
    pub fn new(ontology: Arc<Ontology>) -> Self {
        Self { ontology }
    }

    /// The dispatch table.
    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    /// Applies `delta` to `state`, returning the new snapshot and its side effects.
    pub fn apply(&self, state: &StateTree, delta: &Value) -> Result<ApplyOutcome, DeltaError> {
        let delta = delta
            .as_object()
            .ok_or_else(|| DeltaError::Malformed("delta must be an object".into()))?;
        let mut run = Apply {
            ontology: &self.ontology,
            state: state.clone(),
            effects: Vec::new(),
        };
        if let Some(context) = delta.get(CONTEXT) {
            run.state.lookup_mut().merge_context(context)?;
        }
        let root = run.state.root();
        for pass in [Pass::Removals, Pass::Upserts] {
            run.walk(pass, &root, delta, Level::Top, "")?;
        }
        Ok(ApplyOutcome {
            state: run.state,
            effects: run.effects,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    Removals,
    Upserts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    /// The delta itself.
    Top,
    /// A global resource node.
    Global,
    /// A node inside a sub-resource section.
    Nested,
}

struct Apply<'e> {
    ontology: &'e Ontology,
    state: StateTree,
    effects: Vec<SideEffect>,
}

fn as_object<'v>(value: &'v Value, what: &str) -> Result<&'v Map<String, Value>, DeltaError> {
    value
        .as_object()
        .ok_or_else(|| DeltaError::Malformed(format!("{what} must be an object")))
}

impl Apply<'_> {
    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.state, self.ontology)
    }

    fn walk(
        &mut self,
        pass: Pass,
        target: &Vrl,
        node: &Map<String, Value>,
        level: Level,
        at: &str,
    ) -> Result<(), DeltaError> {
        for (key, value) in node {
            match key.as_str() {
                CONTEXT if level == Level::Top => {}
                CONTEXT => {
                    return Err(DeltaError::Malformed(format!(
                        "@context is only legal at the top level (found under '{at}')"
                    )))
                }
                TYPE => {}
                GLOBALS if level == Level::Top => {
                    for (raw, body) in as_object(value, GLOBALS)? {
                        if !is_valid_resource_id(raw) {
                            return Err(PlotError::InvalidResourceId { id: raw.clone() }.into());
                        }
                        let body = as_object(body, raw)?;
                        let vrl = match pass {
                            Pass::Upserts => self.ensure_global(raw, body)?,
                            Pass::Removals if self.state.contains(raw) => self.resolver().locate(raw),
                            Pass::Removals => continue,
                        };
                        self.walk(pass, &vrl, body, Level::Global, raw)?;
                    }
                }
                GLOBALS => {
                    return Err(DeltaError::Malformed(format!(
                        "&+ is only legal at the top level (found under '{at}')"
                    )))
                }
                SUB_RESOURCES if level == Level::Nested => {
                    return Err(DeltaError::IllegalNesting { plot: at.to_string() })
                }
                SUB_RESOURCES => {
                    for (plot_key, body) in as_object(value, SUB_RESOURCES)? {
                        let plot = Plot::parse(plot_key, self.state.lookup())?;
                        let body = as_object(body, plot_key)?;
                        let child = match pass {
                            Pass::Upserts => self.ensure_sub_resource(target, &plot, plot_key, body)?,
                            Pass::Removals => match self.resolver().resolve_plot(target, &plot) {
                                Some(child) => child,
                                None => continue,
                            },
                        };
                        self.walk(pass, &child, body, Level::Nested, plot_key)?;
                    }
                }
                REMOVALS => {
                    if pass == Pass::Removals {
                        self.remove_section(target, value)?;
                    }
                }
                _ => {
                    if pass == Pass::Upserts {
                        self.upsert(target, key, value)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn type_from(body: &Map<String, Value>) -> Result<Arc<str>, DeltaError> {
        match body.get(TYPE) {
            None => Ok(Arc::from(DEFAULT_TYPE)),
            Some(Value::String(name)) => Ok(Arc::from(name.as_str())),
            Some(_) => Err(DeltaError::Malformed("@type must be a string".into())),
        }
    }

    fn ensure_global(&mut self, raw: &str, body: &Map<String, Value>) -> Result<Vrl, DeltaError> {
        if self.state.contains(raw) {
            return Ok(self.resolver().locate(raw));
        }
        let type_name = Self::type_from(body)?;
        let vrl = Vrl::new(raw);
        self.state
            .insert(ResourceNode::new(Arc::clone(&type_name), vrl.clone()));
        self.effects.push(SideEffect::Created {
            id: vrl.clone(),
            type_name,
        });
        Ok(vrl)
    }

    /// Resolves every step but the last strictly; the last one is created when missing.
    fn ensure_sub_resource(
        &mut self,
        base: &Vrl,
        plot: &Plot,
        key: &str,
        body: &Map<String, Value>,
    ) -> Result<Vrl, DeltaError> {
        let resolver = self.resolver();
        let Some((last, ancestors)) = plot.steps().split_last() else {
            return resolver
                .resolve_plot(base, plot)
                .ok_or_else(|| DeltaError::UnknownResource { plot: key.into() });
        };
        let prefix = Plot::new(plot.base().clone(), ancestors.to_vec());
        let parent = resolver
            .resolve_plot(base, &prefix)
            .ok_or_else(|| DeltaError::MissingAncestor { plot: key.into() })?;
        let Some(segment) = segment_text(&self.state, last) else {
            return resolver
                .owner_of(&parent)
                .ok_or_else(|| DeltaError::UnknownResource { plot: key.into() });
        };
        if let Some(existing) = resolver.resolve_child(&parent, &segment) {
            return Ok(existing);
        }
        self.create_child(&parent, &segment, Self::type_from(body)?)
    }

    fn create_child(
        &mut self,
        parent: &Vrl,
        segment: &str,
        type_name: Arc<str>,
    ) -> Result<Vrl, DeltaError> {
        let vrl = Vrl::new(child_raw_id(&self.state, parent.raw_id(), segment));
        self.state
            .insert(ResourceNode::new(Arc::clone(&type_name), vrl.clone()));
        self.effects.push(SideEffect::Created {
            id: vrl.clone(),
            type_name,
        });
        self.set_singular(&vrl, terms::OWNER, parent)?;
        Ok(vrl)
    }

    /// Makes sure `vrl` has an entry: creates the root lazily and materializes ghosts.
    fn ensure_entry(&mut self, vrl: &Vrl) -> Result<(), DeltaError> {
        if self.state.contains(vrl.raw_id()) {
            return Ok(());
        }
        if vrl.raw_id() == self.state.root_raw_id() {
            let root = self.state.root();
            self.state
                .insert(ResourceNode::new(ROOT_TYPE, root.clone()));
            self.effects.push(SideEffect::Created {
                id: root,
                type_name: Arc::from(ROOT_TYPE),
            });
            return Ok(());
        }
        if vrl.is_ghost() {
            for id in ghost::materialize(&mut self.state, self.ontology, vrl)? {
                self.effects.push(SideEffect::Materialized { id });
            }
            return Ok(());
        }
        Err(DeltaError::UnknownResource {
            plot: vrl.raw_id().to_string(),
        })
    }

    fn checked_term(&self, key: &str) -> Result<String, DeltaError> {
        let term = self
            .ontology
            .resolve_term(key, self.state.lookup())
            .into_owned();
        if self.ontology.def(&term).inferred {
            return Err(DeltaError::InferredField { term });
        }
        Ok(term)
    }

    fn upsert(&mut self, target: &Vrl, key: &str, value: &Value) -> Result<(), DeltaError> {
        let term = self.checked_term(key)?;
        match self.ontology.def(&term).kind {
            FieldKind::Literal => {
                self.ensure_entry(target)?;
                self.state.update(target.raw_id(), |node| {
                    if value.is_null() {
                        node.remove_field(&term);
                    } else {
                        node.set_field(&term, FieldValue::Literal(value.clone()));
                    }
                });
            }
            FieldKind::Singular if value.is_null() => self.clear_singular(target, &term)?,
            FieldKind::Singular => {
                let referenced = self.reference(target, &term, value)?;
                self.set_singular(target, &term, &referenced)?;
            }
            FieldKind::Plural => match value {
                Value::Null => self.clear_plural(target, &term)?,
                Value::Array(items) => {
                    for item in items {
                        let referenced = self.reference(target, &term, item)?;
                        self.add_plural(target, &term, &referenced, ReorderPolicy::MoveToEnd)?;
                    }
                }
                _ => {
                    let referenced = self.reference(target, &term, value)?;
                    self.add_plural(target, &term, &referenced, ReorderPolicy::MoveToEnd)?;
                }
            },
        }
        Ok(())
    }

    /// Decodes `{"@id": plot}` or `{"@id": [tuple]}` relative to `base`.
    fn reference(&self, base: &Vrl, term: &str, value: &Value) -> Result<Vrl, DeltaError> {
        match value.get(ID) {
            Some(Value::String(text)) => {
                let plot = Plot::parse(text, self.state.lookup())?;
                self.resolver()
                    .resolve_plot(base, &plot)
                    .map(|vrl| vrl.without_coupling())
                    .ok_or_else(|| DeltaError::UnknownResource { plot: text.clone() })
            }
            Some(tuple @ Value::Array(_)) => Ok(Vrl::from_tuple(tuple)?.without_coupling()),
            _ => Err(DeltaError::ExpectedReference {
                term: term.to_string(),
            }),
        }
    }

    fn coupled_form(&self, term: &str, target: &Vrl) -> Vrl {
        match self.ontology.def(term).coupled {
            Some(reverse) => target.with_coupling(reverse),
            None => target.without_coupling(),
        }
    }

    fn set_singular(&mut self, source: &Vrl, term: &str, target: &Vrl) -> Result<(), DeltaError> {
        self.ensure_entry(source)?;
        let stored = self.coupled_form(term, target);
        let previous = self
            .state
            .get(source.raw_id())
            .and_then(|node| node.field(term))
            .and_then(FieldValue::as_vrl)
            .cloned();
        if previous.as_ref() == Some(&stored) {
            return Ok(());
        }
        self.state.update(source.raw_id(), |node| {
            node.set_field(term, FieldValue::Ref(stored.clone()));
        });
        if term == terms::INSTANCE_PROTOTYPE && !source.is_ghost() {
            let instance = Vrl::instance_of(&Vrl::new(Arc::clone(source.raw_id_arc())), target);
            self.state
                .update(source.raw_id(), |node| node.set_id(instance));
        }
        if let Some(reverse) = self.ontology.def(term).coupled {
            let referrer = self.resolver().locate(source.raw_id());
            if let Some(previous) = previous {
                self.unlink(&previous, reverse, &referrer);
            }
            self.link(target, reverse, &referrer)?;
        }
        Ok(())
    }

    fn clear_singular(&mut self, source: &Vrl, term: &str) -> Result<(), DeltaError> {
        self.ensure_entry(source)?;
        let previous = self
            .state
            .update(source.raw_id(), |node| node.remove_field(term))
            .flatten();
        if let (Some(FieldValue::Ref(previous)), Some(reverse)) =
            (previous, self.ontology.def(term).coupled)
        {
            let referrer = self.resolver().locate(source.raw_id());
            self.unlink(&previous, reverse, &referrer);
        }
        Ok(())
    }

    /// Current list of a plural field, starting from the inherited value when unset.
    fn plural_items(&self, source: &Vrl, term: &str) -> Vec<Vrl> {
        self.resolver()
            .read_field(source, term)
            .map(|value| value.refs().to_vec())
            .unwrap_or_default()
    }

    fn add_plural(
        &mut self,
        source: &Vrl,
        term: &str,
        target: &Vrl,
        policy: ReorderPolicy,
    ) -> Result<(), DeltaError> {
        self.ensure_entry(source)?;
        let item = self.coupled_form(term, target);
        if self.insert_item(source, term, item, policy) {
            if let Some(reverse) = self.ontology.def(term).coupled {
                let referrer = self.resolver().locate(source.raw_id());
                self.link(target, reverse, &referrer)?;
            }
        }
        Ok(())
    }

    /// Inserts `item` into the plural `term` of `source`; `true` when it was not present yet.
    fn insert_item(&mut self, source: &Vrl, term: &str, item: Vrl, policy: ReorderPolicy) -> bool {
        let mut items = self.plural_items(source, term);
        let present = items.iter().position(|v| v.raw_id() == item.raw_id());
        match (present, policy) {
            (Some(_), ReorderPolicy::Preserve) => return false,
            (Some(index), ReorderPolicy::MoveToEnd) => {
                items.remove(index);
                items.push(item);
            }
            (None, _) => items.push(item),
        }
        self.state.update(source.raw_id(), |node| {
            node.set_field(term, FieldValue::Refs(Arc::new(items)));
        });
        present.is_none()
    }

    fn remove_plural(&mut self, source: &Vrl, term: &str, target: &Vrl) -> Result<(), DeltaError> {
        let mut items = self.plural_items(source, term);
        let Some(index) = items.iter().position(|v| v.raw_id() == target.raw_id()) else {
            return Ok(());
        };
        self.ensure_entry(source)?;
        items.remove(index);
        self.state.update(source.raw_id(), |node| {
            node.set_field(term, FieldValue::Refs(Arc::new(items)));
        });
        if let Some(reverse) = self.ontology.def(term).coupled {
            let referrer = self.resolver().locate(source.raw_id());
            self.unlink(target, reverse, &referrer);
        }
        Ok(())
    }

    fn clear_plural(&mut self, source: &Vrl, term: &str) -> Result<(), DeltaError> {
        for target in self.plural_items(source, term) {
            self.remove_plural(source, term, &target)?;
        }
        Ok(())
    }

    /// Adds `referrer` to the reverse field `reverse` of `target`, materializing ghosts.
    fn link(&mut self, target: &Vrl, reverse: &str, referrer: &Vrl) -> Result<(), DeltaError> {
        self.ensure_entry(target)?;
        let forward = self.ontology.def(reverse).coupled;
        let stored = match forward {
            Some(forward) => referrer.with_coupling(forward),
            None => referrer.without_coupling(),
        };
        match self.ontology.def(reverse).kind {
            FieldKind::Plural => {
                if !self.insert_item(target, reverse, stored, ReorderPolicy::Preserve) {
                    return Ok(());
                }
            }
            _ => {
                self.state.update(target.raw_id(), |node| {
                    node.set_field(reverse, FieldValue::Ref(stored));
                });
            }
        }
        self.effects.push(SideEffect::Coupled {
            source: referrer.without_coupling(),
            term: Arc::from(reverse),
            target: target.without_coupling(),
        });
        Ok(())
    }

    /// Removes `referrer` from `reverse` on `target`. Targets without entries are left alone.
    fn unlink(&mut self, target: &Vrl, reverse: &str, referrer: &Vrl) {
        if ghost::remove_reference(&mut self.state, target.raw_id(), reverse, referrer.raw_id()) {
            self.effects.push(SideEffect::Decoupled {
                source: referrer.without_coupling(),
                term: Arc::from(reverse),
                target: target.without_coupling(),
            });
        }
    }

    fn remove_section(&mut self, target: &Vrl, section: &Value) -> Result<(), DeltaError> {
        for (key, value) in as_object(section, REMOVALS)? {
            if key == SUB_RESOURCES {
                self.destroy_listed(target, value)?;
                continue;
            }
            let term = self.checked_term(key)?;
            match self.ontology.def(&term).kind {
                FieldKind::Literal => {
                    if self.resolver().exists(target) {
                        self.ensure_entry(target)?;
                        self.state
                            .update(target.raw_id(), |node| node.remove_field(&term));
                    }
                }
                FieldKind::Singular => self.clear_singular(target, &term)?,
                FieldKind::Plural => match value {
                    Value::Null | Value::Bool(true) => self.clear_plural(target, &term)?,
                    Value::Array(items) => {
                        for item in items {
                            if let Some(referenced) = self.try_reference(target, &term, item)? {
                                self.remove_plural(target, &term, &referenced)?;
                            }
                        }
                    }
                    _ => {
                        if let Some(referenced) = self.try_reference(target, &term, value)? {
                            self.remove_plural(target, &term, &referenced)?;
                        }
                    }
                },
            }
        }
        Ok(())
    }

    /// Like [`Self::reference`] but a reference to a missing resource is `None`.
    fn try_reference(
        &self,
        base: &Vrl,
        term: &str,
        value: &Value,
    ) -> Result<Option<Vrl>, DeltaError> {
        match self.reference(base, term, value) {
            Ok(vrl) => Ok(Some(vrl)),
            Err(DeltaError::UnknownResource { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn destroy_listed(&mut self, base: &Vrl, listed: &Value) -> Result<(), DeltaError> {
        let keys: Vec<&str> = match listed {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            Value::String(key) => vec![key.as_str()],
            _ => {
                return Err(DeltaError::Malformed(
                    "&- &~ must list sub-resource plots".into(),
                ))
            }
        };
        for key in keys {
            let plot = Plot::parse(key, self.state.lookup())?;
            if let Some(victim) = self.resolver().resolve_plot(base, &plot) {
                self.destroy(&victim)?;
            }
        }
        Ok(())
    }

    fn destroy(&mut self, victim: &Vrl) -> Result<(), DeltaError> {
        let Some(node) = self.state.get(victim.raw_id()).cloned() else {
            return Ok(());
        };
        if victim.is_ghost() || node.id().is_ghost() {
            ghost::immaterialize(&mut self.state, self.ontology, node.id())?;
            self.effects.push(SideEffect::Immaterialized {
                id: node.id().clone(),
            });
            return Ok(());
        }
        if let Some((term, _)) = node.fields().find(|(term, value)| {
            self.ontology.def(term).prevents_destroy && !value.refs().is_empty()
        }) {
            return Err(DeltaError::PreventsDestroy {
                raw_id: victim.raw_id().to_string(),
                term: term.to_string(),
            });
        }
        self.state.remove_entry(victim.raw_id());
        for (term, value) in node.fields() {
            if let Some(reverse) = self.ontology.def(term).coupled {
                for target in value.refs() {
                    self.unlink(target, reverse, node.id());
                }
            }
        }
        self.effects.push(SideEffect::Destroyed {
            id: node.id().clone(),
        });
        Ok(())
    }
}

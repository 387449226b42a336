// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistent state tree: `type → raw id → resource node`.
//!
//! Every level is an `Arc`-shared `BTreeMap`. Writers clone the tree handle
//! (a few pointer copies) and mutate through `Arc::make_mut`, which copies
//! only the levels on the path to the changed node. Untouched type tables and
//! nodes stay pointer-equal to the previous snapshot, so snapshots are cheap
//! and published trees are never mutated.
//!
//! Iteration order is the `BTreeMap` key order, which keeps every derived
//! listing deterministic across peers.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::locator::Vrl;
use crate::plot::IriLookup;

/// Type name given to the chronicle root resource.
pub const ROOT_TYPE: &str = "Chronicle";

/// Type name used when a created resource names none.
pub const DEFAULT_TYPE: &str = "Entity";

/// Resources of one type keyed by raw id.
pub type TypeTable = BTreeMap<Arc<str>, Arc<ResourceNode>>;

/// Value stored in a resource field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Any JSON literal.
    Literal(Value),
    /// Singular reference.
    Ref(Vrl),
    /// Ordered reference collection (insertion order, no duplicates).
    Refs(Arc<Vec<Vrl>>),
}

impl FieldValue {
    /// Literal payload, if this is a literal.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Singular reference, if this is one.
    pub fn as_vrl(&self) -> Option<&Vrl> {
        match self {
            Self::Ref(vrl) => Some(vrl),
            _ => None,
        }
    }

    /// Every reference held by this value (empty for literals).
    pub fn refs(&self) -> &[Vrl] {
        match self {
            Self::Literal(_) => &[],
            Self::Ref(vrl) => std::slice::from_ref(vrl),
            Self::Refs(list) => list,
        }
    }

    /// JSON rendering: literals as-is, references as `{"@id": tuple}`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Ref(vrl) => json!({ "@id": vrl.to_tuple() }),
            Self::Refs(list) => Value::Array(
                list.iter()
                    .map(|vrl| json!({ "@id": vrl.to_tuple() }))
                    .collect(),
            ),
        }
    }
}

/// One resource entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceNode {
    type_name: Arc<str>,
    id: Vrl,
    fields: BTreeMap<Arc<str>, FieldValue>,
}

impl ResourceNode {
    /// Creates an entry with no fields.
    pub fn new(type_name: impl Into<Arc<str>>, id: Vrl) -> Self {
        Self {
            type_name: type_name.into(),
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Resource type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Locator of the resource, including its ghost path.
    pub fn id(&self) -> &Vrl {
        &self.id
    }

    /// Own field value (no inheritance).
    pub fn field(&self, term: &str) -> Option<&FieldValue> {
        self.fields.get(term)
    }

    /// Own fields in term order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (&**k, v))
    }

    pub(crate) fn set_id(&mut self, id: Vrl) {
        self.id = id;
    }

    pub(crate) fn set_field(&mut self, term: &str, value: FieldValue) {
        self.fields.insert(Arc::from(term), value);
    }

    pub(crate) fn remove_field(&mut self, term: &str) -> Option<FieldValue> {
        self.fields.remove(term)
    }

    /// JSON rendering of the own fields.
    pub fn to_json(&self) -> Value {
        let mut fields = Map::new();
        for (term, value) in &self.fields {
            fields.insert(term.to_string(), value.to_json());
        }
        json!({
            "@type": &*self.type_name,
            "@id": self.id.to_tuple(),
            "fields": fields,
        })
    }
}

/// Immutable snapshot of a chronicle's resources and IRI lookup table.
#[derive(Clone, Debug, PartialEq)]
pub struct StateTree {
    root: Arc<str>,
    types: Arc<BTreeMap<Arc<str>, Arc<TypeTable>>>,
    index: Arc<BTreeMap<Arc<str>, Arc<str>>>,
    lookup: Arc<IriLookup>,
}

impl StateTree {
    /// Empty tree whose root resource has raw id `root_raw_id`.
    ///
    /// The root entry itself is created lazily by the first write to it.
    pub fn new(root_raw_id: impl Into<Arc<str>>) -> Self {
        Self {
            root: root_raw_id.into(),
            types: Arc::default(),
            index: Arc::default(),
            lookup: Arc::default(),
        }
    }

    /// Raw id of the chronicle root.
    pub fn root_raw_id(&self) -> &str {
        &self.root
    }

    /// Locator of the chronicle root.
    pub fn root(&self) -> Vrl {
        Vrl::new(Arc::clone(&self.root))
    }

    /// Entry for `raw_id`.
    pub fn get(&self, raw_id: &str) -> Option<&Arc<ResourceNode>> {
        let type_name = self.index.get(raw_id)?;
        self.types.get(type_name)?.get(raw_id)
    }

    /// `true` when `raw_id` has an entry.
    pub fn contains(&self, raw_id: &str) -> bool {
        self.index.contains_key(raw_id)
    }

    /// Type of the entry for `raw_id`.
    pub fn type_of(&self, raw_id: &str) -> Option<&str> {
        self.index.get(raw_id).map(|t| &**t)
    }

    /// Type table for `type_name`; shared with older snapshots when untouched.
    pub fn type_table(&self, type_name: &str) -> Option<&Arc<TypeTable>> {
        self.types.get(type_name)
    }

    /// Entries of one type in raw id order.
    pub fn resources_of_type<'a>(
        &'a self,
        type_name: &str,
    ) -> impl Iterator<Item = &'a Arc<ResourceNode>> + 'a {
        self.types
            .get(type_name)
            .into_iter()
            .flat_map(|table| table.values())
    }

    /// Every entry in `(type, raw id)` order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceNode>> {
        self.types.values().flat_map(|table| table.values())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// `true` when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// IRI lookup table accumulated from `@context` sections.
    pub fn lookup(&self) -> &IriLookup {
        &self.lookup
    }

    pub(crate) fn lookup_mut(&mut self) -> &mut IriLookup {
        Arc::make_mut(&mut self.lookup)
    }

    /// Inserts or replaces an entry.
    pub(crate) fn insert(&mut self, node: ResourceNode) {
        let raw = Arc::clone(node.id.raw_id_arc());
        let type_name = Arc::clone(&node.type_name);
        let previous = self.index.get(&raw).cloned();
        if let Some(previous) = previous.filter(|p| *p != type_name) {
            self.remove(&raw, &previous);
        }
        let types = Arc::make_mut(&mut self.types);
        let table = types.entry(Arc::clone(&type_name)).or_default();
        Arc::make_mut(table).insert(Arc::clone(&raw), Arc::new(node));
        Arc::make_mut(&mut self.index).insert(raw, type_name);
    }

    /// Removes the entry for `raw_id`, returning it.
    pub(crate) fn remove_entry(&mut self, raw_id: &str) -> Option<Arc<ResourceNode>> {
        let type_name = Arc::make_mut(&mut self.index).remove(raw_id)?;
        self.remove(raw_id, &type_name)
    }

    fn remove(&mut self, raw_id: &str, type_name: &str) -> Option<Arc<ResourceNode>> {
        let types = Arc::make_mut(&mut self.types);
        let table = types.get_mut(type_name)?;
        let removed = Arc::make_mut(table).remove(raw_id);
        if table.is_empty() {
            types.remove(type_name);
        }
        removed
    }

    /// Applies `f` to the entry for `raw_id`, copying only the touched path.
    pub(crate) fn update<R>(
        &mut self,
        raw_id: &str,
        f: impl FnOnce(&mut ResourceNode) -> R,
    ) -> Option<R> {
        let type_name = self.index.get(raw_id)?;
        let types = Arc::make_mut(&mut self.types);
        let table = Arc::make_mut(types.get_mut(&**type_name)?);
        let node = table.get_mut(raw_id)?;
        Some(f(Arc::make_mut(node)))
    }
}

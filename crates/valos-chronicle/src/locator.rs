// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource locators (`Vrl`) and ghost paths.
//!
//! A [`Vrl`] names a resource by its raw id plus optional resolution hints.
//! Identity is `(raw_id, coupled_field)`; the chronicle URI, ghost path and
//! fragment never participate in equality or hashing.
//!
//! Locators are cheap to clone and derive: every textual part is an
//! `Arc<str>`, so `with_coupling` and friends copy a handful of pointers and
//! override one field instead of duplicating the whole value.
//!
//! # Wire shape
//!
//! Locators serialize as the 4-tuple `[rawId, resolverFields, queryFields, fragment]`:
//!
//! - `resolverFields`: `{"partition": uri, "ghostPath": [origin, [proto, inst], ...]}` or `null`
//! - `queryFields`: `{"coupling": field}` or `null`
//! - `fragment`: string or `null`
use std::fmt;
use std::hash::{Hash as StdHash, Hasher as StdHasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::ident::derive_ghost_raw_id;

/// Errors raised while deriving or decoding locators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// `with_chronicle_uri` on a locator that already carries one.
    #[error("chronicle uri already set to '{existing}'")]
    ChronicleUriAlreadySet {
        /// The URI the locator already carries.
        existing: String,
    },
    /// The serialized tuple does not have the expected shape.
    #[error("malformed locator tuple: {0}")]
    MalformedTuple(String),
}

/// One instantiation step: the prototype that was instantiated and the instance created.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GhostStep {
    /// Raw id of the instantiated prototype.
    pub prototype_raw_id: Arc<str>,
    /// Raw id of the instance that hosts the ghost.
    pub instance_raw_id: Arc<str>,
}

/// Instantiation ancestry of a ghost (or instance).
///
/// The path starts at an origin raw id (a concrete resource) and records
/// each `(prototype, instance)` step. Steps are shared behind an `Arc` so
/// extending a path copies the step list once and never mutates a parent path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GhostPath {
    origin: Arc<str>,
    steps: Arc<[GhostStep]>,
}

impl GhostPath {
    /// Creates an empty path rooted at `origin`.
    pub fn new(origin: impl Into<Arc<str>>) -> Self {
        Self {
            origin: origin.into(),
            steps: Arc::from(Vec::new()),
        }
    }

    /// Raw id of the concrete resource the path starts from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Instantiation steps, oldest first.
    pub fn steps(&self) -> &[GhostStep] {
        &self.steps
    }

    /// Returns `true` when the path has no instantiation steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The most recent instantiation step.
    pub fn last_step(&self) -> Option<&GhostStep> {
        self.steps.last()
    }

    /// Returns a new path with one more step.
    pub fn with_step(
        &self,
        prototype_raw_id: impl Into<Arc<str>>,
        instance_raw_id: impl Into<Arc<str>>,
    ) -> Self {
        let mut steps = self.steps.to_vec();
        steps.push(GhostStep {
            prototype_raw_id: prototype_raw_id.into(),
            instance_raw_id: instance_raw_id.into(),
        });
        Self {
            origin: Arc::clone(&self.origin),
            steps: Arc::from(steps),
        }
    }

    /// The path with its last step dropped (`None` for an empty path).
    pub fn without_last_step(&self) -> Option<Self> {
        let (_, rest) = self.steps.split_last()?;
        Some(Self {
            origin: Arc::clone(&self.origin),
            steps: Arc::from(rest.to_vec()),
        })
    }

    /// Raw id of the ghost this path denotes, folding every step over the origin.
    pub fn ghost_raw_id(&self) -> String {
        self.steps.iter().fold(self.origin.to_string(), |prev, step| {
            derive_ghost_raw_id(&prev, &step.instance_raw_id)
        })
    }

    fn to_value(&self) -> Value {
        let mut out = Vec::with_capacity(self.steps.len() + 1);
        out.push(Value::String(self.origin.to_string()));
        for step in self.steps.iter() {
            out.push(json!([&*step.prototype_raw_id, &*step.instance_raw_id]));
        }
        Value::Array(out)
    }

    fn from_value(value: &Value) -> Result<Self, LocatorError> {
        let items = value
            .as_array()
            .ok_or_else(|| LocatorError::MalformedTuple("ghostPath must be an array".into()))?;
        let (origin, rest) = items
            .split_first()
            .ok_or_else(|| LocatorError::MalformedTuple("ghostPath is empty".into()))?;
        let origin = origin
            .as_str()
            .ok_or_else(|| LocatorError::MalformedTuple("ghostPath origin".into()))?;
        let mut path = Self::new(origin);
        for step in rest {
            match step.as_array().map(Vec::as_slice) {
                Some([Value::String(proto), Value::String(inst)]) => {
                    path = path.with_step(proto.as_str(), inst.as_str());
                }
                _ => {
                    return Err(LocatorError::MalformedTuple(
                        "ghostPath step must be [prototype, instance]".into(),
                    ))
                }
            }
        }
        Ok(path)
    }
}

/// Resource locator: identity + coupling + resolution hints.
#[derive(Clone)]
pub struct Vrl {
    raw_id: Arc<str>,
    coupled_field: Option<Arc<str>>,
    chronicle_uri: Option<Arc<str>>,
    ghost_path: Option<GhostPath>,
    fragment: Option<Arc<str>>,
}

impl Vrl {
    /// Locator for a plain concrete resource.
    pub fn new(raw_id: impl Into<Arc<str>>) -> Self {
        Self {
            raw_id: raw_id.into(),
            coupled_field: None,
            chronicle_uri: None,
            ghost_path: None,
            fragment: None,
        }
    }

    /// Full constructor.
    pub fn create(
        raw_id: impl Into<Arc<str>>,
        coupling: Option<&str>,
        ghost_path: Option<GhostPath>,
        chronicle_uri: Option<&str>,
    ) -> Self {
        Self {
            raw_id: raw_id.into(),
            coupled_field: coupling.map(Arc::from),
            chronicle_uri: chronicle_uri.map(Arc::from),
            ghost_path,
            fragment: None,
        }
    }

    /// Locator for the ghost of `prototype` inside the instance step `prototype_root → instance`.
    ///
    /// Ghosts of ghosts extend the prototype's ghost path; anything else
    /// (concrete resources and instances) starts a fresh lineage.
    pub fn ghost_of(prototype: &Vrl, prototype_root: &str, instance: &str) -> Self {
        let lineage = match &prototype.ghost_path {
            Some(path) if prototype.is_ghost() => path.clone(),
            _ => GhostPath::new(Arc::clone(&prototype.raw_id)),
        };
        let path = lineage.with_step(prototype_root, instance);
        let mut out = Self::new(derive_ghost_raw_id(&prototype.raw_id, instance));
        out.chronicle_uri = prototype.chronicle_uri.clone();
        out.ghost_path = Some(path);
        out
    }

    /// Locator for `instance` as an instance of `prototype`.
    pub fn instance_of(instance: &Vrl, prototype: &Vrl) -> Self {
        let lineage = match &prototype.ghost_path {
            Some(path) if prototype.is_ghost() => path.clone(),
            _ => GhostPath::new(Arc::clone(&prototype.raw_id)),
        };
        let mut out = instance.clone();
        out.ghost_path =
            Some(lineage.with_step(Arc::clone(&prototype.raw_id), Arc::clone(&instance.raw_id)));
        out
    }

    /// Returns a copy that carries `field` as its coupled field.
    pub fn with_coupling(&self, field: impl Into<Arc<str>>) -> Self {
        let mut out = self.clone();
        out.coupled_field = Some(field.into());
        out
    }

    /// Returns a copy with no coupled field.
    pub fn without_coupling(&self) -> Self {
        let mut out = self.clone();
        out.coupled_field = None;
        out
    }

    /// Returns a copy that carries `uri`. The chronicle URI is write-once.
    pub fn with_chronicle_uri(&self, uri: impl Into<Arc<str>>) -> Result<Self, LocatorError> {
        if let Some(existing) = &self.chronicle_uri {
            return Err(LocatorError::ChronicleUriAlreadySet {
                existing: existing.to_string(),
            });
        }
        let mut out = self.clone();
        out.chronicle_uri = Some(uri.into());
        Ok(out)
    }

    /// Returns a copy with the given ghost path.
    pub fn with_ghost_path(&self, path: GhostPath) -> Self {
        let mut out = self.clone();
        out.ghost_path = Some(path);
        out
    }

    /// Returns a copy with the given fragment.
    pub fn with_fragment(&self, fragment: impl Into<Arc<str>>) -> Self {
        let mut out = self.clone();
        out.fragment = Some(fragment.into());
        out
    }

    /// Raw id of the resource.
    pub fn raw_id(&self) -> &str {
        &self.raw_id
    }

    /// Shared handle to the raw id.
    pub fn raw_id_arc(&self) -> &Arc<str> {
        &self.raw_id
    }

    /// Reverse field name on the referrer, when this locator is one side of a coupling.
    pub fn coupled_field(&self) -> Option<&str> {
        self.coupled_field.as_deref()
    }

    /// Chronicle hint.
    pub fn chronicle_uri(&self) -> Option<&str> {
        self.chronicle_uri.as_deref()
    }

    /// Instantiation ancestry hint.
    pub fn ghost_path(&self) -> Option<&GhostPath> {
        self.ghost_path.as_ref()
    }

    /// Fragment hint.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// `true` when the locator denotes a ghost: its identity was derived from a prototype inside an instance.
    pub fn is_ghost(&self) -> bool {
        self.ghost_path
            .as_ref()
            .and_then(GhostPath::last_step)
            .is_some_and(|step| *step.instance_raw_id != *self.raw_id)
    }

    /// `true` when the locator denotes an instance of some prototype.
    pub fn is_instance(&self) -> bool {
        self.ghost_path
            .as_ref()
            .and_then(GhostPath::last_step)
            .is_some_and(|step| *step.instance_raw_id == *self.raw_id)
    }

    /// `true` when the identity carries any instantiation ancestry.
    pub fn is_inherited(&self) -> bool {
        self.ghost_path.as_ref().is_some_and(|path| !path.is_empty())
    }

    /// Locator of the resource this ghost mirrors (`None` unless `is_ghost()`).
    pub fn ghost_prototype(&self) -> Option<Vrl> {
        if !self.is_ghost() {
            return None;
        }
        let shorter = self.ghost_path.as_ref()?.without_last_step()?;
        let mut out = Self::new(shorter.ghost_raw_id());
        out.chronicle_uri = self.chronicle_uri.clone();
        if !shorter.is_empty() {
            out.ghost_path = Some(shorter);
        }
        Some(out)
    }

    /// Deterministic hash code: the first 8 bytes of the raw id, zero padded, little-endian.
    pub fn hash_code(&self) -> u64 {
        let mut buf = [0u8; 8];
        let bytes = self.raw_id.as_bytes();
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        u64::from_le_bytes(buf)
    }

    /// Serializes into the `[rawId, resolverFields, queryFields, fragment]` tuple.
    pub fn to_tuple(&self) -> Value {
        let mut resolver = Map::new();
        if let Some(uri) = &self.chronicle_uri {
            resolver.insert("partition".into(), Value::String(uri.to_string()));
        }
        if let Some(path) = &self.ghost_path {
            resolver.insert("ghostPath".into(), path.to_value());
        }
        let resolver = if resolver.is_empty() {
            Value::Null
        } else {
            Value::Object(resolver)
        };
        let query = self
            .coupled_field
            .as_ref()
            .map_or(Value::Null, |field| json!({ "coupling": &**field }));
        let fragment = self
            .fragment
            .as_ref()
            .map_or(Value::Null, |f| Value::String(f.to_string()));
        Value::Array(vec![
            Value::String(self.raw_id.to_string()),
            resolver,
            query,
            fragment,
        ])
    }

    /// Decodes a tuple produced by [`Vrl::to_tuple`]. Missing trailing entries read as `null`.
    pub fn from_tuple(value: &Value) -> Result<Self, LocatorError> {
        let items = value
            .as_array()
            .ok_or_else(|| LocatorError::MalformedTuple("expected an array".into()))?;
        if items.is_empty() || items.len() > 4 {
            return Err(LocatorError::MalformedTuple(format!(
                "expected 1..=4 entries, got {}",
                items.len()
            )));
        }
        let raw_id = items[0]
            .as_str()
            .ok_or_else(|| LocatorError::MalformedTuple("rawId must be a string".into()))?;
        let mut out = Self::new(raw_id);
        match items.get(1) {
            None | Some(Value::Null) => {}
            Some(Value::Object(resolver)) => {
                for (key, field) in resolver {
                    match (key.as_str(), field) {
                        ("partition", Value::String(uri)) => {
                            out.chronicle_uri = Some(Arc::from(uri.as_str()));
                        }
                        ("ghostPath", path) => out.ghost_path = Some(GhostPath::from_value(path)?),
                        _ => {
                            return Err(LocatorError::MalformedTuple(format!(
                                "unknown resolver field '{key}'"
                            )))
                        }
                    }
                }
            }
            Some(_) => {
                return Err(LocatorError::MalformedTuple(
                    "resolverFields must be an object or null".into(),
                ))
            }
        }
        match items.get(2) {
            None | Some(Value::Null) => {}
            Some(Value::Object(query)) => {
                for (key, field) in query {
                    match (key.as_str(), field) {
                        ("coupling", Value::String(name)) => {
                            out.coupled_field = Some(Arc::from(name.as_str()));
                        }
                        _ => {
                            return Err(LocatorError::MalformedTuple(format!(
                                "unknown query field '{key}'"
                            )))
                        }
                    }
                }
            }
            Some(_) => {
                return Err(LocatorError::MalformedTuple(
                    "queryFields must be an object or null".into(),
                ))
            }
        }
        match items.get(3) {
            None | Some(Value::Null) => {}
            Some(Value::String(fragment)) => out.fragment = Some(Arc::from(fragment.as_str())),
            Some(_) => {
                return Err(LocatorError::MalformedTuple(
                    "fragment must be a string or null".into(),
                ))
            }
        }
        Ok(out)
    }

    /// Exact structural equality including every resolution hint.
    pub fn is_same_locator(&self, other: &Self) -> bool {
        self == other
            && self.chronicle_uri == other.chronicle_uri
            && self.ghost_path == other.ghost_path
            && self.fragment == other.fragment
    }
}

impl PartialEq for Vrl {
    fn eq(&self, other: &Self) -> bool {
        self.raw_id == other.raw_id && self.coupled_field == other.coupled_field
    }
}

impl Eq for Vrl {}

impl StdHash for Vrl {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Debug for Vrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vrl({}", self.raw_id)?;
        if let Some(field) = &self.coupled_field {
            write!(f, " ~{field}")?;
        }
        if self.is_ghost() {
            write!(f, " ghost")?;
        } else if self.is_instance() {
            write!(f, " instance")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Vrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tuple())
    }
}

impl Serialize for Vrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_tuple().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Vrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_tuple(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_ignores_resolution_hints() {
        let a = Vrl::new("abc").with_coupling("owner");
        let b = Vrl::create("abc", Some("owner"), Some(GhostPath::new("zzz")), Some("valos:chr"));
        assert_eq!(a, b);
        assert!(!a.is_same_locator(&b));
        assert_ne!(a, Vrl::new("abc"));
        let set: HashSet<Vrl> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn hash_code_reads_first_eight_bytes() {
        assert_eq!(Vrl::new("ab").hash_code(), u64::from_le_bytes(*b"ab\0\0\0\0\0\0"));
        assert_eq!(
            Vrl::new("0123456789").hash_code(),
            u64::from_le_bytes(*b"01234567")
        );
    }

    #[test]
    fn chronicle_uri_is_write_once() {
        let a = Vrl::new("x").with_chronicle_uri("valos:one").unwrap();
        assert_eq!(a.chronicle_uri(), Some("valos:one"));
        let err = a.with_chronicle_uri("valos:two").unwrap_err();
        assert_eq!(
            err,
            LocatorError::ChronicleUriAlreadySet {
                existing: "valos:one".into()
            }
        );
    }

    #[test]
    fn derivation_shares_raw_id_storage() {
        let a = Vrl::new("shared");
        let b = a.with_coupling("tags");
        assert!(Arc::ptr_eq(a.raw_id_arc(), b.raw_id_arc()));
    }

    #[test]
    fn ghost_and_instance_flags() {
        let proto = Vrl::new("p/");
        let inst = Vrl::instance_of(&Vrl::new("i/"), &proto);
        assert!(inst.is_instance());
        assert!(!inst.is_ghost());
        assert!(inst.is_inherited());

        let child = Vrl::new("p/c/");
        let ghost = Vrl::ghost_of(&child, "p/", "i/");
        assert!(ghost.is_ghost());
        assert!(!ghost.is_instance());
        assert_eq!(ghost.raw_id(), derive_ghost_raw_id("p/c/", "i/"));
        assert_eq!(ghost.ghost_prototype(), Some(child));
        assert!(!Vrl::new("plain").is_inherited());
    }

    #[test]
    fn ghost_of_ghost_folds_the_whole_path() {
        let d = Vrl::new("q/d/");
        let g1 = Vrl::ghost_of(&d, "q/", "p/");
        let g2 = Vrl::ghost_of(&g1, "p/", "i/");
        let path = g2.ghost_path().unwrap();
        assert_eq!(path.steps().len(), 2);
        assert_eq!(path.ghost_raw_id(), g2.raw_id());
        assert_eq!(g2.ghost_prototype().unwrap(), g1);
        assert_eq!(g1.ghost_prototype().unwrap(), d);
    }

    #[test]
    fn tuple_roundtrip_is_lossless() {
        let ghost = Vrl::ghost_of(&Vrl::new("p/c/"), "p/", "i/")
            .with_coupling("ownlings")
            .with_chronicle_uri("valos:chr")
            .unwrap()
            .with_fragment("frag");
        let tuple = ghost.to_tuple();
        let back = Vrl::from_tuple(&tuple).unwrap();
        assert!(back.is_same_locator(&ghost));
        assert_eq!(back.to_tuple(), tuple);

        let plain = Vrl::new("x");
        assert_eq!(plain.to_tuple(), json!(["x", null, null, null]));
        let json = serde_json::to_string(&plain).unwrap();
        let back: Vrl = serde_json::from_str(&json).unwrap();
        assert!(back.is_same_locator(&plain));
    }

    #[test]
    fn malformed_tuples_are_rejected() {
        assert!(Vrl::from_tuple(&json!([])).is_err());
        assert!(Vrl::from_tuple(&json!([1])).is_err());
        assert!(Vrl::from_tuple(&json!(["x", {"bogus": 1}])).is_err());
        assert!(Vrl::from_tuple(&json!(["x", null, "coupling"])).is_err());
    }
}

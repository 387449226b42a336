// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-chronicle IRI lookup table (`@context` index table).
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::PlotError;

/// Maps numeric plot indices to IRIs.
///
/// Entries only ever get added; a delta may not rebind an index to a
/// different IRI because earlier events already resolved through it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IriLookup {
    entries: BTreeMap<u32, Arc<str>>,
}

impl IriLookup {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// IRI bound to `index`.
    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(&index).map(|iri| &**iri)
    }

    /// `true` when `index` is bound.
    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    /// Number of bound indices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binds `index` to `iri`.
    pub fn insert(&mut self, index: u32, iri: impl Into<Arc<str>>) -> Result<(), PlotError> {
        let iri = iri.into();
        match self.entries.get(&index) {
            Some(existing) if *existing != iri => Err(PlotError::ContextConflict {
                index,
                existing: existing.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(index, iri);
                Ok(())
            }
        }
    }

    /// Returns the index of `text` when it is a plain decimal that is bound in this table.
    ///
    /// Anything else stays an opaque literal; `"01"` is never an index.
    pub fn index_of(&self, text: &str) -> Option<u32> {
        if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
            return None;
        }
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: u32 = text.parse().ok()?;
        self.contains(index).then_some(index)
    }

    /// Merges an `@context` section: an object `{"<index>": "<iri>"}` or an array of such objects.
    pub fn merge_context(&mut self, context: &Value) -> Result<(), PlotError> {
        match context {
            Value::Array(parts) => {
                for part in parts {
                    self.merge_context(part)?;
                }
                Ok(())
            }
            Value::Object(map) => {
                for (key, iri) in map {
                    let index: u32 = key
                        .parse()
                        .map_err(|_| PlotError::MalformedContext(format!("index '{key}'")))?;
                    let iri = iri.as_str().ok_or_else(|| {
                        PlotError::MalformedContext(format!("iri of index {index} is not a string"))
                    })?;
                    self.insert(index, iri)?;
                }
                Ok(())
            }
            _ => Err(PlotError::MalformedContext(
                "expected an object or array".into(),
            )),
        }
    }

    /// Iterates bindings in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(k, v)| (*k, &**v))
    }
}

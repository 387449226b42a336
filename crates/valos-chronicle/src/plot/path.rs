// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path plots: the resource-addressing subset of the plot codec.
//!
//! Path form:
//!
//! - `seg/seg/` relative to a base resource (`""` is the base itself)
//! - `/seg/` absolute from the chronicle root
//! - `~rawId/seg/` absolute from the resource `rawId`
//! - `..` steps to the owner
//!
//! Segments are percent-decoded. A decimal segment is an IRI-table index
//! only when it is written unescaped and the index is bound in the lookup;
//! otherwise it stays literal. Literal decimal segments are rendered with
//! their first digit escaped.
//!
//! Outline form: a group of `["@~"]` (root) or `["@~", id]` (resource)
//! followed by `["@.", seg]` steps; `["@.", ".."]` is the owner step and a
//! lone `["@."]` denotes the base itself.
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::escape::{escape_segment, unescape_literal};
use super::{disjoin, form, is_valid_resource_id, IriLookup, PlotError, GROUP_TAG};

/// Where a path plot starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlotBase {
    /// Relative to the resource the plot appears in.
    Relative,
    /// The chronicle root.
    Root,
    /// A resource named by raw id.
    Resource(Arc<str>),
}

/// One step of a path plot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlotStep {
    /// Opaque literal segment (decoded).
    Literal(String),
    /// Bound IRI-table index.
    Index(u32),
    /// Step to the owner (`..`).
    Parent,
}

/// Parsed path plot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plot {
    base: PlotBase,
    steps: Vec<PlotStep>,
}

impl Plot {
    /// Builds a plot from parts.
    pub fn new(base: PlotBase, steps: Vec<PlotStep>) -> Self {
        Self { base, steps }
    }

    /// The empty relative plot (the base resource itself).
    pub fn here() -> Self {
        Self::new(PlotBase::Relative, Vec::new())
    }

    /// Start of the plot.
    pub fn base(&self) -> &PlotBase {
        &self.base
    }

    /// Steps after the base.
    pub fn steps(&self) -> &[PlotStep] {
        &self.steps
    }

    /// `true` for root- or resource-based plots.
    pub fn is_absolute(&self) -> bool {
        !matches!(self.base, PlotBase::Relative)
    }

    /// Parses either form: strings starting with `@` are VPlot strings, anything else is path form.
    pub fn parse(text: &str, lookup: &IriLookup) -> Result<Self, PlotError> {
        if text.starts_with('@') {
            let outline = disjoin(&Value::String(text.to_string()), lookup)?;
            Self::from_outline(&outline, lookup)
        } else {
            Self::parse_path(text, lookup)
        }
    }

    /// Parses path form.
    pub fn parse_path(text: &str, lookup: &IriLookup) -> Result<Self, PlotError> {
        let (base, rest) = if let Some(rest) = text.strip_prefix('/') {
            (PlotBase::Root, rest)
        } else if let Some(rest) = text.strip_prefix('~') {
            let (id, rest) = rest.split_once('/').unwrap_or((rest, ""));
            if !is_valid_resource_id(id) {
                return Err(PlotError::InvalidResourceId { id: id.to_string() });
            }
            (PlotBase::Resource(Arc::from(id)), rest)
        } else {
            (PlotBase::Relative, text)
        };
        let body = rest.strip_suffix('/').unwrap_or(rest);
        let mut steps = Vec::new();
        if !body.is_empty() {
            let mut offset = text.len() - rest.len();
            for segment in body.split('/') {
                steps.push(parse_segment(segment, offset, lookup)?);
                offset += segment.len() + 1;
            }
        }
        Ok(Self { base, steps })
    }

    /// Converts a (normalized) outline into a path plot.
    pub fn from_outline(outline: &Value, lookup: &IriLookup) -> Result<Self, PlotError> {
        let normalized = disjoin(outline, lookup)?;
        let sections: Vec<&Value> = match normalized.as_array() {
            Some(items) if items.first().and_then(Value::as_str) == Some(GROUP_TAG) => {
                items[1..].iter().collect()
            }
            _ => vec![&normalized],
        };
        let mut plot = Self::here();
        for (i, section) in sections.iter().enumerate() {
            let items = section.as_array().map(Vec::as_slice).unwrap_or_default();
            let tag = items.first().and_then(Value::as_str).unwrap_or_default();
            match (tag, &items[1.min(items.len())..]) {
                ("@~", []) if i == 0 => plot.base = PlotBase::Root,
                ("@~", [Value::String(id)]) if i == 0 => {
                    plot.base = PlotBase::Resource(Arc::from(id.as_str()));
                }
                ("@.", []) if sections.len() == 1 => {}
                ("@.", [Value::String(seg)]) if seg == ".." => plot.steps.push(PlotStep::Parent),
                ("@.", [Value::String(seg)]) => {
                    check_literal(seg)?;
                    plot.steps.push(PlotStep::Literal(seg.clone()));
                }
                ("@.", [Value::Number(n)]) => {
                    let index = n
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| PlotError::MalformedOutline(format!("index {n}")))?;
                    plot.steps.push(PlotStep::Index(index));
                }
                _ => {
                    return Err(PlotError::NotAPath {
                        tag: tag.to_string(),
                    })
                }
            }
        }
        Ok(plot)
    }

    /// Outline form of this plot.
    pub fn to_outline(&self) -> Value {
        let mut sections = Vec::with_capacity(self.steps.len() + 2);
        sections.push(Value::String(GROUP_TAG.to_string()));
        match &self.base {
            PlotBase::Relative => {}
            PlotBase::Root => sections.push(serde_json::json!(["@~"])),
            PlotBase::Resource(id) => sections.push(serde_json::json!(["@~", &**id])),
        }
        for step in &self.steps {
            sections.push(match step {
                PlotStep::Literal(seg) => serde_json::json!(["@.", seg]),
                PlotStep::Index(index) => serde_json::json!(["@.", index]),
                PlotStep::Parent => serde_json::json!(["@.", ".."]),
            });
        }
        match sections.len() {
            1 => serde_json::json!(["@."]),
            2 => sections.swap_remove(1),
            _ => Value::Array(sections),
        }
    }

    /// Canonical VPlot string of this plot.
    pub fn to_vplot(&self) -> Result<String, PlotError> {
        form(&self.to_outline())
    }

    /// Returns this plot with `step` appended.
    pub fn join(&self, step: PlotStep) -> Self {
        let mut out = self.clone();
        out.steps.push(step);
        out
    }
}

fn check_literal(seg: &str) -> Result<(), PlotError> {
    if seg.is_empty() || seg == "." || seg == ".." {
        return Err(PlotError::InvalidSegment {
            segment: seg.to_string(),
        });
    }
    Ok(())
}

/// Classifies the raw segment text; only decoded text becomes a literal.
fn parse_segment(segment: &str, offset: usize, lookup: &IriLookup) -> Result<PlotStep, PlotError> {
    if segment == ".." {
        return Ok(PlotStep::Parent);
    }
    if let Some(index) = lookup.index_of(segment) {
        return Ok(PlotStep::Index(index));
    }
    let decoded = unescape_literal(segment, offset)?;
    check_literal(&decoded)?;
    Ok(PlotStep::Literal(decoded))
}

impl fmt::Display for Plot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            PlotBase::Relative => {}
            PlotBase::Root => f.write_str("/")?,
            PlotBase::Resource(id) => write!(f, "~{id}/")?,
        }
        for step in &self.steps {
            match step {
                PlotStep::Literal(seg) => write!(f, "{}/", escape_segment(seg))?,
                PlotStep::Index(index) => write!(f, "{index}/")?,
                PlotStep::Parent => f.write_str("../")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    #[test]
    fn path_forms() {
        let empty = IriLookup::new();
        let plot = Plot::parse("1/", &empty).unwrap();
        assert_eq!(plot.base(), &PlotBase::Relative);
        assert_eq!(plot.steps(), &[PlotStep::Literal("1".into())]);
        assert_eq!(plot.to_string(), "%31/");

        let plot = Plot::parse("/a/../b%2Fc/", &empty).unwrap();
        assert_eq!(plot.base(), &PlotBase::Root);
        assert_eq!(
            plot.steps(),
            &[
                PlotStep::Literal("a".into()),
                PlotStep::Parent,
                PlotStep::Literal("b/c".into())
            ]
        );
        assert_eq!(plot.to_string(), "/a/../b%2Fc/");

        let plot = Plot::parse("~abc123/x/", &empty).unwrap();
        assert_eq!(plot.base(), &PlotBase::Resource(Arc::from("abc123")));
        assert_eq!(Plot::parse("", &empty).unwrap(), Plot::here());
    }

    #[test]
    fn indices_only_when_bound() {
        let mut lookup = IriLookup::new();
        lookup.insert(1, "https://valospace.org/0#name").unwrap();
        assert_eq!(Plot::parse("1/", &lookup).unwrap().steps(), &[PlotStep::Index(1)]);
        assert_eq!(
            Plot::parse("2/", &lookup).unwrap().steps(),
            &[PlotStep::Literal("2".into())]
        );
    }

    #[test]
    fn invalid_paths() {
        let empty = IriLookup::new();
        assert!(matches!(
            Plot::parse("a//b/", &empty),
            Err(PlotError::InvalidSegment { .. })
        ));
        assert!(matches!(
            Plot::parse("~a/x/", &empty),
            Err(PlotError::InvalidResourceId { .. })
        ));
        assert!(matches!(
            Plot::parse("%zz/", &empty),
            Err(PlotError::InvalidEscape { offset: 0 })
        ));
    }

    #[test]
    fn outline_roundtrip() {
        let empty = IriLookup::new();
        for text in ["1/", "/a/../b/", "~abc123/x/y/", ""] {
            let plot = Plot::parse(text, &empty).unwrap();
            let vplot = plot.to_vplot().unwrap();
            assert_eq!(Plot::parse(&vplot, &empty).unwrap(), plot, "via {vplot}");
        }
        assert_eq!(Plot::parse("1/", &empty).unwrap().to_outline(), json!(["@.", "1"]));
        assert_eq!(
            Plot::parse("/1/", &empty).unwrap().to_vplot().unwrap(),
            "@~@.:%31@@"
        );
    }

    #[test]
    fn escaped_decimals_stay_literal_under_a_bound_lookup() {
        let mut lookup = IriLookup::new();
        lookup.insert(3, "https://valospace.org/0#name").unwrap();
        let literal = Plot::parse("%33/", &lookup).unwrap();
        assert_eq!(literal.steps(), &[PlotStep::Literal("3".into())]);
        assert_eq!(literal.to_string(), "%33/");
        assert_eq!(Plot::parse(&literal.to_string(), &lookup).unwrap(), literal);
        assert_eq!(Plot::parse(&literal.to_vplot().unwrap(), &lookup).unwrap(), literal);
        assert_eq!(Plot::from_outline(&literal.to_outline(), &lookup).unwrap(), literal);

        let index = Plot::parse("3/", &lookup).unwrap();
        assert_eq!(index.steps(), &[PlotStep::Index(3)]);
        assert_eq!(Plot::parse(&index.to_vplot().unwrap(), &lookup).unwrap(), index);
        assert_ne!(literal, index);
    }

    #[test]
    fn non_path_outlines_are_rejected() {
        let empty = IriLookup::new();
        assert!(matches!(
            Plot::from_outline(&json!(["@!fn", "a"]), &empty),
            Err(PlotError::NotAPath { .. })
        ));
        assert!(matches!(
            Plot::from_outline(&json!(["@@", ["@.", "a"], ["@~"]]), &empty),
            Err(PlotError::NotAPath { .. })
        ));
    }
}

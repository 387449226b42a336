// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! VPlot string parser and canonical former.
//!
//! Grammar (ASCII):
//!
//! ```text
//! vplot   := vstep { vstep } [ "@@" ]
//! vstep   := "@" marker [ term ] [ "." literal ] { ":" param }
//! marker  := "" | "$" | "!" | "." | "-" | "+" | "~"
//! param   := literal | vstep { vstep } "@@"
//! ```
//!
//! `.literal` is only legal on `@$` (single value) and `@~` (resource id);
//! those two never take `:` params. Canonical strings always close the top
//! level with `@@`.
//!
//! A `:` param written as a bare decimal that is bound in the lookup parses
//! as an index (a JSON number in the outline). Outline strings are always
//! literals, and all-digit literals are formed with their first digit
//! escaped.
use serde_json::Value;

use super::escape::{escape_literal, escape_segment, unescape_literal};
use super::{
    is_valid_resource_id, validate_term, IriLookup, PlotError, GROUP_TAG, MAX_TERM_LEN,
};

/// Parsed section tag.
struct Tag<'a> {
    marker: &'a str,
}

impl Tag<'_> {
    fn takes_value(&self) -> bool {
        matches!(self.marker, "$" | "~")
    }
}

fn split_tag(tag: &str) -> Result<Tag<'_>, PlotError> {
    let rest = tag
        .strip_prefix('@')
        .ok_or_else(|| PlotError::MalformedOutline(format!("tag '{tag}' must start with '@'")))?;
    let (marker, term) = match rest.as_bytes().first() {
        Some(b'$' | b'!' | b'.' | b'-' | b'+' | b'~') => rest.split_at(1),
        _ => ("", rest),
    };
    validate_term(term)?;
    Ok(Tag { marker })
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    lookup: &'a IriLookup,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn at_terminator(&self) -> bool {
        self.src[self.pos..].starts_with(GROUP_TAG)
    }

    fn unexpected(&self) -> PlotError {
        let found = self.src[self.pos..].chars().next().unwrap_or('\0');
        PlotError::UnexpectedChar {
            found,
            offset: self.pos,
        }
    }

    /// Parses steps until a terminator (required when `nested`) or end of input.
    fn steps(&mut self, nested: bool) -> Result<Vec<Value>, PlotError> {
        let opened_at = self.pos;
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                None if nested => return Err(PlotError::UnterminatedGroup { offset: opened_at }),
                None => break,
                Some(b'@') if self.at_terminator() => {
                    if steps.is_empty() {
                        return Err(PlotError::EmptyGroup { offset: self.pos });
                    }
                    self.pos += GROUP_TAG.len();
                    if !nested && self.pos < self.src.len() {
                        return Err(PlotError::TrailingInput { offset: self.pos });
                    }
                    break;
                }
                Some(b'@') => steps.push(self.step()?),
                Some(_) => return Err(self.unexpected()),
            }
        }
        Ok(steps)
    }

    fn step(&mut self) -> Result<Value, PlotError> {
        let start = self.pos;
        self.pos += 1;
        if let Some(b'$' | b'!' | b'.' | b'-' | b'+' | b'~') = self.peek() {
            self.pos += 1;
        }
        let marker_end = self.pos;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                while let Some(b) = self.peek() {
                    if b.is_ascii_alphanumeric() || b == b'_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            None | Some(b'.' | b':' | b'@') => {}
            Some(_) => return Err(PlotError::InvalidTerm { offset: self.pos }),
        }
        let term = &self.src[marker_end..self.pos];
        if term.len() > MAX_TERM_LEN {
            return Err(PlotError::TermTooLong {
                term: term.to_string(),
            });
        }
        let tag_text = &self.src[start..self.pos];
        let tag = split_tag(tag_text)?;
        let mut section = vec![Value::String(tag_text.to_string())];

        if self.peek() == Some(b'.') {
            if !tag.takes_value() {
                return Err(PlotError::ShapeNotAllowed {
                    tag: tag_text.to_string(),
                    what: "a '.value' suffix",
                });
            }
            self.pos += 1;
            let value = self.literal()?;
            if tag.marker == "~" && !is_valid_resource_id(&value) {
                return Err(PlotError::InvalidResourceId { id: value });
            }
            section.push(Value::String(value));
        }
        while self.peek() == Some(b':') {
            if tag.takes_value() {
                return Err(PlotError::ShapeNotAllowed {
                    tag: tag_text.to_string(),
                    what: "':' params",
                });
            }
            self.pos += 1;
            section.push(self.param()?);
        }
        Ok(Value::Array(section))
    }

    fn param(&mut self) -> Result<Value, PlotError> {
        if self.peek() == Some(b'@') && !self.at_terminator() {
            let steps = self.steps(true)?;
            return Ok(group(steps));
        }
        let (start, raw) = self.raw_literal();
        if let Some(index) = self.lookup.index_of(raw) {
            return Ok(Value::from(index));
        }
        unescape_literal(raw, start).map(Value::String)
    }

    /// Undecoded literal text and its offset.
    fn raw_literal(&mut self) -> (usize, &'a str) {
        let src = self.src;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'@' || b == b':' {
                break;
            }
            self.pos += 1;
        }
        (start, &src[start..self.pos])
    }

    fn literal(&mut self) -> Result<String, PlotError> {
        let (start, raw) = self.raw_literal();
        unescape_literal(raw, start)
    }
}

/// Wraps steps in a `@@` group unless there is exactly one.
fn group(mut steps: Vec<Value>) -> Value {
    if steps.len() == 1 {
        steps.remove(0)
    } else {
        let mut out = Vec::with_capacity(steps.len() + 1);
        out.push(Value::String(GROUP_TAG.to_string()));
        out.extend(steps);
        Value::Array(out)
    }
}

/// Parses a plot string into its outline.
pub fn disjoin_str(text: &str, lookup: &IriLookup) -> Result<Value, PlotError> {
    if text.is_empty() {
        return Err(PlotError::Empty);
    }
    let mut parser = Parser {
        src: text,
        pos: 0,
        lookup,
    };
    let steps = parser.steps(false)?;
    if steps.is_empty() {
        return Err(PlotError::Empty);
    }
    Ok(group(steps))
}

/// Parses a string, or normalizes an already structured outline.
///
/// Idempotent: `disjoin(&disjoin(x)?)? == disjoin(x)?` for the same lookup.
pub fn disjoin(input: &Value, lookup: &IriLookup) -> Result<Value, PlotError> {
    match input {
        Value::String(text) => disjoin_str(text, lookup),
        Value::Array(_) => normalize_section(input, Some(lookup)),
        _ => Err(PlotError::MalformedOutline(
            "expected a plot string or a section array".into(),
        )),
    }
}

/// Renders the canonical string form of an outline.
pub fn form(outline: &Value) -> Result<String, PlotError> {
    let normalized = match outline {
        Value::String(text) => disjoin_str(text, &IriLookup::new())?,
        _ => normalize_section(outline, None)?,
    };
    let mut out = String::new();
    write_steps(&normalized, &mut out);
    out.push_str(GROUP_TAG);
    Ok(out)
}

/// Forms a string from a programmatically assembled outline.
pub fn conjoin(outline: &Value) -> Result<String, PlotError> {
    if !outline.is_array() {
        return Err(PlotError::MalformedOutline(
            "conjoin expects a section array".into(),
        ));
    }
    form(outline)
}

fn normalize_section(section: &Value, lookup: Option<&IriLookup>) -> Result<Value, PlotError> {
    let items = section
        .as_array()
        .ok_or_else(|| PlotError::MalformedOutline("section must be an array".into()))?;
    let (tag_value, params) = items
        .split_first()
        .ok_or_else(|| PlotError::MalformedOutline("section without tag".into()))?;
    let tag_text = tag_value
        .as_str()
        .ok_or_else(|| PlotError::MalformedOutline("section tag must be a string".into()))?;

    if tag_text == GROUP_TAG {
        let mut steps = Vec::with_capacity(params.len());
        for param in params {
            let step = normalize_section(param, lookup)?;
            match step.as_array() {
                Some(inner) if inner.first().and_then(Value::as_str) == Some(GROUP_TAG) => {
                    steps.extend(inner[1..].iter().cloned());
                }
                _ => steps.push(step),
            }
        }
        if steps.is_empty() {
            return Err(PlotError::EmptyGroup { offset: 0 });
        }
        return Ok(group(steps));
    }

    let tag = split_tag(tag_text)?;
    let mut out = vec![Value::String(tag_text.to_string())];
    if tag.takes_value() {
        match params {
            [] => {}
            [Value::String(value)] => {
                if tag.marker == "~" && !is_valid_resource_id(value) {
                    return Err(PlotError::InvalidResourceId { id: value.clone() });
                }
                out.push(Value::String(value.clone()));
            }
            _ => {
                return Err(PlotError::ShapeNotAllowed {
                    tag: tag_text.to_string(),
                    what: "anything but a single string value",
                })
            }
        }
        return Ok(Value::Array(out));
    }
    for param in params {
        out.push(match param {
            Value::String(_) => param.clone(),
            Value::Number(n) => {
                let index = n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| PlotError::MalformedOutline(format!("index {n} out of range")))?;
                match lookup {
                    Some(lookup) if !lookup.contains(index) => Value::String(index.to_string()),
                    _ => Value::from(index),
                }
            }
            Value::Array(_) => normalize_section(param, lookup)?,
            _ => {
                return Err(PlotError::MalformedOutline(
                    "params must be strings, indices or sections".into(),
                ))
            }
        });
    }
    Ok(Value::Array(out))
}

fn write_steps(section: &Value, out: &mut String) {
    let Some(items) = section.as_array() else {
        return;
    };
    if items.first().and_then(Value::as_str) == Some(GROUP_TAG) {
        for step in &items[1..] {
            write_step(step, out);
        }
    } else {
        write_step(section, out);
    }
}

fn write_step(section: &Value, out: &mut String) {
    let Some((tag, params)) = section.as_array().and_then(|items| items.split_first()) else {
        return;
    };
    let tag = tag.as_str().unwrap_or_default();
    out.push_str(tag);
    let takes_value = tag.starts_with("@$") || tag.starts_with("@~");
    for param in params {
        out.push(if takes_value { '.' } else { ':' });
        match param {
            Value::String(text) if takes_value => out.push_str(&escape_literal(text)),
            Value::String(text) => out.push_str(&escape_segment(text)),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::Array(_) => {
                write_steps(param, out);
                out.push_str(GROUP_TAG);
            }
            _ => {}
        }
    }
}

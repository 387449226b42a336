// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Plot codec: compact string ⟷ structured outline conversion.
//!
//! A plot has two canonical representations:
//!
//! - **string form**, the ASCII wire encoding (`@!fn:a:@.:x@@@@`), and
//! - **outline form**, a `serde_json::Value` where every section is an array
//!   whose first element is its tag (`["@!fn", "a", ["@.", "x"]]`).
//!
//! [`disjoin`] parses strings (or normalizes outlines), [`form`] renders the
//! canonical string, [`conjoin`] is the entry point for outlines assembled by
//! hand. Path plots ([`Plot`]) are the subset used to address resources inside
//! deltas; they also have a `seg/seg/` path form.
//!
//! Wire format stability: markers, the reserved byte set and the `@@`
//! terminator are frozen. Any change breaks existing chronicles.

mod escape;
mod lookup;
mod path;
mod vplot;

use thiserror::Error;

pub use escape::{escape_literal, escape_segment, unescape_literal};
pub use lookup::IriLookup;
pub use path::{Plot, PlotBase, PlotStep};
pub use vplot::{conjoin, disjoin, disjoin_str, form};

/// Maximum length of a context term: one leading character plus 31 more.
pub const MAX_TERM_LEN: usize = 32;

/// Minimum length of a resource id segment.
pub const MIN_RAW_ID_LEN: usize = 2;

/// Section markers understood by the codec (the part after `@`).
pub const MARKERS: [&str; 7] = ["", "$", "!", ".", "-", "+", "~"];

/// Group tag / terminator.
pub const GROUP_TAG: &str = "@@";

/// Errors from plot parsing and outline validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlotError {
    /// Input was empty.
    #[error("empty plot")]
    Empty,
    /// A context term does not match `[A-Za-z_][A-Za-z0-9_]*`.
    #[error("invalid context term at offset {offset}: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidTerm {
        /// Byte offset of the offending character.
        offset: usize,
    },
    /// A context term exceeds [`MAX_TERM_LEN`].
    #[error("context term '{term}' exceeds 32 characters")]
    TermTooLong {
        /// The offending term.
        term: String,
    },
    /// An opened group was never closed by `@@`.
    #[error("unterminated group opened at offset {offset}")]
    UnterminatedGroup {
        /// Byte offset where the group was opened.
        offset: usize,
    },
    /// A group closed with no steps.
    #[error("empty group at offset {offset}")]
    EmptyGroup {
        /// Byte offset of the terminator.
        offset: usize,
    },
    /// Bytes remained after the top-level terminator.
    #[error("trailing input after terminator at offset {offset}")]
    TrailingInput {
        /// Byte offset of the first trailing byte.
        offset: usize,
    },
    /// A character that cannot start a step.
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        found: char,
        /// Its byte offset.
        offset: usize,
    },
    /// `.value` suffix on a marker other than `@$`/`@~`, or `:` params on them.
    #[error("section '{tag}' does not take {what}")]
    ShapeNotAllowed {
        /// Section tag.
        tag: String,
        /// Which part was not allowed.
        what: &'static str,
    },
    /// A resource id segment violates the charset/minimum-length constraint.
    #[error("invalid resource id '{id}': need at least 2 of [A-Za-z0-9_-.~+=]")]
    InvalidResourceId {
        /// The offending id.
        id: String,
    },
    /// Malformed `%XX` escape.
    #[error("invalid percent escape at offset {offset}")]
    InvalidEscape {
        /// Byte offset of the escape.
        offset: usize,
    },
    /// Outline value has the wrong shape.
    #[error("malformed outline: {0}")]
    MalformedOutline(String),
    /// A path segment is empty or a reserved dot segment in the wrong place.
    #[error("invalid path segment '{segment}'")]
    InvalidSegment {
        /// The offending segment.
        segment: String,
    },
    /// Outline does not describe a resource path.
    #[error("outline section '{tag}' is not a path step")]
    NotAPath {
        /// Section tag found.
        tag: String,
    },
    /// `@context` section has the wrong shape.
    #[error("malformed @context: {0}")]
    MalformedContext(String),
    /// `@context` tried to rebind an index.
    #[error("@context rebinds index {index} (already '{existing}')")]
    ContextConflict {
        /// The index.
        index: u32,
        /// Its existing IRI.
        existing: String,
    },
}

/// Returns `true` when `id` satisfies the resource id charset and length constraint.
pub fn is_valid_resource_id(id: &str) -> bool {
    id.len() >= MIN_RAW_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'~' | b'+' | b'='))
}

/// Validates a context term (`[A-Za-z_][A-Za-z0-9_]{0,31}`).
pub fn validate_term(term: &str) -> Result<(), PlotError> {
    let mut bytes = term.bytes();
    match bytes.next() {
        None => return Ok(()),
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        Some(_) => return Err(PlotError::InvalidTerm { offset: 0 }),
    }
    if let Some(pos) = bytes.position(|b| !(b.is_ascii_alphanumeric() || b == b'_')) {
        return Err(PlotError::InvalidTerm { offset: pos + 1 });
    }
    if term.len() > MAX_TERM_LEN {
        return Err(PlotError::TermTooLong {
            term: term.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn resource_id_constraint() {
        assert!(is_valid_resource_id("ab"));
        assert!(is_valid_resource_id("a-b_c.d~e+f="));
        assert!(!is_valid_resource_id("a"));
        assert!(!is_valid_resource_id("a/b"));
        assert!(!is_valid_resource_id("a b"));
    }

    #[test]
    fn term_constraint() {
        assert!(validate_term("").is_ok());
        assert!(validate_term("_x9").is_ok());
        assert!(validate_term(&"a".repeat(32)).is_ok());
        assert!(matches!(
            validate_term(&"a".repeat(33)),
            Err(PlotError::TermTooLong { .. })
        ));
        assert_eq!(validate_term("9a"), Err(PlotError::InvalidTerm { offset: 0 }));
        assert_eq!(validate_term("ab-c"), Err(PlotError::InvalidTerm { offset: 2 }));
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Field semantics table.
//!
//! Built once at engine init ([`Ontology::valospace`]) and passed by reference
//! into every apply. Terms the table does not know are plain literals.
use std::borrow::Cow;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::plot::IriLookup;

/// IRI namespace of the built-in terms.
pub const VALOSPACE_NS: &str = "https://valospace.org/0#";

/// Well-known term names.
pub mod terms {
    /// Display name.
    pub const NAME: &str = "name";
    /// Generic literal payload.
    pub const VALUE: &str = "value";
    /// Root flag: events must carry an author aspect.
    pub const REQUIRE_AUTHORED_EVENTS: &str = "requireAuthoredEvents";
    /// Identity handle matched against `author.publicIdentity`.
    pub const PUBLIC_IDENTITY: &str = "publicIdentity";
    /// Hex Ed25519 verifying key of an identity.
    pub const PUBLIC_KEY: &str = "publicKey";
    /// Owning resource.
    pub const OWNER: &str = "owner";
    /// Owned resources (reverse of `owner`).
    pub const OWNLINGS: &str = "ownlings";
    /// Prototype an instance was created from.
    pub const INSTANCE_PROTOTYPE: &str = "instancePrototype";
    /// Instances of a prototype (reverse of `instancePrototype`).
    pub const INSTANCES: &str = "instances";
    /// Prototype-side counterpart of a ghost.
    pub const GHOST_PROTOTYPE: &str = "ghostPrototype";
    /// Relation target.
    pub const TARGET: &str = "target";
    /// Relations pointing here (reverse of `target`).
    pub const TARGET_OF: &str = "targetOf";
    /// Free-form reference collection.
    pub const TAGS: &str = "tags";
    /// Group members.
    pub const MEMBERS: &str = "members";
    /// Groups containing a resource (reverse of `members`).
    pub const MEMBER_OF: &str = "memberOf";
    /// Director identities of the chronicle.
    pub const DIRECTORS: &str = "directors";
    /// Chronicles an identity directs (reverse of `directors`).
    pub const DIRECTOR_OF: &str = "directorOf";
    /// Contributor identities of the chronicle.
    pub const CONTRIBUTORS: &str = "contributors";
    /// Chronicles an identity contributes to (reverse of `contributors`).
    pub const CONTRIBUTOR_OF: &str = "contributorOf";
}

/// Shape of a field's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON literal.
    Literal,
    /// One reference.
    Singular,
    /// Ordered reference collection.
    Plural,
}

/// Semantics of one term.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    /// Value shape.
    pub kind: FieldKind,
    /// Reverse term kept in sync on the referenced resource.
    pub coupled: Option<&'static str>,
    /// Maintained only as a side effect of the coupled forward field.
    pub inferred: bool,
    /// A resource with references in this field cannot be destroyed.
    pub prevents_destroy: bool,
    /// Instances read this field from their prototype when unset.
    pub inherited: bool,
    /// Changing it on the chronicle root needs a director: any change of a
    /// reference field, or a literal switched off from `true`.
    pub privileged: bool,
    /// Value read when nothing along the inheritance chain sets the field.
    pub default: Option<Value>,
}

impl FieldDef {
    /// Inherited literal with no default.
    pub fn literal() -> Self {
        Self {
            kind: FieldKind::Literal,
            coupled: None,
            inferred: false,
            prevents_destroy: false,
            inherited: true,
            privileged: false,
            default: None,
        }
    }

    fn reference(kind: FieldKind, coupled: Option<&'static str>) -> Self {
        Self {
            kind,
            coupled,
            ..Self::literal()
        }
    }

    fn inferred(mut self) -> Self {
        self.inferred = true;
        self
    }

    fn prevents_destroy(mut self) -> Self {
        self.prevents_destroy = true;
        self
    }

    fn local(mut self) -> Self {
        self.inherited = false;
        self
    }

    fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// `true` for singular and plural references.
    pub fn is_reference(&self) -> bool {
        self.kind != FieldKind::Literal
    }
}

/// Term → field semantics dispatch table.
#[derive(Clone, Debug)]
pub struct Ontology {
    defs: FxHashMap<&'static str, FieldDef>,
    fallback: FieldDef,
}

impl Ontology {
    /// The built-in valospace vocabulary.
    pub fn valospace() -> Self {
        use terms::{
            CONTRIBUTORS, CONTRIBUTOR_OF, DIRECTORS, DIRECTOR_OF, GHOST_PROTOTYPE, INSTANCES,
            INSTANCE_PROTOTYPE, MEMBERS, MEMBER_OF, NAME, OWNER, OWNLINGS, PUBLIC_IDENTITY,
            PUBLIC_KEY, REQUIRE_AUTHORED_EVENTS, TAGS, TARGET, TARGET_OF, VALUE,
        };
        use FieldKind::{Plural, Singular};

        let mut defs = FxHashMap::default();
        let mut add = |term: &'static str, def: FieldDef| {
            defs.insert(term, def);
        };
        add(NAME, FieldDef::literal());
        add(VALUE, FieldDef::literal());
        add(
            REQUIRE_AUTHORED_EVENTS,
            FieldDef::literal()
                .local()
                .privileged()
                .with_default(Value::Bool(false)),
        );
        add(PUBLIC_IDENTITY, FieldDef::literal().local());
        add(PUBLIC_KEY, FieldDef::literal().local());

        add(OWNER, FieldDef::reference(Singular, Some(OWNLINGS)).local());
        add(
            OWNLINGS,
            FieldDef::reference(Plural, Some(OWNER))
                .inferred()
                .prevents_destroy()
                .local(),
        );
        add(
            INSTANCE_PROTOTYPE,
            FieldDef::reference(Singular, Some(INSTANCES)).local(),
        );
        add(
            INSTANCES,
            FieldDef::reference(Plural, Some(INSTANCE_PROTOTYPE))
                .inferred()
                .prevents_destroy()
                .local(),
        );
        add(
            GHOST_PROTOTYPE,
            FieldDef::reference(Singular, None).inferred().local(),
        );
        add(TARGET, FieldDef::reference(Singular, Some(TARGET_OF)));
        add(
            TARGET_OF,
            FieldDef::reference(Plural, Some(TARGET))
                .inferred()
                .prevents_destroy()
                .local(),
        );
        add(TAGS, FieldDef::reference(Plural, None));
        add(MEMBERS, FieldDef::reference(Plural, Some(MEMBER_OF)));
        add(
            MEMBER_OF,
            FieldDef::reference(Plural, Some(MEMBERS)).inferred().local(),
        );
        add(
            DIRECTORS,
            FieldDef::reference(Plural, Some(DIRECTOR_OF))
                .local()
                .privileged(),
        );
        add(
            DIRECTOR_OF,
            FieldDef::reference(Plural, Some(DIRECTORS))
                .inferred()
                .local(),
        );
        add(
            CONTRIBUTORS,
            FieldDef::reference(Plural, Some(CONTRIBUTOR_OF)).local(),
        );
        add(
            CONTRIBUTOR_OF,
            FieldDef::reference(Plural, Some(CONTRIBUTORS))
                .inferred()
                .local(),
        );
        Self {
            defs,
            fallback: FieldDef::literal(),
        }
    }

    /// Semantics of `term`; unknown terms are inherited literals.
    pub fn def(&self, term: &str) -> &FieldDef {
        self.defs.get(term).unwrap_or(&self.fallback)
    }

    /// Terms whose root changes need a director.
    pub fn privileged_terms(&self) -> impl Iterator<Item = (&'static str, &FieldDef)> {
        self.defs
            .iter()
            .filter(|(_, def)| def.privileged)
            .map(|(term, def)| (*term, def))
    }

    /// `true` when the table defines `term`.
    pub fn knows(&self, term: &str) -> bool {
        self.defs.contains_key(term)
    }

    /// Resolves a delta key to a term: bound `@context` indices expand to
    /// their IRI, and IRIs in the valospace namespace shorten to the bare term.
    pub fn resolve_term<'a>(&self, key: &'a str, lookup: &'a IriLookup) -> Cow<'a, str> {
        let expanded = lookup
            .index_of(key)
            .and_then(|index| lookup.get(index))
            .unwrap_or(key);
        match expanded.strip_prefix(VALOSPACE_NS) {
            Some(term) => Cow::Borrowed(term),
            None if expanded == key => Cow::Borrowed(key),
            None => Cow::Owned(expanded.to_string()),
        }
    }
}

impl Default for Ontology {
    fn default() -> Self {
        Self::valospace()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn couplings_are_symmetric() {
        let ontology = Ontology::valospace();
        for (term, def) in &ontology.defs {
            if let Some(reverse) = def.coupled {
                assert_eq!(
                    ontology.def(reverse).coupled,
                    Some(*term),
                    "{term} <-> {reverse}"
                );
            }
        }
    }

    #[test]
    fn unknown_terms_are_inherited_literals() {
        let ontology = Ontology::valospace();
        let def = ontology.def("color");
        assert_eq!(def.kind, FieldKind::Literal);
        assert!(def.inherited);
        assert!(!ontology.knows("color"));
        assert!(ontology.def(terms::OWNLINGS).inferred);
        assert!(!ontology.def(terms::OWNER).inherited);
    }

    #[test]
    fn only_role_and_requirement_terms_are_privileged() {
        let ontology = Ontology::valospace();
        let mut privileged: Vec<&str> =
            ontology.privileged_terms().map(|(term, _)| term).collect();
        privileged.sort_unstable();
        assert_eq!(
            privileged,
            vec![terms::DIRECTORS, terms::REQUIRE_AUTHORED_EVENTS]
        );
    }

    #[test]
    fn terms_resolve_through_context_and_namespace() {
        let ontology = Ontology::valospace();
        let mut lookup = IriLookup::new();
        lookup.insert(0, "https://valospace.org/0#name").unwrap();
        lookup.insert(1, "https://example.org/color").unwrap();
        assert_eq!(ontology.resolve_term("0", &lookup), "name");
        assert_eq!(ontology.resolve_term("1", &lookup), "https://example.org/color");
        assert_eq!(ontology.resolve_term("2", &lookup), "2");
        assert_eq!(
            ontology.resolve_term("https://valospace.org/0#tags", &lookup),
            "tags"
        );
    }
}

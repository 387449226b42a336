// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delta constructors used across test suites.

use serde_json::{json, Value};

use crate::authors::TestAuthor;

/// Creates the identity resource of `author` as a global resource.
pub fn register_identity(author: &TestAuthor) -> Value {
    json!({
        "&+": {
            author.resource_id(): {
                "@type": "Identity",
                "publicIdentity": author.public_identity(),
                "publicKey": author.public_key_hex(),
            },
        },
    })
}

/// Registers `author` and adds it to the root's `term` role (`directors` or `contributors`).
pub fn grant_role(author: &TestAuthor, term: &str) -> Value {
    let mut delta = register_identity(author);
    if let Some(map) = delta.as_object_mut() {
        map.insert(
            term.to_string(),
            json!([{ "@id": format!("~{}", author.resource_id()) }]),
        );
    }
    delta
}

/// Registers `author` as a director (the bootstrap event of a chronicle).
pub fn bootstrap_director(author: &TestAuthor) -> Value {
    grant_role(author, "directors")
}

/// Registers `author` as a contributor.
pub fn add_contributor(author: &TestAuthor) -> Value {
    grant_role(author, "contributors")
}

/// Sets the root's `requireAuthoredEvents`.
pub fn require_authored_events(required: bool) -> Value {
    json!({ "requireAuthoredEvents": required })
}

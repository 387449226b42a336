// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Valos chronicle core.
//!
//! A chronicle is an append-only, hash-chained event log that is the only
//! source of truth for a prototype-based resource graph. This crate holds
//! everything needed to turn a log into state deterministically:
//!
//! - [`locator`]: resource locators ([`Vrl`]) and ghost paths
//! - [`plot`]: the plot codec (string and outline forms, path plots)
//! - [`state`]: the persistent copy-on-write [`StateTree`]
//! - [`ontology`]: per-term field semantics, built once
//! - [`ghost`]: ghost resolution, materialization and immaterialization
//! - [`delta`]: the pure [`DeltaEngine`]
//! - [`canonical`] and [`envelope`]: the wire envelope and its signing bytes
//! - [`author`]: signature, role and hash-chain validation
//! - [`chronicle`]: the per-chronicle state machine with sealing
//! - [`store`]: event log and blob store seams
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use valos_chronicle::{Chronicle, ChronicleConfig, EventEnvelope};
//!
//! let mut chronicle = Chronicle::new(ChronicleConfig::new("chronicle"))?;
//! let delta = json!({"&~": {"1/": {"name": "X"}}});
//! chronicle.receive(EventEnvelope::new(0, "cmd-0", delta))?;
//! let state = chronicle.current_state();
//! assert!(state.get("1/").is_some());
//! # Ok::<(), valos_chronicle::ChronicleError>(())
//! ```
#![forbid(unsafe_code)]

pub mod author;
pub mod canonical;
pub mod chronicle;
pub mod config;
pub mod delta;
pub mod envelope;
pub mod ghost;
pub mod ident;
pub mod locator;
pub mod ontology;
pub mod plot;
pub mod state;
pub mod store;

pub use author::{
    chain_hash, sign_envelope, AuthorshipValidator, ChainLink, ChainState, Invalidation,
    InvalidationReason, Role,
};
pub use chronicle::{
    AcceptedEvent, Chronicle, ChronicleError, ChronicleEvent, ErrorClass, SealedAuthor,
    SealedEvent, SharedChronicle,
};
pub use config::ChronicleConfig;
pub use delta::{ApplyOutcome, DeltaEngine, DeltaError, ReorderPolicy, SideEffect};
pub use envelope::{AuthorAspect, CommandAspect, EventAspect, EventEnvelope, LogAspect};
pub use ghost::{immaterialize, materialize, GhostError, Resolver};
pub use ident::Hash;
pub use locator::{GhostPath, GhostStep, LocatorError, Vrl};
pub use ontology::{FieldDef, FieldKind, Ontology};
pub use plot::{conjoin, disjoin, form, IriLookup, Plot, PlotError};
pub use state::{FieldValue, ResourceNode, StateTree};
pub use store::{
    BlobHash, BlobStore, EventLogStore, LogStoreError, MemoryBlobStore, MemoryEventLog,
};

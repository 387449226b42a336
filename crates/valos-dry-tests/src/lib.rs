// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for valos crates.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake
//! - [`authors`] - Deterministic Ed25519 author identities
//! - [`deltas`] - Delta constructors for identities and roles
//! - [`log`] - Gapless, hash-chained envelope sequences
#![forbid(unsafe_code)]

pub mod authors;
pub mod config;
pub mod deltas;
pub mod log;

pub use authors::TestAuthor;
pub use config::InMemoryConfigStore;
pub use log::LogBuilder;

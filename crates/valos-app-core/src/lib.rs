// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for valos tools: config port and preferences.
//! Storage adapters plug in through [`config::ConfigStore`].
#![forbid(unsafe_code)]

pub mod config;
pub mod prefs;

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted defaults for the `valos` CLI.

use serde::{Deserialize, Serialize};

/// Config key the CLI stores [`ChroniclePrefs`] under.
pub const PREFS_KEY: &str = "chronicle-prefs";

/// How the CLI renders results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable tables.
    #[default]
    Table,
    /// One JSON document.
    Json,
}

/// Saved CLI preferences. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChroniclePrefs {
    /// Chronicle id used when a command does not name one.
    pub chronicle_id: String,
    /// Whether new chronicles start with `requireAuthoredEvents`.
    pub require_authored_events: bool,
    /// Default output format.
    pub output: OutputFormat,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ChroniclePrefs {
    fn default() -> Self {
        Self {
            chronicle_id: "chronicle".into(),
            require_authored_events: false,
            output: OutputFormat::Table,
            log_filter: "warn".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let prefs: ChroniclePrefs = serde_json::from_str(r#"{"output": "json"}"#).unwrap();
        assert_eq!(prefs.output, OutputFormat::Json);
        assert_eq!(prefs.chronicle_id, "chronicle");
        assert_eq!(prefs.log_filter, "warn");
        let text = serde_json::to_string(&ChroniclePrefs::default()).unwrap();
        assert!(text.contains("\"requireAuthoredEvents\":false"));
    }
}

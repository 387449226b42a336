// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event envelope and its aspects (JSON wire shape, camelCase keys).
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::{self, CanonError};

/// Envelope format version written by this crate.
pub const ENVELOPE_VERSION: u32 = 0;

/// Command aspect: who asked for the change and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAspect {
    /// Command identifier chosen by the proclaiming peer.
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub time_stamp: u64,
}

/// Log aspect: position in the chronicle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAspect {
    /// Gapless, strictly increasing position.
    pub index: u64,
    /// Milliseconds since the Unix epoch at which the log accepted the event.
    pub time_stamp: u64,
}

/// Event aspect: the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventAspect {
    /// Event type tag (e.g. `"DELTA"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Delta applied to the state tree.
    pub delta: Value,
}

impl EventAspect {
    /// A `DELTA` event.
    pub fn delta(delta: Value) -> Self {
        Self {
            event_type: "DELTA".into(),
            delta,
        }
    }
}

/// Author aspect: identity, signature and hash-chain link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorAspect {
    /// Identity handle registered on the chronicle root.
    pub public_identity: String,
    /// Hex Ed25519 signature over [`signing_bytes`].
    pub signature: String,
    /// Log index of the previous author-bearing event, `None` for the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antecedent: Option<u64>,
    /// Hex BLAKE3 chain hash.
    pub chain_hash: String,
}

/// One event as stored in the log and exchanged between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Envelope format version.
    #[serde(default)]
    pub version: u32,
    /// Command aspect.
    pub command: CommandAspect,
    /// Log aspect.
    pub log: LogAspect,
    /// Event aspect.
    pub event: EventAspect,
    /// Author aspect, when the event is signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorAspect>,
}

impl EventEnvelope {
    /// Unsigned envelope carrying `delta` at `index`.
    pub fn new(index: u64, command_id: impl Into<String>, delta: Value) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            command: CommandAspect {
                id: command_id.into(),
                time_stamp: 0,
            },
            log: LogAspect {
                index,
                time_stamp: 0,
            },
            event: EventAspect::delta(delta),
            author: None,
        }
    }

    /// Log index.
    pub fn index(&self) -> u64 {
        self.log.index
    }

    /// Canonical bytes covered by the author signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CanonError> {
        signing_bytes(&self.command, &self.event)
    }
}

/// Canonical CBOR of `{"command": {...}, "event": {"type", "delta"}}`.
///
/// The log and author aspects are excluded: the log index is assigned by the
/// receiving log and the author aspect carries the signature itself.
pub fn signing_bytes(command: &CommandAspect, event: &EventAspect) -> Result<Vec<u8>, CanonError> {
    canonical::encode_json(&json!({
        "command": { "id": command.id, "timeStamp": command.time_stamp },
        "event": { "type": event.event_type, "delta": event.delta },
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn wire_shape_is_camel_case() {
        let mut envelope = EventEnvelope::new(3, "cmd-3", json!({"name": "X"}));
        envelope.author = Some(AuthorAspect {
            public_identity: "alice".into(),
            signature: "00".into(),
            antecedent: Some(1),
            chain_hash: "ff".into(),
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["log"]["index"], json!(3));
        assert_eq!(value["command"]["timeStamp"], json!(0));
        assert_eq!(value["event"]["type"], json!("DELTA"));
        assert_eq!(value["author"]["publicIdentity"], json!("alice"));
        assert_eq!(value["author"]["chainHash"], json!("ff"));
        let back: EventEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn signing_bytes_ignore_log_position_and_key_order() {
        let a = EventEnvelope::new(1, "c", json!({"a": 1, "b": 2}));
        let mut b = EventEnvelope::new(9, "c", json!({"b": 2, "a": 1}));
        b.log.time_stamp = 77;
        assert_eq!(a.signing_bytes().unwrap(), b.signing_bytes().unwrap());
        let c = EventEnvelope::new(1, "other", json!({"a": 1, "b": 2}));
        assert_ne!(a.signing_bytes().unwrap(), c.signing_bytes().unwrap());
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Storage seams: an append-only event log and a content-addressed blob store.
//!
//! Both are traits so hosts can plug in any medium. The in-memory
//! implementations back tests, the CLI and replay.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::envelope::EventEnvelope;
use crate::ident::Hash;

/// Event log failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogStoreError {
    /// Append would leave a gap or overwrite (append-only invariant).
    #[error("index gap in '{chronicle_id}': expected {expected}, got {got}")]
    IndexGap {
        /// Chronicle being appended to.
        chronicle_id: String,
        /// Next free index.
        expected: u64,
        /// Index carried by the envelope.
        got: u64,
    },
    /// Backend failure.
    #[error("log backend: {0}")]
    Backend(String),
}

/// Append-only event log keyed by `(chronicle_id, log.index)`.
pub trait EventLogStore {
    /// Appends `envelope`; its `log.index` must equal [`EventLogStore::len`].
    fn append(&mut self, chronicle_id: &str, envelope: EventEnvelope) -> Result<(), LogStoreError>;

    /// Envelope at `index`.
    fn get(&self, chronicle_id: &str, index: u64) -> Option<EventEnvelope>;

    /// Envelopes with `from <= index < to` (`to = None` reads to the end), in index order.
    fn read_range(
        &self,
        chronicle_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<EventEnvelope>, LogStoreError>;

    /// Number of stored events, which is also the next free index.
    fn len(&self, chronicle_id: &str) -> u64;

    /// `true` when nothing is stored for `chronicle_id`.
    fn is_empty(&self, chronicle_id: &str) -> bool {
        self.len(chronicle_id) == 0
    }
}

/// In-memory [`EventLogStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryEventLog {
    logs: BTreeMap<String, Vec<EventEnvelope>>,
}

impl MemoryEventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLogStore for MemoryEventLog {
    fn append(&mut self, chronicle_id: &str, envelope: EventEnvelope) -> Result<(), LogStoreError> {
        let log = self.logs.entry(chronicle_id.to_string()).or_default();
        let expected = log.len() as u64;
        if envelope.log.index != expected {
            return Err(LogStoreError::IndexGap {
                chronicle_id: chronicle_id.to_string(),
                expected,
                got: envelope.log.index,
            });
        }
        log.push(envelope);
        Ok(())
    }

    fn get(&self, chronicle_id: &str, index: u64) -> Option<EventEnvelope> {
        let log = self.logs.get(chronicle_id)?;
        log.get(usize::try_from(index).ok()?).cloned()
    }

    fn read_range(
        &self,
        chronicle_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<EventEnvelope>, LogStoreError> {
        let Some(log) = self.logs.get(chronicle_id) else {
            return Ok(Vec::new());
        };
        let end = to.map_or(log.len(), |to| {
            usize::try_from(to).map_or(log.len(), |to| to.min(log.len()))
        });
        let start = usize::try_from(from).map_or(end, |from| from.min(end));
        Ok(log[start..end].to_vec())
    }

    fn len(&self, chronicle_id: &str) -> u64 {
        self.logs.get(chronicle_id).map_or(0, |log| log.len() as u64)
    }
}

/// BLAKE3 content hash of a blob.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlobHash(pub Hash);

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Content hash of `bytes` (no domain prefix; identical bytes share a key).
pub fn blob_hash(bytes: &[u8]) -> BlobHash {
    BlobHash(blake3::hash(bytes).into())
}

/// Blob store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobStoreError {
    /// Bytes handed to [`BlobStore::put_verified`] hash to something else.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Claimed hash.
        expected: BlobHash,
        /// Actual hash.
        computed: BlobHash,
    },
}

/// Content-addressed blob store for binary content referenced by resources.
pub trait BlobStore {
    /// Stores `bytes`, returning their hash. Idempotent.
    fn put(&mut self, bytes: &[u8]) -> BlobHash;

    /// Stores `bytes` after checking they hash to `expected`.
    fn put_verified(&mut self, expected: BlobHash, bytes: &[u8]) -> Result<(), BlobStoreError>;

    /// Bytes stored under `hash`.
    fn get(&self, hash: &BlobHash) -> Option<Arc<[u8]>>;

    /// `true` when `hash` is stored.
    fn has(&self, hash: &BlobHash) -> bool {
        self.get(hash).is_some()
    }
}

/// In-memory [`BlobStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: FxHashMap<BlobHash, Arc<[u8]>>,
}

impl MemoryBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, bytes: &[u8]) -> BlobHash {
        let hash = blob_hash(bytes);
        self.blobs.entry(hash).or_insert_with(|| Arc::from(bytes));
        hash
    }

    fn put_verified(&mut self, expected: BlobHash, bytes: &[u8]) -> Result<(), BlobStoreError> {
        let computed = blob_hash(bytes);
        if computed != expected {
            return Err(BlobStoreError::HashMismatch { expected, computed });
        }
        self.blobs.entry(computed).or_insert_with(|| Arc::from(bytes));
        Ok(())
    }

    fn get(&self, hash: &BlobHash) -> Option<Arc<[u8]>> {
        self.blobs.get(hash).cloned()
    }
}

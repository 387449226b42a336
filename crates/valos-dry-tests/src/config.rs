// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use valos_app_core::config::{ConfigError, ConfigStore};

/// In-memory [`ConfigStore`] with call counters and failure switches.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect the other.
///
/// ```
/// use valos_app_core::config::ConfigService;
/// use valos_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// service.save("prefs", &serde_json::json!({"output": "json"})).unwrap();
/// assert_eq!(store.writes(), 1);
/// assert!(store.contains_key("prefs"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    reads: usize,
    writes: usize,
    fail_reads: bool,
    fail_writes: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let store = Self::new();
        store.lock().data = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect();
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every `load_raw` fail with [`ConfigError::Backend`].
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Makes every `save_raw` and `remove_raw` fail with [`ConfigError::Backend`].
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Attempted loads, failed ones included.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Attempted saves and removals, failed ones included.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// `true` when `key` holds a blob.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().data.keys().cloned().collect()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.reads += 1;
        if inner.fail_reads {
            return Err(ConfigError::Backend("simulated read failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.writes += 1;
        if inner.fail_writes {
            return Err(ConfigError::Backend("simulated write failure".into()));
        }
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove_raw(&self, key: &str) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.writes += 1;
        if inner.fail_writes {
            return Err(ConfigError::Backend("simulated write failure".into()));
        }
        inner.data.remove(key);
        Ok(())
    }
}

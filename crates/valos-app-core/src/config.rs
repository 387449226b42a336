// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config storage port and the JSON service on top of it.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage port for raw config blobs keyed by a logical name.
///
/// Keys reaching a store have already passed [`validate_key`].
pub trait ConfigStore {
    /// Loads the blob stored under `key`; [`ConfigError::NotFound`] when absent.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Stores `data` under `key`, replacing any previous blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
    /// Removes `key`. Removing an absent key is not an error.
    fn remove_raw(&self, key: &str) -> Result<(), ConfigError>;
}

/// Config failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("not found")]
    NotFound,
    /// Key outside `[a-z0-9_.-]`, empty, or starting with a dot.
    #[error("invalid config key '{0}'")]
    InvalidKey(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else a backend reports.
    #[error("backend: {0}")]
    Backend(String),
}

/// Checks that `key` is usable as a file stem on every platform.
pub fn validate_key(key: &str) -> Result<(), ConfigError> {
    let charset_ok = key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'.'));
    if key.is_empty() || key.starts_with('.') || !charset_ok {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Reads and writes typed values as pretty JSON through a [`ConfigStore`].
#[derive(Debug, Clone)]
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Service over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Value under `key`, `None` when absent or empty.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        validate_key(key)?;
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Value under `key`, or `T::default()` when absent.
    pub fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, ConfigError> {
        Ok(self.load(key)?.unwrap_or_default())
    }

    /// Stores `value` under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        validate_key(key)?;
        let mut data = serde_json::to_vec_pretty(value)?;
        data.push(b'\n');
        self.store.save_raw(key, &data)
    }

    /// Loads (or defaults) the value under `key`, lets `edit` change it, saves it back.
    pub fn update<T, R>(&self, key: &str, edit: impl FnOnce(&mut T) -> R) -> Result<R, ConfigError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut value: T = self.load_or_default(key)?;
        let out = edit(&mut value);
        self.save(key, &value)?;
        Ok(out)
    }

    /// Removes the value under `key`.
    pub fn remove(&self, key: &str) -> Result<(), ConfigError> {
        validate_key(key)?;
        self.store.remove_raw(key)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapStore(RefCell<BTreeMap<String, Vec<u8>>>);

    impl ConfigStore for MapStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.0.borrow().get(key).cloned().ok_or(ConfigError::NotFound)
        }
        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.0.borrow_mut().insert(key.into(), data.to_vec());
            Ok(())
        }
        fn remove_raw(&self, key: &str) -> Result<(), ConfigError> {
            self.0.borrow_mut().remove(key);
            Ok(())
        }
    }

    #[test]
    fn keys_are_validated() {
        assert!(validate_key("valos-cli.prefs").is_ok());
        for bad in ["", ".hidden", "Upper", "a/b", "a b"] {
            assert!(matches!(validate_key(bad), Err(ConfigError::InvalidKey(_))), "{bad}");
        }
    }

    #[test]
    fn update_round_trips_through_the_store() {
        let service = ConfigService::new(MapStore::default());
        assert_eq!(service.load::<Vec<u32>>("nums").unwrap(), None);
        let len = service
            .update("nums", |v: &mut Vec<u32>| {
                v.push(7);
                v.len()
            })
            .unwrap();
        assert_eq!(len, 1);
        assert_eq!(service.load::<Vec<u32>>("nums").unwrap(), Some(vec![7]));
        service.remove("nums").unwrap();
        assert_eq!(service.load_or_default::<Vec<u32>>("nums").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn blank_blobs_read_as_absent() {
        let service = ConfigService::new(MapStore::default());
        service.store().save_raw("blank", b"  \n").unwrap();
        assert_eq!(service.load::<u8>("blank").unwrap(), None);
        service.store().save_raw("junk", b"{").unwrap();
        assert!(matches!(service.load::<u8>("junk"), Err(ConfigError::Serde(_))));
    }
}

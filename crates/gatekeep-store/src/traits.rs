//! Store trait definitions

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::StoreResult;

/// Byte-oriented durable key-value store
pub trait Store: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or replace the value stored under `key`
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Keys starting with `prefix`, sorted
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// JSON convenience layer over [`Store`]
pub trait StoreExt: Store {
    /// Decode the JSON document under `key`.
    ///
    /// Decode failures surface as [`crate::StoreError::Serialization`] so the
    /// caller can decide whether to discard the entry.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

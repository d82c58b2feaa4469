use crate::{KeyValueStore, StorageError};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;

/// Typed view over one namespace of a [`KeyValueStore`].
///
/// Values are stored as JSON.
#[derive(Debug)]
pub struct KvCache<S, V> {
    store: S,
    namespace: String,
    _value: PhantomData<fn() -> V>,
}

impl<S: Clone, V> Clone for KvCache<S, V> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), namespace: self.namespace.clone(), _value: PhantomData }
    }
}

impl<S, V> KvCache<S, V>
where
    S: KeyValueStore,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Creates a view over `namespace`.
    pub fn new(store: S, namespace: impl Into<String>) -> Self {
        Self { store, namespace: namespace.into(), _value: PhantomData }
    }

    /// Namespace this view covers.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reads and decodes `key`.
    pub async fn get(&self, key: &str) -> Result<Option<V>, StorageError> {
        match self.store.get(&self.namespace, key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes `key`.
    pub async fn set(&self, key: &str, value: &V) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(&self.namespace, key, raw).await
    }

    /// Removes `key`.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove(&self.namespace, key).await
    }

    /// Lists all keys.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.store.keys(&self.namespace).await
    }
}

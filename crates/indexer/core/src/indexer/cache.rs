use crate::client::{ReceiptInfo, TransactionInfo};
use alloy_primitives::B256;
use lru::LruCache;
use nomad_indexer_storage::{KeyValueStore, KvCache, StorageError};
use nomad_indexer_types::DomainId;
use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

const MEMORY_ENTRIES: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

/// Read-through cache for block timestamps, transactions and receipts of one domain.
///
/// Entries live in a bounded in-memory LRU backed by the key-value store under the
/// `bts_{domain}`, `tx_{domain}` and `txr_{domain}` namespaces, so they survive restarts.
#[derive(Debug)]
pub(crate) struct RpcCache<S> {
    timestamps: Layer<S, u64>,
    transactions: Layer<S, TransactionInfo>,
    receipts: Layer<S, ReceiptInfo>,
}

impl<S> RpcCache<S>
where
    S: KeyValueStore + Clone,
{
    pub(crate) fn new(store: S, domain: DomainId) -> Self {
        Self {
            timestamps: Layer::new(store.clone(), format!("bts_{domain}")),
            transactions: Layer::new(store.clone(), format!("tx_{domain}")),
            receipts: Layer::new(store, format!("txr_{domain}")),
        }
    }

    pub(crate) async fn timestamp(&self, block: u64) -> Result<Option<u64>, StorageError> {
        self.timestamps.get(&block.to_string()).await
    }

    pub(crate) async fn set_timestamp(&self, block: u64, ts: u64) -> Result<(), StorageError> {
        self.timestamps.set(block.to_string(), ts).await
    }

    pub(crate) async fn transaction(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionInfo>, StorageError> {
        self.transactions.get(&hash.to_string()).await
    }

    pub(crate) async fn set_transaction(
        &self,
        hash: B256,
        tx: TransactionInfo,
    ) -> Result<(), StorageError> {
        self.transactions.set(hash.to_string(), tx).await
    }

    pub(crate) async fn receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, StorageError> {
        self.receipts.get(&hash.to_string()).await
    }

    pub(crate) async fn set_receipt(
        &self,
        hash: B256,
        receipt: ReceiptInfo,
    ) -> Result<(), StorageError> {
        self.receipts.set(hash.to_string(), receipt).await
    }
}

#[derive(Debug)]
struct Layer<S, V> {
    memory: Mutex<LruCache<String, V>>,
    persisted: KvCache<S, V>,
}

impl<S, V> Layer<S, V>
where
    S: KeyValueStore,
    V: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync,
{
    fn new(store: S, namespace: String) -> Self {
        Self {
            memory: Mutex::new(LruCache::new(MEMORY_ENTRIES)),
            persisted: KvCache::new(store, namespace),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<V>, StorageError> {
        let cached =
            self.memory.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let value = self.persisted.get(key).await?;
        if let Some(value) = &value {
            self.memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key.to_string(), value.clone());
        }
        Ok(value)
    }

    async fn set(&self, key: String, value: V) -> Result<(), StorageError> {
        self.persisted.set(&key, &value).await?;
        self.memory.lock().unwrap_or_else(PoisonError::into_inner).put(key, value);
        Ok(())
    }
}

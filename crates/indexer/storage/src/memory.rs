use crate::{KeyValueStore, MessageStore, StorageError};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use nomad_indexer_types::{DomainId, NomadMessage, StageCounts};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Tables {
    kv: BTreeMap<String, BTreeMap<String, String>>,
    messages: BTreeMap<B256, NomadMessage>,
}

/// On-disk layout of a snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot<K, M> {
    kv: K,
    messages: Vec<M>,
}

/// In-process store backing both the key-value table and the messages table.
///
/// When opened with a snapshot path, [`KeyValueStore::flush`] writes the full state to that file
/// as JSON and [`MemoryStore::open`] restores it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// Opens a store persisted at `path`, starting empty if the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let snapshot: Snapshot<BTreeMap<String, BTreeMap<String, String>>, NomadMessage> =
                    serde_json::from_str(&raw)?;
                Tables {
                    kv: snapshot.kv,
                    messages: snapshot
                        .messages
                        .into_iter()
                        .map(|m| (m.message_hash, m))
                        .collect(),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(err) => return Err(err.into()),
        };
        info!(
            target: "indexer::storage",
            path = %path.display(),
            messages = tables.messages.len(),
            "Opened snapshot store"
        );
        Ok(Self { tables: RwLock::new(tables), snapshot: Some(path) })
    }

    fn find<P>(&self, predicate: P) -> Result<Vec<NomadMessage>, StorageError>
    where
        P: Fn(&NomadMessage) -> bool,
    {
        let tables = self.tables.read()?;
        Ok(tables.messages.values().filter(|m| predicate(m)).cloned().collect())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        let tables = self.tables.read()?;
        Ok(tables.kv.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), StorageError> {
        let mut tables = self.tables.write()?;
        tables.kv.entry(namespace.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let mut tables = self.tables.write()?;
        if let Some(ns) = tables.kv.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let tables = self.tables.read()?;
        Ok(tables.kv.get(namespace).map(|ns| ns.keys().cloned().collect()).unwrap_or_default())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let raw = {
            let tables = self.tables.read()?;
            let snapshot =
                Snapshot { kv: &tables.kv, messages: tables.messages.values().collect::<Vec<_>>() };
            serde_json::to_string(&snapshot)?
        };
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(target: "indexer::storage", path = %path.display(), "Flushed snapshot");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_messages(&self, messages: &[NomadMessage]) -> Result<(), StorageError> {
        let mut tables = self.tables.write()?;
        for message in messages {
            tables.messages.insert(message.message_hash, message.clone());
        }
        Ok(())
    }

    async fn update_message(&self, message: &NomadMessage) -> Result<(), StorageError> {
        let mut tables = self.tables.write()?;
        let slot = tables
            .messages
            .get_mut(&message.message_hash)
            .ok_or(StorageError::MessageNotFound(message.message_hash))?;
        *slot = message.clone();
        Ok(())
    }

    async fn message(&self, hash: B256) -> Result<Option<NomadMessage>, StorageError> {
        let tables = self.tables.read()?;
        Ok(tables.messages.get(&hash).cloned())
    }

    async fn messages_by_origin_and_root(
        &self,
        origin: DomainId,
        root: B256,
    ) -> Result<Vec<NomadMessage>, StorageError> {
        self.find(|m| m.origin == origin && m.root == root)
    }

    async fn message_by_origin_and_nonce(
        &self,
        origin: DomainId,
        nonce: u32,
    ) -> Result<Option<NomadMessage>, StorageError> {
        Ok(self.find(|m| m.origin == origin && m.nonce == nonce)?.into_iter().next())
    }

    async fn message_by_transfer(
        &self,
        destination: DomainId,
        recipient: Address,
        amount: U256,
        block: u64,
    ) -> Result<Option<NomadMessage>, StorageError> {
        let found = self.find(|m| {
            m.destination == destination &&
                m.dispatch_block == block &&
                m.transfer() == Some((recipient, amount))
        })?;
        Ok(found.into_iter().next())
    }

    async fn count_by_origin(&self, origin: DomainId) -> Result<u64, StorageError> {
        let tables = self.tables.read()?;
        Ok(tables.messages.values().filter(|m| m.origin == origin).count() as u64)
    }

    async fn stage_counts(&self, origin: DomainId) -> Result<StageCounts, StorageError> {
        let tables = self.tables.read()?;
        let mut counts = StageCounts::default();
        for message in tables.messages.values().filter(|m| m.origin == origin) {
            counts.add(message.state);
        }
        Ok(counts)
    }
}

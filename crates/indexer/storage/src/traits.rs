use crate::{StorageError, Watermark};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use auto_impl::auto_impl;
use nomad_indexer_types::{DomainId, EventEnvelope, NomadMessage, StageCounts};
use std::fmt::Debug;

/// A generic namespaced key-value table.
///
/// Backs the RPC response cache, the events pool and the raw event log. Values are opaque
/// strings; typed access goes through [`KvCache`](crate::KvCache).
#[async_trait]
#[auto_impl(&, Arc)]
pub trait KeyValueStore: Debug + Send + Sync {
    /// Reads `key` in `namespace`.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes `key` in `namespace`, replacing any previous value.
    async fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), StorageError>;

    /// Removes `key` from `namespace`. Removing an absent key is not an error.
    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Lists every key currently present in `namespace`.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    /// Makes previous writes durable. Backends that write through may leave this as a no-op.
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// The messages table, keyed by message hash.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait MessageStore: Debug + Send + Sync {
    /// Inserts messages, replacing any with the same hash.
    async fn insert_messages(&self, messages: &[NomadMessage]) -> Result<(), StorageError>;

    /// Updates an existing message.
    ///
    /// # Errors
    /// Returns [`StorageError::MessageNotFound`] if the message was never inserted.
    async fn update_message(&self, message: &NomadMessage) -> Result<(), StorageError>;

    /// Looks up a message by hash.
    async fn message(&self, hash: B256) -> Result<Option<NomadMessage>, StorageError>;

    /// Messages from `origin` whose committed root is `root`.
    async fn messages_by_origin_and_root(
        &self,
        origin: DomainId,
        root: B256,
    ) -> Result<Vec<NomadMessage>, StorageError>;

    /// The message from `origin` with `nonce`.
    async fn message_by_origin_and_nonce(
        &self,
        origin: DomainId,
        nonce: u32,
    ) -> Result<Option<NomadMessage>, StorageError>;

    /// The transfer to `recipient` on `destination` of `amount`, dispatched in `block`.
    async fn message_by_transfer(
        &self,
        destination: DomainId,
        recipient: Address,
        amount: U256,
        block: u64,
    ) -> Result<Option<NomadMessage>, StorageError>;

    /// Number of messages dispatched from `origin`.
    async fn count_by_origin(&self, origin: DomainId) -> Result<u64, StorageError>;

    /// Number of messages from `origin` per current stage.
    async fn stage_counts(&self, origin: DomainId) -> Result<StageCounts, StorageError>;
}

/// Read access to persisted raw events and watermarks.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait EventStorageReader: Debug + Send + Sync {
    /// Every persisted event of `domain`, in block order, marked as stored.
    async fn all_events(&self, domain: DomainId) -> Result<Vec<EventEnvelope>, StorageError>;

    /// Scanned-range watermark of `domain`, if anything was ever stored.
    async fn watermark(&self, domain: DomainId) -> Result<Option<Watermark>, StorageError>;
}

/// Write access to persisted raw events and watermarks.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait EventStorageWriter: Debug + Send + Sync {
    /// Persists events, de-duplicated per block, widening the watermark to cover them.
    async fn store_events(
        &self,
        domain: DomainId,
        events: &[EventEnvelope],
    ) -> Result<(), StorageError>;

    /// Moves the watermark height forward to `height`. Lower values are ignored.
    async fn advance_height(&self, domain: DomainId, height: u64) -> Result<(), StorageError>;

    /// Replaces the watermark unconditionally.
    async fn override_watermark(
        &self,
        domain: DomainId,
        watermark: Watermark,
    ) -> Result<(), StorageError>;
}

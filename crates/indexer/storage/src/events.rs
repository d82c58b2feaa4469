use crate::{
    EventStorageReader, EventStorageWriter, KeyValueStore, KvCache, StorageError,
    metrics::Metrics,
};
use alloy_primitives::B256;
use async_trait::async_trait;
use nomad_indexer_types::{DomainId, EventEnvelope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

const EVENTS_NAMESPACE: &str = "events";
const FROM_NAMESPACE: &str = "from";
const HEIGHT_NAMESPACE: &str = "height";

/// Scanned block range of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Lowest block ever stored.
    pub from: u64,
    /// Highest block known to be scanned.
    pub height: u64,
}

/// Raw event log and watermarks laid out over a [`KeyValueStore`].
///
/// Per domain it keeps the set of known block numbers (`{domain}blocks`), a de-duplicated event
/// list per block (`events/{domain}_{block}`) and the `from`/`height` watermark entries keyed
/// by domain.
#[derive(Debug, Clone)]
pub struct EventStore<S> {
    store: S,
}

impl<S> EventStore<S>
where
    S: KeyValueStore + Clone,
{
    /// Wraps `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers and zeroes the storage metrics for `domain`.
    pub fn init_metrics(domain: DomainId) {
        Metrics::init(domain);
    }

    fn blocks(&self, domain: DomainId) -> KvCache<S, bool> {
        KvCache::new(self.store.clone(), format!("{domain}blocks"))
    }

    fn events(&self) -> KvCache<S, Vec<EventEnvelope>> {
        KvCache::new(self.store.clone(), EVENTS_NAMESPACE)
    }

    fn bound(&self, namespace: &str) -> KvCache<S, u64> {
        KvCache::new(self.store.clone(), namespace)
    }

    async fn store_events_inner(
        &self,
        domain: DomainId,
        events: &[EventEnvelope],
    ) -> Result<(), StorageError> {
        let mut by_block: BTreeMap<u64, Vec<&EventEnvelope>> = BTreeMap::new();
        for event in events {
            by_block.entry(event.block).or_default().push(event);
        }

        let blocks = self.blocks(domain);
        let lists = self.events();
        for (block, incoming) in &by_block {
            let key = format!("{domain}_{block}");
            let mut stored = lists.get(&key).await?.unwrap_or_default();
            let mut seen: HashSet<B256> = stored.iter().map(EventEnvelope::unique_hash).collect();
            let before = stored.len();
            for event in incoming {
                if seen.insert(event.unique_hash()) {
                    stored.push((*event).clone());
                }
            }
            if stored.len() != before {
                lists.set(&key, &stored).await?;
            }
            blocks.set(&block.to_string(), &true).await?;
        }

        if let (Some(low), Some(high)) =
            (by_block.keys().next().copied(), by_block.keys().next_back().copied())
        {
            let key = domain.to_string();
            let from = self.bound(FROM_NAMESPACE);
            if from.get(&key).await?.is_none_or(|current| low < current) {
                from.set(&key, &low).await?;
            }
            let height = self.bound(HEIGHT_NAMESPACE);
            if height.get(&key).await?.is_none_or(|current| high > current) {
                height.set(&key, &high).await?;
            }
        }

        trace!(target: "indexer::storage", domain, blocks = by_block.len(), "Stored events");
        Ok(())
    }

    async fn all_events_inner(&self, domain: DomainId) -> Result<Vec<EventEnvelope>, StorageError> {
        let namespace = format!("{domain}blocks");
        let mut blocks = Vec::new();
        for key in self.blocks(domain).keys().await? {
            let block = key.parse::<u64>().map_err(|err| StorageError::CorruptEntry {
                namespace: namespace.clone(),
                key: key.clone(),
                reason: err.to_string(),
            })?;
            blocks.push(block);
        }
        blocks.sort_unstable();

        let lists = self.events();
        let mut events = Vec::new();
        for block in blocks {
            if let Some(list) = lists.get(&format!("{domain}_{block}")).await? {
                events.extend(list.into_iter().map(EventEnvelope::into_stored));
            }
        }
        Ok(events)
    }

    async fn watermark_inner(&self, domain: DomainId) -> Result<Option<Watermark>, StorageError> {
        let key = domain.to_string();
        let from = self.bound(FROM_NAMESPACE).get(&key).await?;
        let height = self.bound(HEIGHT_NAMESPACE).get(&key).await?;
        Ok(match (from, height) {
            (Some(from), Some(height)) => Some(Watermark { from, height }),
            (None, Some(height)) => Some(Watermark { from: height, height }),
            (Some(from), None) => Some(Watermark { from, height: from }),
            (None, None) => None,
        })
    }

    async fn advance_height_inner(
        &self,
        domain: DomainId,
        height: u64,
    ) -> Result<(), StorageError> {
        let key = domain.to_string();
        let heights = self.bound(HEIGHT_NAMESPACE);
        if heights.get(&key).await?.is_none_or(|current| height > current) {
            heights.set(&key, &height).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S> EventStorageReader for EventStore<S>
where
    S: KeyValueStore + Clone,
{
    async fn all_events(&self, domain: DomainId) -> Result<Vec<EventEnvelope>, StorageError> {
        crate::observe_metrics_for_result_async!(
            Metrics::STORAGE_REQUESTS_SUCCESS_TOTAL,
            Metrics::STORAGE_REQUESTS_ERROR_TOTAL,
            Metrics::STORAGE_REQUEST_DURATION_SECONDS,
            Metrics::STORAGE_METHOD_ALL_EVENTS,
            self.all_events_inner(domain),
            "domain" => domain.to_string()
        )
    }

    async fn watermark(&self, domain: DomainId) -> Result<Option<Watermark>, StorageError> {
        crate::observe_metrics_for_result_async!(
            Metrics::STORAGE_REQUESTS_SUCCESS_TOTAL,
            Metrics::STORAGE_REQUESTS_ERROR_TOTAL,
            Metrics::STORAGE_REQUEST_DURATION_SECONDS,
            Metrics::STORAGE_METHOD_WATERMARK,
            self.watermark_inner(domain),
            "domain" => domain.to_string()
        )
    }
}

#[async_trait]
impl<S> EventStorageWriter for EventStore<S>
where
    S: KeyValueStore + Clone,
{
    async fn store_events(
        &self,
        domain: DomainId,
        events: &[EventEnvelope],
    ) -> Result<(), StorageError> {
        crate::observe_metrics_for_result_async!(
            Metrics::STORAGE_REQUESTS_SUCCESS_TOTAL,
            Metrics::STORAGE_REQUESTS_ERROR_TOTAL,
            Metrics::STORAGE_REQUEST_DURATION_SECONDS,
            Metrics::STORAGE_METHOD_STORE_EVENTS,
            self.store_events_inner(domain, events),
            "domain" => domain.to_string()
        )
    }

    async fn advance_height(&self, domain: DomainId, height: u64) -> Result<(), StorageError> {
        crate::observe_metrics_for_result_async!(
            Metrics::STORAGE_REQUESTS_SUCCESS_TOTAL,
            Metrics::STORAGE_REQUESTS_ERROR_TOTAL,
            Metrics::STORAGE_REQUEST_DURATION_SECONDS,
            Metrics::STORAGE_METHOD_ADVANCE_HEIGHT,
            self.advance_height_inner(domain, height),
            "domain" => domain.to_string()
        )
    }

    async fn override_watermark(
        &self,
        domain: DomainId,
        watermark: Watermark,
    ) -> Result<(), StorageError> {
        let key = domain.to_string();
        self.bound(FROM_NAMESPACE).set(&key, &watermark.from).await?;
        self.bound(HEIGHT_NAMESPACE).set(&key, &watermark.height).await
    }
}

//! Operator access to a running orchestrator.

use super::AdminError;
use crate::{client::ChainClient, indexer::Indexer};
use nomad_indexer_storage::{KeyValueStore, MessageStore};
use nomad_indexer_types::DomainId;
use serde::Serialize;
use std::sync::Arc;

/// Snapshot of one domain's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    /// Domain id.
    pub domain: DomainId,
    /// Highest block fully fetched.
    pub last_indexed_block: u64,
    /// Messages dispatched from this domain.
    pub message_count: u64,
    /// RPC failures within the trailing failure window.
    pub rolling_rpc_failure_count: usize,
    /// Distance between the chain tip and the last indexed block.
    pub blocks_behind_tip: u64,
}

/// Cloneable handle for inspecting and steering an [`Orchestrator`](super::Orchestrator) while
/// it runs.
#[derive(Debug)]
pub struct OrchestratorHandle<C, S> {
    indexers: Arc<[Indexer<C, S>]>,
    store: S,
}

impl<C, S: Clone> Clone for OrchestratorHandle<C, S> {
    fn clone(&self) -> Self {
        Self { indexers: Arc::clone(&self.indexers), store: self.store.clone() }
    }
}

impl<C, S> OrchestratorHandle<C, S>
where
    C: ChainClient,
    S: KeyValueStore + MessageStore + Clone,
{
    pub(crate) const fn new(indexers: Arc<[Indexer<C, S>]>, store: S) -> Self {
        Self { indexers, store }
    }

    fn indexer(&self, domain: DomainId) -> Result<&Indexer<C, S>, AdminError> {
        self.indexers
            .iter()
            .find(|indexer| indexer.domain().id == domain)
            .ok_or(AdminError::UnknownDomain(domain))
    }

    /// Makes `domain` restart from `block` on its next pass. Returns the effective start block.
    pub fn force_from(&self, domain: DomainId, block: u64) -> Result<u64, AdminError> {
        self.indexer(domain)?.force_from(block)
    }

    /// Progress of every domain, in configuration order.
    pub async fn status(&self) -> Result<Vec<DomainStatus>, AdminError> {
        let mut all = Vec::with_capacity(self.indexers.len());
        for indexer in self.indexers.iter() {
            let domain = indexer.domain().id;
            let status = indexer.status();
            all.push(DomainStatus {
                domain,
                last_indexed_block: status.last_indexed_block,
                message_count: self.store.count_by_origin(domain).await?,
                rolling_rpc_failure_count: status.rolling_failures,
                blocks_behind_tip: status.blocks_behind_tip,
            });
        }
        Ok(all)
    }
}

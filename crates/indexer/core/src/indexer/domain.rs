use super::{
    IndexerError,
    cache::RpcCache,
    decode::{LogSource, decode_log},
    failure::FailureCounter,
    integrity::RootChains,
};
use crate::{
    client::{ChainClient, ClientError, ReceiptInfo, TransactionInfo},
    config::IndexerConfig,
    orchestrator::AdminError,
    rate_limiter::RpcMethod,
    retry::retry,
};
use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::{Filter, Log};
use futures::future::try_join_all;
use nomad_indexer_storage::{
    EventStorageReader, EventStorageWriter, EventStore, KeyValueStore, Watermark,
};
use nomad_indexer_types::{
    Domain, DomainId, EventEnvelope, EventPayload, EventSource, dedup_events, sort_events,
};
use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, error, info, warn};

/// Progress of one [`Indexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerStatus {
    /// Highest block fully fetched.
    pub last_indexed_block: u64,
    /// RPC failures within the trailing failure window.
    pub rolling_failures: usize,
    /// Distance between the last observed chain tip and the last indexed block.
    pub blocks_behind_tip: u64,
}

/// Walks the block ranges of one domain and turns contract logs into [`EventEnvelope`]s.
///
/// Each batch is checked against the verified root chains and persisted before the pass moves on,
/// so a restart can replay it without touching the chain again. Progress only advances once a
/// whole pass succeeds: a failed pass is fetched again in full and nothing is handed out twice or
/// skipped.
#[derive(Debug)]
pub struct Indexer<C, S> {
    domain: Domain,
    config: Arc<IndexerConfig>,
    client: C,
    events: EventStore<S>,
    cache: RpcCache<S>,
    failures: FailureCounter,
    last_block: AtomicU64,
    tip: AtomicU64,
    force_from: Mutex<Option<u64>>,
    chains: Mutex<Option<RootChains>>,
}

impl<C, S> Indexer<C, S>
where
    C: ChainClient,
    S: KeyValueStore + Clone,
{
    /// Creates an indexer for `domain`. Call [`Indexer::init`] before the first update.
    pub fn new(domain: Domain, config: Arc<IndexerConfig>, client: C, store: S) -> Self {
        EventStore::<S>::init_metrics(domain.id);
        Self {
            cache: RpcCache::new(store.clone(), domain.id),
            events: EventStore::new(store),
            failures: FailureCounter::new(config.failure_window()),
            last_block: AtomicU64::new(0),
            tip: AtomicU64::new(0),
            force_from: Mutex::new(None),
            chains: Mutex::new(None),
            domain,
            config,
            client,
        }
    }

    /// The indexed domain.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Client of the indexed domain.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Restores progress from the persisted watermark.
    pub async fn init(&self) -> Result<(), IndexerError> {
        let watermark = self.events.watermark(self.domain.id).await?;
        if let Some(watermark) = watermark {
            self.last_block.store(watermark.height, Ordering::Relaxed);
        }
        info!(
            target: "indexer::indexer",
            domain = self.domain.id,
            name = %self.domain.name,
            last_block = self.last_block.load(Ordering::Relaxed),
            "Indexer initialised"
        );
        Ok(())
    }

    /// Every persisted event of this domain.
    pub async fn stored_events(&self) -> Result<Vec<EventEnvelope>, IndexerError> {
        Ok(self.events.all_events(self.domain.id).await?)
    }

    /// Verifies the root chains of every persisted update.
    ///
    /// On success the chains become the base that later batches are checked against.
    pub async fn verify_integrity(&self) -> Result<(), IndexerError> {
        let events = self.stored_events().await?;
        let mut chains = RootChains::new(self.domain.id);
        chains.extend(&events)?;
        *self.chains.lock().unwrap_or_else(PoisonError::into_inner) = Some(chains);
        Ok(())
    }

    /// Checks the updates of a fetched batch against the verified chains.
    async fn check_batch(&self, events: &[EventEnvelope]) -> Result<(), IndexerError> {
        let loaded = self.chains.lock().unwrap_or_else(PoisonError::into_inner).is_some();
        if !loaded {
            self.verify_integrity().await?;
        }
        self.chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| RootChains::new(self.domain.id))
            .extend(events)?;
        Ok(())
    }

    /// Fetches everything between the last indexed block and the lagged chain tip.
    ///
    /// `remotes` are the origins whose replicas on this domain should be scanned. Returns the new
    /// events, de-duplicated and sorted.
    pub async fn update_all(
        &self,
        remotes: &[DomainId],
    ) -> Result<Vec<EventEnvelope>, IndexerError> {
        let domain = self.domain.id;
        let from = self.start_block().await?;
        let tip = self.rpc(RpcMethod::BlockNumber, || self.client.block_number()).await?;
        self.tip.store(tip, Ordering::Relaxed);

        let to = tip.saturating_sub(self.config.to_lag);
        if from > to {
            debug!(target: "indexer::indexer", domain, from, to, "Nothing to fetch");
            return Ok(Vec::new());
        }
        info!(target: "indexer::indexer", domain, from, to, "Fetching events");

        let sources = self.sources(remotes);
        let batch_size = self.config.batch_size_for(&self.domain);
        let mut fetched = Vec::new();
        let mut batch_from = from;
        let mut attempts = 0;

        loop {
            let batch_to = batch_from.saturating_add(batch_size - 1).min(to);
            let lookback =
                batch_from.saturating_sub(self.config.from_lag).max(self.domain.deploy_height);
            debug!(
                target: "indexer::indexer",
                domain,
                from = lookback,
                to = batch_to,
                done = (batch_to.saturating_sub(from) + 1) * 100 / (to - from + 1),
                "Fetching batch"
            );

            let mut events = self.fetch_range(&sources, lookback, batch_to).await?;
            sort_events(&mut events);
            let events = dedup_events(events);

            match self.check_batch(&events).await {
                Ok(()) => attempts = 0,
                Err(IndexerError::Integrity(err)) if attempts < self.config.integrity_attempts => {
                    attempts += 1;
                    let retry_from =
                        batch_from.saturating_sub(batch_size / 2).max(self.domain.deploy_height);
                    warn!(
                        target: "indexer::indexer",
                        domain,
                        %err,
                        attempt = attempts,
                        from = retry_from,
                        "Integrity check failed, refetching"
                    );
                    batch_from = retry_from;
                    continue;
                }
                Err(err) => {
                    error!(target: "indexer::indexer", domain, %err, "Integrity check failed");
                    return Err(err);
                }
            }

            self.events.store_events(domain, &events).await?;
            fetched.extend(events);
            if batch_to >= to {
                break;
            }
            batch_from = batch_to + 1;
        }

        let mut fetched = dedup_events(fetched);
        sort_events(&mut fetched);
        self.events.advance_height(domain, to).await?;
        self.last_block.store(to, Ordering::Relaxed);
        info!(target: "indexer::indexer", domain, count = fetched.len(), "Fetched all");
        Ok(fetched)
    }

    /// Restarts indexing from `block` on the next update.
    ///
    /// The value is raised to the deploy height. Returns the block indexing will restart from.
    pub fn force_from(&self, block: u64) -> Result<u64, AdminError> {
        let height = self.last_block.load(Ordering::Relaxed);
        let block = block.max(self.domain.deploy_height);
        if block > height {
            return Err(AdminError::HeightAboveScanned {
                domain: self.domain.id,
                requested: block,
                height,
            });
        }
        *self.force_from.lock().unwrap_or_else(PoisonError::into_inner) = Some(block);
        info!(target: "indexer::indexer", domain = self.domain.id, block, "Forced start block");
        Ok(block)
    }

    /// Current progress.
    pub fn status(&self) -> IndexerStatus {
        let last_indexed_block = self.last_block.load(Ordering::Relaxed);
        IndexerStatus {
            last_indexed_block,
            rolling_failures: self.failures.count(),
            blocks_behind_tip: self.tip.load(Ordering::Relaxed).saturating_sub(last_indexed_block),
        }
    }

    async fn start_block(&self) -> Result<u64, IndexerError> {
        let forced = self.force_from.lock().unwrap_or_else(PoisonError::into_inner).take();
        let watermark = self.events.watermark(self.domain.id).await?;
        if let Some(forced) = forced {
            let from = watermark.map_or(forced, |w| w.from.min(forced));
            let rewound = Watermark { from, height: forced.saturating_sub(1) };
            self.events.override_watermark(self.domain.id, rewound).await?;
            self.last_block.store(rewound.height, Ordering::Relaxed);
            return Ok(forced);
        }
        let persisted = watermark.map_or(0, |w| w.height);
        let next = self.last_block.load(Ordering::Relaxed) + 1;
        Ok(next.max(persisted).max(self.domain.deploy_height))
    }

    fn sources(&self, remotes: &[DomainId]) -> Vec<(LogSource, Address)> {
        let mut sources = vec![(LogSource::Home, self.domain.home)];
        sources.extend(remotes.iter().filter_map(|remote| {
            self.domain.replica_for(*remote).map(|replica| (LogSource::Replica(*remote), replica))
        }));
        if let Some(router) = self.domain.bridge_router {
            sources.push((LogSource::BridgeRouter, router));
        }
        sources
    }

    async fn fetch_range(
        &self,
        sources: &[(LogSource, Address)],
        from: u64,
        to: u64,
    ) -> Result<Vec<EventEnvelope>, IndexerError> {
        let mut fetches = Vec::with_capacity(sources.len());
        for (source, address) in sources {
            fetches.push(self.fetch_source(*source, *address, from, to));
        }
        let per_source = try_join_all(fetches).await?;
        Ok(per_source.into_iter().flatten().collect())
    }

    async fn fetch_source(
        &self,
        source: LogSource,
        address: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<EventEnvelope>, IndexerError> {
        let filter = Filter::new()
            .address(address)
            .event_signature(source.signatures())
            .from_block(from)
            .to_block(to);
        let logs = self.rpc(RpcMethod::Logs, || self.client.logs(&filter)).await?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_log(source, log) {
                Ok(Some(payload)) => decoded.push((log, payload)),
                Ok(None) => {}
                Err(source) => {
                    return Err(IndexerError::Decode {
                        tx: log.transaction_hash.unwrap_or_default(),
                        source,
                    });
                }
            }
        }

        let mut envelopes = Vec::with_capacity(decoded.len());
        for (log, payload) in decoded {
            envelopes.push(self.augment(source, log, payload));
        }
        try_join_all(envelopes).await
    }

    async fn augment(
        &self,
        source: LogSource,
        log: &Log,
        payload: EventPayload,
    ) -> Result<EventEnvelope, IndexerError> {
        let domain = self.domain.id;
        let tx_hash = log.transaction_hash.ok_or(IndexerError::IncompleteLog(domain))?;
        let block = match log.block_number {
            Some(block) => block,
            None => self
                .transaction(tx_hash)
                .await?
                .block_number
                .ok_or(IndexerError::IncompleteLog(domain))?,
        };
        let timestamp = self.block_timestamp(block).await?;
        let receipt = self.receipt(tx_hash).await?;

        Ok(EventEnvelope {
            domain,
            replica_origin: source.replica_origin(),
            timestamp: timestamp * 1000,
            block,
            source: EventSource::Fresh,
            gas_used: receipt.gas_used,
            tx_hash,
            from: receipt.from,
            payload,
        })
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, IndexerError> {
        if let Some(timestamp) = self.cache.timestamp(block).await? {
            return Ok(timestamp);
        }
        let timestamp =
            self.rpc(RpcMethod::Block, || self.client.block_timestamp(block)).await?;
        self.cache.set_timestamp(block, timestamp).await?;
        Ok(timestamp)
    }

    async fn transaction(&self, hash: B256) -> Result<TransactionInfo, IndexerError> {
        if let Some(tx) = self.cache.transaction(hash).await? {
            return Ok(tx);
        }
        let tx = self.rpc(RpcMethod::Transaction, || self.client.transaction(hash)).await?;
        self.cache.set_transaction(hash, tx).await?;
        Ok(tx)
    }

    async fn receipt(&self, hash: B256) -> Result<ReceiptInfo, IndexerError> {
        if let Some(receipt) = self.cache.receipt(hash).await? {
            return Ok(receipt);
        }
        let receipt = self.rpc(RpcMethod::Receipt, || self.client.receipt(hash)).await?;
        self.cache.set_receipt(hash, receipt).await?;
        Ok(receipt)
    }

    async fn rpc<T, F, Fut>(&self, method: RpcMethod, op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let domain = self.domain.id;
        retry(&self.config.retry, op, |err, attempt| {
            self.failures.record();
            warn!(
                target: "indexer::indexer",
                domain,
                %method,
                attempt,
                %err,
                "Retrying after rpc error"
            );
        })
        .await
        .map_err(|err| {
            error!(target: "indexer::indexer", domain, %method, %err, "Rpc retries exhausted");
            IndexerError::Rpc(err)
        })
    }
}

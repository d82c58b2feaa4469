use super::{OrchestratorError, OrchestratorHandle, health::check_home, statistics};
use crate::{
    client::ChainClient,
    config::IndexerConfig,
    events_pool::unix_millis,
    indexer::{Indexer, IndexerError},
    metrics::Metrics,
    processor::{Processor, ProcessorError},
};
use futures::future::join_all;
use nomad_indexer_storage::{KeyValueStore, MessageStore};
use nomad_indexer_types::{DomainId, EventEnvelope, sort_events};
use std::{collections::BTreeMap, sync::Arc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Drives every domain's [`Indexer`] and feeds what they fetch through one [`Processor`].
#[derive(Debug)]
pub struct Orchestrator<C, S> {
    config: Arc<IndexerConfig>,
    indexers: Arc<[Indexer<C, S>]>,
    processor: Processor<S>,
    store: S,
    cancellation: CancellationToken,
}

impl<C, S> Orchestrator<C, S>
where
    C: ChainClient,
    S: KeyValueStore + MessageStore + Clone,
{
    /// Creates an orchestrator with one indexer per configured domain.
    ///
    /// `clients` must hold a client for every domain. The loop in [`Orchestrator::run`] stops
    /// once `cancellation` fires.
    pub fn new(
        config: Arc<IndexerConfig>,
        store: S,
        mut clients: BTreeMap<DomainId, C>,
        cancellation: CancellationToken,
    ) -> Result<Self, OrchestratorError> {
        let indexers = config
            .domains
            .iter()
            .map(|domain| {
                let client = clients
                    .remove(&domain.id)
                    .ok_or(OrchestratorError::MissingClient(domain.id))?;
                Ok(Indexer::new(domain.clone(), Arc::clone(&config), client, store.clone()))
            })
            .collect::<Result<Vec<_>, OrchestratorError>>()?;

        let optimistic_seconds =
            config.domains.iter().map(|domain| (domain.id, domain.optimistic_seconds)).collect();
        let mut processor = Processor::new(store.clone(), config.store_concurrency)
            .with_optimistic_seconds(optimistic_seconds);
        if let Some(seed) = config.chaos_seed {
            info!(target: "indexer::orchestrator", seed, "Shuffling events before applying them");
            processor = processor.with_chaos_seed(seed);
        }

        let ids: Vec<_> = config.domains.iter().map(|domain| domain.id).collect();
        Metrics::init(&ids);

        Ok(Self { config, indexers: indexers.into(), processor, store, cancellation })
    }

    /// A handle for operators. Stays valid after [`Orchestrator::run`] consumes `self`.
    pub fn handle(&self) -> OrchestratorHandle<C, S> {
        OrchestratorHandle::new(Arc::clone(&self.indexers), self.store.clone())
    }

    /// Restores every domain and replays its persisted events.
    ///
    /// Every domain's persisted updates must form unbroken root chains. Any failure here is fatal.
    pub async fn init(&mut self) -> Result<(), OrchestratorError> {
        let mut events = Vec::new();
        for indexer in self.indexers.iter() {
            let domain = indexer.domain().id;
            indexer.init().await.map_err(|source| OrchestratorError::Indexer { domain, source })?;
            if let Err(source) = indexer.verify_integrity().await {
                error!(
                    target: "indexer::orchestrator",
                    domain,
                    err = %source,
                    "Persisted events failed the integrity check"
                );
                return Err(OrchestratorError::Indexer { domain, source });
            }
            events.extend(
                indexer
                    .stored_events()
                    .await
                    .map_err(|source| OrchestratorError::Indexer { domain, source })?,
            );
        }

        sort_events(&mut events);
        let replayed = events.len();
        let transitions = self.processor.consume(events).await?;
        info!(
            target: "indexer::orchestrator",
            events = replayed,
            transitions = transitions.len(),
            "Replayed persisted events"
        );
        self.statistics().await?;
        Ok(())
    }

    /// Runs one indexing pass over every domain concurrently and applies the result.
    ///
    /// A failing domain is logged and skipped, the others still contribute their events. Returns
    /// how many events were applied.
    pub async fn index_all(&mut self) -> Result<usize, ProcessorError> {
        let mut passes = Vec::with_capacity(self.indexers.len());
        for indexer in self.indexers.iter() {
            passes.push(self.pass(indexer));
        }

        let mut events = Vec::new();
        for (domain, result) in join_all(passes).await {
            match result {
                Ok(fetched) => events.extend(fetched),
                Err(err) => {
                    error!(target: "indexer::orchestrator", domain, %err, "Indexing pass failed")
                }
            }
        }
        if events.is_empty() {
            return Ok(0);
        }

        sort_events(&mut events);
        let count = events.len();
        for transition in self.processor.consume(events).await? {
            debug!(
                target: "indexer::orchestrator",
                message_hash = %transition.message_hash,
                origin = transition.origin,
                destination = transition.destination,
                stage = %transition.stage,
                "Message advanced"
            );
        }
        Ok(count)
    }

    /// Indexes until cancelled, pausing for the poll interval between passes.
    ///
    /// Nothing in here is fatal: failures are logged and the next pass tries again.
    pub async fn run(mut self) {
        info!(
            target: "indexer::orchestrator",
            domains = self.indexers.len(),
            interval = ?self.config.poll_interval(),
            "Starting orchestrator"
        );

        while !self.cancellation.is_cancelled() {
            let applied = match self.index_all().await {
                Ok(applied) => applied,
                Err(err) => {
                    error!(target: "indexer::orchestrator", %err, "Failed to apply events");
                    0
                }
            };

            for indexer in self.indexers.iter() {
                check_home(indexer).await;
            }

            if applied > 0 {
                if let Err(err) = self.statistics().await {
                    error!(target: "indexer::orchestrator", %err, "Failed to compute statistics");
                }
            }

            self.prune_pool().await;
            if let Err(err) = self.store.flush().await {
                error!(target: "indexer::orchestrator", %err, "Failed to flush store");
            }

            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = sleep(self.config.poll_interval()) => {}
            }
        }

        info!(target: "indexer::orchestrator", "Orchestrator stopped");
    }

    async fn pass(
        &self,
        indexer: &Indexer<C, S>,
    ) -> (DomainId, Result<Vec<EventEnvelope>, IndexerError>) {
        let remotes = self.config.remote_domains(indexer.domain());
        (indexer.domain().id, indexer.update_all(&remotes).await)
    }

    async fn statistics(&self) -> Result<(), OrchestratorError> {
        let origins: Vec<_> = self.indexers.iter().map(|indexer| indexer.domain().id).collect();
        statistics::report(&self.store, origins).await?;
        Ok(())
    }

    async fn prune_pool(&self) {
        let Some(retention) = self.config.pool_retention_secs else {
            return;
        };
        let cutoff = unix_millis().saturating_sub(retention.saturating_mul(1000));
        if let Err(err) = self.processor.pool().prune(cutoff).await {
            error!(target: "indexer::orchestrator", %err, "Failed to prune events pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{ClientError, Home, MockClient, ReceiptInfo},
        config::RetryConfig,
        orchestrator::{AdminError, DomainStatus},
    };
    use alloy_primitives::{Address, B256, Bytes, LogData, U256, keccak256};
    use alloy_rpc_types_eth::{Filter, Log};
    use alloy_sol_types::SolEvent;
    use nomad_indexer_storage::{EventStorageWriter, EventStore, MemoryStore};
    use nomad_indexer_types::{
        DispatchEvent, Domain, EventEnvelope, EventPayload, EventSource, MessageStage,
        UpdateEvent,
    };
    use std::time::Duration;

    const ETHEREUM: DomainId = 1000;
    const MOONBEAM: DomainId = 2000;
    const HOME: Address = Address::repeat_byte(0xaa);

    fn domain(id: DomainId, name: &str) -> Domain {
        Domain {
            id,
            name: name.to_string(),
            rpcs: vec![format!("http://{name}:8545")],
            deploy_height: 100,
            home: HOME,
            replicas: BTreeMap::new(),
            bridge_router: None,
            optimistic_seconds: 1800,
            batch_size: None,
            rate_limit: None,
        }
    }

    fn config() -> Arc<IndexerConfig> {
        let mut config = IndexerConfig::new(vec![domain(ETHEREUM, "ethereum")], ETHEREUM);
        config.retry = RetryConfig::new(2, 1, 10);
        config.pool_retention_secs = None;
        Arc::new(config)
    }

    fn raw_message(nonce: u32) -> Bytes {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ETHEREUM.to_be_bytes());
        raw.extend_from_slice(B256::repeat_byte(0x01).as_slice());
        raw.extend_from_slice(&nonce.to_be_bytes());
        raw.extend_from_slice(&MOONBEAM.to_be_bytes());
        raw.extend_from_slice(B256::repeat_byte(0x02).as_slice());
        raw.extend_from_slice(b"payload");
        raw.into()
    }

    fn envelope(block: u64, payload: EventPayload) -> EventEnvelope {
        EventEnvelope {
            domain: ETHEREUM,
            replica_origin: 0,
            timestamp: block * 12_000,
            block,
            source: EventSource::Fresh,
            gas_used: U256::from(50_000),
            tx_hash: B256::with_last_byte(block as u8),
            from: Address::repeat_byte(0x01),
            payload,
        }
    }

    fn update(block: u64, old: u8, new: u8) -> EventEnvelope {
        envelope(
            block,
            EventPayload::HomeUpdate(UpdateEvent {
                home_domain: ETHEREUM,
                old_root: B256::repeat_byte(old),
                new_root: B256::repeat_byte(new),
                signature: Bytes::new(),
            }),
        )
    }

    fn dispatch(block: u64, root: u8) -> (B256, EventEnvelope) {
        let message = raw_message(0);
        let hash = keccak256(&message);
        let event = envelope(
            block,
            EventPayload::Dispatch(DispatchEvent {
                message_hash: hash,
                leaf_index: U256::ZERO,
                destination_and_nonce: u64::from(MOONBEAM) << 32,
                committed_root: B256::repeat_byte(root),
                message,
            }),
        );
        (hash, event)
    }

    fn log(data: LogData, block: u64) -> Log {
        Log {
            inner: alloy_primitives::Log { address: HOME, data },
            block_number: Some(block),
            transaction_hash: Some(B256::with_last_byte(block as u8)),
            ..Default::default()
        }
    }

    fn in_range(filter: &Filter, logs: &[Log]) -> Vec<Log> {
        let from = filter.get_from_block().unwrap_or_default();
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        logs.iter()
            .filter(|log| log.block_number.is_some_and(|b| b >= from && b <= to))
            .cloned()
            .collect()
    }

    fn chain_client(tip: u64, logs: Vec<Log>) -> MockClient {
        let mut client = MockClient::new();
        client.expect_block_number().returning(move || Ok(tip));
        client.expect_logs().returning(move |filter| Ok(in_range(filter, &logs)));
        client.expect_block_timestamp().returning(|block| Ok(block * 12));
        client.expect_receipt().returning(|_| {
            Ok(ReceiptInfo {
                from: Address::repeat_byte(0x01),
                gas_used: U256::from(50_000),
                block_number: None,
            })
        });
        client.expect_home_state().returning(|_| Ok(1));
        client
    }

    fn orchestrator(
        store: &Arc<MemoryStore>,
        client: MockClient,
    ) -> Orchestrator<MockClient, Arc<MemoryStore>> {
        Orchestrator::new(
            config(),
            store.clone(),
            BTreeMap::from([(ETHEREUM, client)]),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_requires_a_client_per_domain() {
        let err = Orchestrator::<MockClient, _>::new(
            config(),
            Arc::new(MemoryStore::default()),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingClient(ETHEREUM)));
    }

    #[tokio::test]
    async fn test_init_replays_persisted_events() {
        let store = Arc::new(MemoryStore::default());
        let (hash, dispatched) = dispatch(110, 1);
        EventStore::new(store.clone())
            .store_events(ETHEREUM, &[dispatched, update(120, 1, 2)])
            .await
            .unwrap();

        let mut orchestrator = orchestrator(&store, MockClient::new());
        orchestrator.init().await.unwrap();

        let message = store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.state, MessageStage::Updated);
        let status = orchestrator.handle().status().await.unwrap();
        assert_eq!(status[0].last_indexed_block, 120);
        assert_eq!(status[0].message_count, 1);
    }

    #[tokio::test]
    async fn test_init_fails_on_broken_root_chain() {
        let store = Arc::new(MemoryStore::default());
        EventStore::new(store.clone())
            .store_events(ETHEREUM, &[update(110, 1, 2), update(120, 2, 3), update(130, 9, 4)])
            .await
            .unwrap();

        let mut orchestrator = orchestrator(&store, MockClient::new());
        let err = orchestrator.init().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Indexer { domain: ETHEREUM, source: IndexerError::Integrity(_) }
        ));
    }

    #[tokio::test]
    async fn test_index_all_applies_fetched_events() {
        let store = Arc::new(MemoryStore::default());
        let message = raw_message(0);
        let hash = keccak256(&message);
        let logs = vec![
            log(
                Home::Dispatch {
                    messageHash: hash,
                    leafIndex: U256::ZERO,
                    destinationAndNonce: u64::from(MOONBEAM) << 32,
                    committedRoot: B256::repeat_byte(1),
                    message,
                }
                .encode_log_data(),
                150,
            ),
            log(
                Home::Update {
                    homeDomain: ETHEREUM,
                    oldRoot: B256::repeat_byte(1),
                    newRoot: B256::repeat_byte(2),
                    signature: Bytes::new(),
                }
                .encode_log_data(),
                160,
            ),
        ];

        let mut orchestrator = orchestrator(&store, chain_client(1_005, logs));
        orchestrator.init().await.unwrap();
        assert_eq!(orchestrator.index_all().await.unwrap(), 2);

        let stored = store.message(hash).await.unwrap().unwrap();
        assert_eq!(stored.state, MessageStage::Updated);
        assert_eq!(stored.to_update(), Some(10 * 12_000));

        // Nothing new on the second pass.
        assert_eq!(orchestrator.index_all().await.unwrap(), 0);

        let status = orchestrator.handle().status().await.unwrap();
        assert_eq!(
            status,
            vec![DomainStatus {
                domain: ETHEREUM,
                last_indexed_block: 1_000,
                message_count: 1,
                rolling_rpc_failure_count: 0,
                blocks_behind_tip: 5,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_domain_does_not_stop_the_pass() {
        let store = Arc::new(MemoryStore::default());
        let mut client = MockClient::new();
        client.expect_block_number().returning(|| Err(ClientError::NoEndpoints));

        let mut orchestrator = orchestrator(&store, client);
        orchestrator.init().await.unwrap();
        assert_eq!(orchestrator.index_all().await.unwrap(), 0);
        assert_eq!(orchestrator.handle().status().await.unwrap()[0].rolling_rpc_failure_count, 2);
    }

    #[tokio::test]
    async fn test_handle_force_from() {
        let store = Arc::new(MemoryStore::default());
        let mut orchestrator = orchestrator(&store, chain_client(1_005, Vec::new()));
        orchestrator.init().await.unwrap();
        orchestrator.index_all().await.unwrap();

        let handle = orchestrator.handle();
        assert_eq!(handle.force_from(MOONBEAM, 10), Err(AdminError::UnknownDomain(MOONBEAM)));
        assert_eq!(handle.force_from(ETHEREUM, 10), Ok(100));
        assert_eq!(
            handle.force_from(ETHEREUM, 2_000),
            Err(AdminError::HeightAboveScanned {
                domain: ETHEREUM,
                requested: 2_000,
                height: 1_000
            })
        );
    }

    /// Ethereum and Moonbeam with the default pool retention. Neither client is ever called.
    fn bridged() -> Orchestrator<MockClient, Arc<MemoryStore>> {
        let mut moonbeam = domain(MOONBEAM, "moonbeam");
        moonbeam.optimistic_seconds = 3600;
        let mut config = IndexerConfig::new(vec![domain(ETHEREUM, "ethereum"), moonbeam], ETHEREUM);
        config.retry = RetryConfig::new(2, 1, 10);
        Orchestrator::new(
            Arc::new(config),
            Arc::new(MemoryStore::default()),
            BTreeMap::from([(ETHEREUM, MockClient::new()), (MOONBEAM, MockClient::new())]),
            CancellationToken::new(),
        )
        .unwrap()
    }

    /// Moonbeam's replica accepting Ethereum's root `old -> new` at `timestamp`.
    fn relay(old: u8, new: u8, timestamp: u64) -> EventEnvelope {
        let mut event = update(0, old, new);
        event.payload = match event.payload {
            EventPayload::HomeUpdate(update) => EventPayload::ReplicaUpdate(update),
            payload => payload,
        };
        EventEnvelope { domain: MOONBEAM, replica_origin: ETHEREUM, timestamp, ..event }
    }

    #[tokio::test]
    async fn test_pruning_keeps_relays_pooled_during_backfill() {
        let mut orchestrator = bridged();
        assert_eq!(orchestrator.config.pool_retention_secs, Some(7 * 24 * 3600));

        // Moonbeam caught up first and relayed in 2022, long before the retention window.
        let relayed_at = 1_650_000_600_000;
        orchestrator.processor.consume(vec![relay(1, 2, relayed_at)]).await.unwrap();
        orchestrator.prune_pool().await;

        let (hash, dispatched) = dispatch(110, 1);
        orchestrator.processor.consume(vec![dispatched]).await.unwrap();
        let message = orchestrator.store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.state, MessageStage::Relayed);
        // Moonbeam's fraud window applies to messages bound for it.
        assert_eq!(message.confirm_at, Some(relayed_at + 3_600_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        let store = Arc::new(MemoryStore::default());
        let mut client = MockClient::new();
        client.expect_block_number().times(1).returning(|| Ok(1_005));
        client.expect_logs().returning(|_| Ok(Vec::new()));
        client.expect_home_state().times(1).returning(|_| Ok(1));

        let cancellation = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            config(),
            store,
            BTreeMap::from([(ETHEREUM, client)]),
            cancellation.clone(),
        )
        .unwrap();

        let running = tokio::spawn(orchestrator.run());
        sleep(Duration::from_secs(1)).await;
        cancellation.cancel();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_already_cancelled() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let orchestrator = Orchestrator::new(
            config(),
            Arc::new(MemoryStore::default()),
            BTreeMap::from([(ETHEREUM, MockClient::new())]),
            cancellation,
        )
        .unwrap();
        orchestrator.run().await;
    }
}

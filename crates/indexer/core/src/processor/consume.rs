use super::ProcessorError;
use crate::{EventsPool, metrics::Metrics};
use alloy_primitives::B256;
use futures::{StreamExt, stream::FuturesUnordered};
use nomad_indexer_storage::{KeyValueStore, MessageStore};
use nomad_indexer_types::{
    DispatchEvent, DomainId, EventEnvelope, EventPayload, MessageStage, NomadMessage, Transition,
    sort_events,
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

/// Messages touched during one [`Processor::consume`] call.
#[derive(Debug, Default)]
struct Pending {
    updated: HashMap<B256, NomadMessage>,
    transitions: Vec<Transition>,
}

impl Pending {
    fn record(&mut self, message: &NomadMessage, transition: Option<Transition>) {
        if let Some(transition) = transition {
            Metrics::record_transition(message, transition.stage);
            self.transitions.push(transition);
        }
    }
}

/// Applies events to messages.
///
/// All message mutation happens here, one event at a time. An event whose message is not yet
/// known is kept in the [`EventsPool`]; every time a message is created or changed, the pool is
/// checked for events it is still waiting on.
#[derive(Debug)]
pub struct Processor<S> {
    store: S,
    pool: EventsPool<S>,
    store_concurrency: usize,
    optimistic_seconds: BTreeMap<DomainId, u64>,
    chaos: Option<StdRng>,
}

impl<S> Processor<S>
where
    S: KeyValueStore + MessageStore + Clone,
{
    /// Creates a processor writing to `store`, with at most `store_concurrency` message updates
    /// in flight.
    pub fn new(store: S, store_concurrency: usize) -> Self {
        Self {
            pool: EventsPool::new(store.clone()),
            store,
            store_concurrency: store_concurrency.max(1),
            optimistic_seconds: BTreeMap::new(),
            chaos: None,
        }
    }

    /// Sets the fraud window of each destination, used to compute when relayed messages
    /// confirm. Destinations without an entry confirm as soon as they are relayed.
    pub fn with_optimistic_seconds(mut self, periods: BTreeMap<DomainId, u64>) -> Self {
        self.optimistic_seconds = periods;
        self
    }

    /// Shuffles every consumed batch with a generator seeded from `seed` instead of applying it
    /// in global order.
    pub fn with_chaos_seed(mut self, seed: u64) -> Self {
        self.chaos = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// The pool of early events.
    pub const fn pool(&self) -> &EventsPool<S> {
        &self.pool
    }

    /// Applies `events` and persists the affected messages.
    ///
    /// Returns the stage transitions in the order they happened.
    pub async fn consume(
        &mut self,
        mut events: Vec<EventEnvelope>,
    ) -> Result<Vec<Transition>, ProcessorError> {
        match &mut self.chaos {
            Some(rng) => events.shuffle(rng),
            None => sort_events(&mut events),
        }

        let mut pending = Pending::default();
        for event in &events {
            self.apply(&mut pending, event).await?;
        }

        let updated = pending.updated.len();
        let mut writes = FuturesUnordered::new();
        for message in pending.updated.values() {
            if writes.len() >= self.store_concurrency {
                writes.next().await.transpose()?;
            }
            writes.push(self.store.update_message(message));
        }
        while let Some(written) = writes.next().await {
            written?;
        }

        debug!(
            target: "indexer::processor",
            events = events.len(),
            updated,
            transitions = pending.transitions.len(),
            "Consumed events"
        );
        Ok(pending.transitions)
    }

    async fn apply(
        &self,
        pending: &mut Pending,
        event: &EventEnvelope,
    ) -> Result<(), ProcessorError> {
        match &event.payload {
            EventPayload::Dispatch(dispatch) => self.dispatch(pending, event, dispatch).await,
            EventPayload::HomeUpdate(update) => {
                self.pool.store(event).await?;
                let messages =
                    self.messages_by_root(pending, event.domain, update.old_root).await?;
                if messages.is_empty() {
                    self.missing(event);
                }
                for mut message in messages {
                    let transition = message.update(event);
                    self.settle(pending, message, transition).await?;
                }
                Ok(())
            }
            EventPayload::ReplicaUpdate(update) => {
                self.pool.store(event).await?;
                let messages: Vec<_> = self
                    .messages_by_root(pending, event.replica_origin, update.old_root)
                    .await?
                    .into_iter()
                    .filter(|message| message.destination == event.domain)
                    .collect();
                if messages.is_empty() {
                    self.missing(event);
                }
                for mut message in messages {
                    let optimistic = self.optimistic(message.destination);
                    let transition = message.relay(event, optimistic);
                    self.settle(pending, message, transition).await?;
                }
                Ok(())
            }
            EventPayload::ReplicaProcess(process) => {
                let found = self
                    .message(pending, process.message_hash)
                    .await?
                    .filter(|message| message.destination == event.domain);
                match found {
                    Some(mut message) => {
                        let transition = message.process(event);
                        self.settle(pending, message, transition).await
                    }
                    None => self.buffer(event).await,
                }
            }
            EventPayload::BridgeSend(send) => {
                let found = self
                    .store
                    .message_by_transfer(send.to_domain, send.recipient(), send.amount, event.block)
                    .await?
                    .filter(|message| message.origin == event.domain);
                match found {
                    Some(message) => {
                        let mut message = self.current(pending, message);
                        message.send(event);
                        self.settle(pending, message, None).await
                    }
                    None => self.buffer(event).await,
                }
            }
            EventPayload::BridgeReceive(receive) => {
                let found = self
                    .store
                    .message_by_origin_and_nonce(receive.origin(), receive.nonce())
                    .await?
                    .filter(|message| {
                        message.destination == event.domain &&
                            message.transfer() == Some((receive.recipient, receive.amount))
                    });
                match found {
                    Some(message) => {
                        let mut message = self.current(pending, message);
                        let transition = message.receive(event);
                        self.settle(pending, message, transition).await
                    }
                    None => self.buffer(event).await,
                }
            }
        }
    }

    async fn dispatch(
        &self,
        pending: &mut Pending,
        event: &EventEnvelope,
        dispatch: &DispatchEvent,
    ) -> Result<(), ProcessorError> {
        if self.message(pending, dispatch.message_hash).await?.is_some() {
            trace!(
                target: "indexer::processor",
                message_hash = %dispatch.message_hash,
                "Message already known"
            );
            return Ok(());
        }
        let mut message = NomadMessage::from_dispatch(event, dispatch).unwrap_or_else(|err| {
            warn!(
                target: "indexer::processor",
                domain = event.domain,
                tx = %event.tx_hash,
                %err,
                "Malformed dispatched message, tracking it as unknown"
            );
            NomadMessage::unparsed(event, dispatch)
        });

        pending.record(&message, Some(message.dispatched_transition()));
        self.reconcile(pending, &mut message).await?;
        self.store.insert_messages(&[message]).await?;
        Ok(())
    }

    /// Applies every pooled event `message` is still waiting on, in stage order.
    async fn reconcile(
        &self,
        pending: &mut Pending,
        message: &mut NomadMessage,
    ) -> Result<(), ProcessorError> {
        if message.awaits(MessageStage::Updated) {
            let update = self.pool.updates(message.origin, message.root).await?.into_iter().next();
            if let Some(update) = update {
                let transition = message.update(&update);
                pending.record(message, transition);
            }
        }

        if message.awaits(MessageStage::Relayed) {
            let relay = self
                .pool
                .relays(message.origin, message.root)
                .await?
                .into_iter()
                .find(|relay| relay.domain == message.destination);
            if let Some(relay) = relay {
                let optimistic = self.optimistic(message.destination);
                let transition = message.relay(&relay, optimistic);
                pending.record(message, transition);
            }
        }

        if let Some((recipient, amount)) = message.transfer() {
            if !message.is_sent() {
                let send = self
                    .pool
                    .send(message.destination, recipient, amount, message.dispatch_block)
                    .await?
                    .filter(|send| send.domain == message.origin);
                if let Some(send) = send {
                    message.send(&send);
                }
            }
            if message.awaits(MessageStage::Received) {
                let receive = self
                    .pool
                    .receive(message.origin, message.nonce, amount, recipient)
                    .await?
                    .filter(|receive| receive.domain == message.destination);
                if let Some(receive) = receive {
                    let transition = message.receive(&receive);
                    pending.record(message, transition);
                }
            }
        }

        if message.awaits(MessageStage::Processed) {
            let process = self
                .pool
                .process(message.message_hash)
                .await?
                .filter(|process| process.domain == message.destination);
            if let Some(process) = process {
                let transition = message.process(&process);
                pending.record(message, transition);
            }
        }
        Ok(())
    }

    /// Records `transition`, reconciles and queues `message` for the final write.
    async fn settle(
        &self,
        pending: &mut Pending,
        mut message: NomadMessage,
        transition: Option<Transition>,
    ) -> Result<(), ProcessorError> {
        pending.record(&message, transition);
        self.reconcile(pending, &mut message).await?;
        pending.updated.insert(message.message_hash, message);
        Ok(())
    }

    async fn buffer(&self, event: &EventEnvelope) -> Result<(), ProcessorError> {
        if self.pool.store(event).await? {
            metrics::counter!(Metrics::POOLED_EVENTS_TOTAL, "kind" => event.kind().to_string())
                .increment(1);
        }
        self.missing(event);
        Ok(())
    }

    fn optimistic(&self, destination: DomainId) -> u64 {
        self.optimistic_seconds.get(&destination).copied().unwrap_or_default()
    }

    fn missing(&self, event: &EventEnvelope) {
        warn!(
            target: "indexer::processor",
            domain = event.domain,
            kind = %event.kind(),
            tx = %event.tx_hash,
            block = event.block,
            "No message for event, kept in pool"
        );
    }

    /// The in-flight version of `message` if it was already changed during this call.
    fn current(&self, pending: &Pending, message: NomadMessage) -> NomadMessage {
        pending.updated.get(&message.message_hash).cloned().unwrap_or(message)
    }

    async fn message(
        &self,
        pending: &Pending,
        hash: B256,
    ) -> Result<Option<NomadMessage>, ProcessorError> {
        if let Some(message) = pending.updated.get(&hash) {
            return Ok(Some(message.clone()));
        }
        Ok(self.store.message(hash).await?)
    }

    async fn messages_by_root(
        &self,
        pending: &Pending,
        origin: u32,
        root: B256,
    ) -> Result<Vec<NomadMessage>, ProcessorError> {
        let stored = self.store.messages_by_origin_and_root(origin, root).await?;
        Ok(stored.into_iter().map(|message| self.current(pending, message)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events_pool::unix_millis;
    use alloy_primitives::{Address, Bytes, U256, keccak256};
    use nomad_indexer_storage::MemoryStore;
    use nomad_indexer_types::{
        EventSource, MessageKind, ProcessEvent, ReceiveEvent, SendEvent, UpdateEvent,
    };
    use std::sync::Arc;

    const ORIGIN: DomainId = 1000;
    const DESTINATION: DomainId = 2000;
    const RECIPIENT: Address = Address::repeat_byte(0x77);
    const OPTIMISTIC_SECONDS: u64 = 1800;

    fn root(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    /// A formatted message carrying a 10 token transfer to [`RECIPIENT`].
    fn transfer_message(nonce: u32) -> Bytes {
        let mut body = Vec::new();
        body.extend_from_slice(&ORIGIN.to_be_bytes());
        body.extend_from_slice(B256::repeat_byte(0x01).as_slice());
        body.push(3);
        body.extend_from_slice(RECIPIENT.into_word().as_slice());
        body.extend_from_slice(&U256::from(10).to_be_bytes::<32>());
        body.extend_from_slice(B256::ZERO.as_slice());

        let mut raw = Vec::new();
        raw.extend_from_slice(&ORIGIN.to_be_bytes());
        raw.extend_from_slice(B256::repeat_byte(0x02).as_slice());
        raw.extend_from_slice(&nonce.to_be_bytes());
        raw.extend_from_slice(&DESTINATION.to_be_bytes());
        raw.extend_from_slice(B256::repeat_byte(0x03).as_slice());
        raw.extend_from_slice(&body);
        raw.into()
    }

    fn envelope(
        domain: DomainId,
        replica_origin: DomainId,
        ts: u64,
        block: u64,
        payload: EventPayload,
    ) -> EventEnvelope {
        EventEnvelope {
            domain,
            replica_origin,
            timestamp: ts,
            block,
            source: EventSource::Fresh,
            gas_used: U256::from(ts),
            tx_hash: B256::with_last_byte(ts as u8),
            from: Address::repeat_byte(0x0a),
            payload,
        }
    }

    fn dispatch(nonce: u32, committed_root: B256, ts: u64) -> EventEnvelope {
        let message = transfer_message(nonce);
        envelope(
            ORIGIN,
            0,
            ts,
            10,
            EventPayload::Dispatch(DispatchEvent {
                message_hash: keccak256(&message),
                leaf_index: U256::from(nonce),
                destination_and_nonce: (u64::from(DESTINATION) << 32) | u64::from(nonce),
                committed_root,
                message,
            }),
        )
    }

    fn message_hash(event: &EventEnvelope) -> B256 {
        match &event.payload {
            EventPayload::Dispatch(dispatch) => dispatch.message_hash,
            _ => unreachable!(),
        }
    }

    fn home_update(old: B256, new: B256, ts: u64) -> EventEnvelope {
        envelope(
            ORIGIN,
            0,
            ts,
            11,
            EventPayload::HomeUpdate(UpdateEvent {
                home_domain: ORIGIN,
                old_root: old,
                new_root: new,
                signature: Bytes::new(),
            }),
        )
    }

    fn relay(domain: DomainId, old: B256, new: B256, ts: u64) -> EventEnvelope {
        envelope(
            domain,
            ORIGIN,
            ts,
            20,
            EventPayload::ReplicaUpdate(UpdateEvent {
                home_domain: ORIGIN,
                old_root: old,
                new_root: new,
                signature: Bytes::new(),
            }),
        )
    }

    fn process(hash: B256, ts: u64) -> EventEnvelope {
        envelope(
            DESTINATION,
            ORIGIN,
            ts,
            21,
            EventPayload::ReplicaProcess(ProcessEvent {
                message_hash: hash,
                success: true,
                return_data: B256::ZERO,
            }),
        )
    }

    fn send(ts: u64) -> EventEnvelope {
        envelope(
            ORIGIN,
            0,
            ts,
            10,
            EventPayload::BridgeSend(SendEvent {
                token: Address::repeat_byte(0x01),
                from: Address::repeat_byte(0x0a),
                to_domain: DESTINATION,
                to_id: RECIPIENT.into_word(),
                amount: U256::from(10),
                fast_liquidity_enabled: false,
            }),
        )
    }

    fn receive(nonce: u32, ts: u64) -> EventEnvelope {
        envelope(
            DESTINATION,
            0,
            ts,
            22,
            EventPayload::BridgeReceive(ReceiveEvent {
                origin_and_nonce: (u64::from(ORIGIN) << 32) | u64::from(nonce),
                token: Address::repeat_byte(0x01),
                recipient: RECIPIENT,
                liquidity_provider: Address::ZERO,
                amount: U256::from(10),
            }),
        )
    }

    fn processor() -> (Processor<Arc<MemoryStore>>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let processor = Processor::new(store.clone(), 10)
            .with_optimistic_seconds(BTreeMap::from([(DESTINATION, OPTIMISTIC_SECONDS)]));
        (processor, store)
    }

    /// Every lifecycle event of one transfer.
    fn lifecycle() -> Vec<EventEnvelope> {
        let dispatched = dispatch(0, root(1), 1_000);
        let hash = message_hash(&dispatched);
        vec![
            dispatched,
            send(1_000),
            home_update(root(1), root(2), 2_000),
            relay(DESTINATION, root(1), root(2), 3_000),
            receive(0, 4_000),
            process(hash, 5_000),
        ]
    }

    #[tokio::test]
    async fn test_dispatch_then_update() {
        let (mut processor, store) = processor();
        let dispatched = dispatch(0, root(1), 1_000);
        let hash = message_hash(&dispatched);

        let transitions = processor.consume(vec![dispatched]).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].stage, MessageStage::Dispatched);

        let transitions =
            processor.consume(vec![home_update(root(1), root(2), 2_000)]).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].stage, MessageStage::Updated);

        let message = store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.state, MessageStage::Updated);
        assert_eq!(message.updated.unwrap().timestamp, 2_000);
    }

    #[tokio::test]
    async fn test_update_then_dispatch_resolves_from_pool() {
        let (mut early, early_store) = processor();
        let (mut late, late_store) = processor();
        let dispatched = dispatch(0, root(1), 1_000);
        let hash = message_hash(&dispatched);
        let update = home_update(root(1), root(2), 2_000);

        late.consume(vec![dispatched.clone()]).await.unwrap();
        late.consume(vec![update.clone()]).await.unwrap();

        early.consume(vec![update]).await.unwrap();
        let transitions = early.consume(vec![dispatched]).await.unwrap();
        assert_eq!(
            transitions.iter().map(|t| t.stage).collect::<Vec<_>>(),
            vec![MessageStage::Dispatched, MessageStage::Updated]
        );

        assert_eq!(
            early_store.message(hash).await.unwrap(),
            late_store.message(hash).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle_in_one_batch() {
        let (mut processor, store) = processor();
        let events = lifecycle();
        let hash = message_hash(&events[0]);

        let transitions = processor.consume(events).await.unwrap();
        assert_eq!(
            transitions.iter().map(|t| t.stage).collect::<Vec<_>>(),
            vec![
                MessageStage::Dispatched,
                MessageStage::Updated,
                MessageStage::Relayed,
                MessageStage::Received,
                MessageStage::Processed,
            ]
        );

        let message = store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.state, MessageStage::Processed);
        assert!(message.is_sent());
        assert_eq!(message.bridge_sender, Some(Address::repeat_byte(0x0a)));
        assert_eq!(message.to_relay(), Some(1_000));
        assert_eq!(message.confirm_at, Some(3_000 + OPTIMISTIC_SECONDS * 1000));
    }

    #[tokio::test]
    async fn test_confirm_at_set_when_relay_resolved_from_pool() {
        let (mut processor, store) = processor();
        let dispatched = dispatch(0, root(1), 1_000);
        let hash = message_hash(&dispatched);

        processor.consume(vec![relay(DESTINATION, root(1), root(2), 3_000)]).await.unwrap();
        processor.consume(vec![dispatched]).await.unwrap();

        let message = store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.state, MessageStage::Relayed);
        assert_eq!(message.confirm_at, Some(3_000 + OPTIMISTIC_SECONDS * 1000));
    }

    #[tokio::test]
    async fn test_malformed_dispatch_is_tracked_as_unknown() {
        let (mut processor, store) = processor();
        let raw = Bytes::from_static(b"too short for a header");
        let hash = keccak256(&raw);
        let event = envelope(
            ORIGIN,
            0,
            1_000,
            10,
            EventPayload::Dispatch(DispatchEvent {
                message_hash: hash,
                leaf_index: U256::ZERO,
                destination_and_nonce: (u64::from(DESTINATION) << 32) | 5,
                committed_root: root(1),
                message: raw,
            }),
        );

        let transitions = processor
            .consume(vec![event, home_update(root(1), root(2), 2_000)])
            .await
            .unwrap();
        assert_eq!(transitions.len(), 2);

        let message = store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.kind, MessageKind::Unknown);
        assert_eq!((message.origin, message.destination, message.nonce), (ORIGIN, DESTINATION, 5));
        assert_eq!(message.state, MessageStage::Updated);
    }

    #[tokio::test]
    async fn test_backfilled_relay_survives_pruning() {
        let (mut processor, store) = processor();
        // Relayed long ago, indexed before its origin caught up to the dispatch.
        let dispatched = dispatch(0, root(1), 1_650_000_000_000);
        let hash = message_hash(&dispatched);
        processor
            .consume(vec![relay(DESTINATION, root(1), root(2), 1_650_000_600_000)])
            .await
            .unwrap();

        let week = 7 * 24 * 3600 * 1000;
        assert_eq!(processor.pool().prune(unix_millis() - week).await.unwrap(), 0);

        processor.consume(vec![dispatched]).await.unwrap();
        assert_eq!(store.message(hash).await.unwrap().unwrap().state, MessageStage::Relayed);
    }

    #[tokio::test]
    async fn test_any_order_converges() {
        let (mut ordered, ordered_store) = processor();
        let events = lifecycle();
        let hash = message_hash(&events[0]);
        ordered.consume(events.clone()).await.unwrap();
        let expected = ordered_store.message(hash).await.unwrap();

        for seed in 0..16 {
            let (processor, store) = processor();
            let mut chaotic = processor.with_chaos_seed(seed);
            chaotic.consume(events.clone()).await.unwrap();
            assert_eq!(store.message(hash).await.unwrap(), expected, "seed {seed}");
        }

        // One event per call, newest first.
        let (mut reversed, store) = processor();
        for event in events.iter().rev() {
            reversed.consume(vec![event.clone()]).await.unwrap();
        }
        assert_eq!(store.message(hash).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_reapplying_is_idempotent() {
        let (mut processor, store) = processor();
        let events = lifecycle();
        let hash = message_hash(&events[0]);

        processor.consume(events.clone()).await.unwrap();
        let once = serde_json::to_string(&store.message(hash).await.unwrap()).unwrap();

        let transitions = processor.consume(events).await.unwrap();
        assert!(transitions.is_empty());
        let twice = serde_json::to_string(&store.message(hash).await.unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_late_update_does_not_regress_state() {
        let (mut processor, store) = processor();
        let dispatched = dispatch(0, root(1), 1_000);
        let hash = message_hash(&dispatched);

        processor
            .consume(vec![dispatched, relay(DESTINATION, root(1), root(2), 3_000)])
            .await
            .unwrap();
        let transitions =
            processor.consume(vec![home_update(root(1), root(2), 2_000)]).await.unwrap();
        assert!(transitions.is_empty());

        let message = store.message(hash).await.unwrap().unwrap();
        assert_eq!(message.state, MessageStage::Relayed);
        assert_eq!(message.updated.map(|r| r.timestamp), Some(2_000));
    }

    #[tokio::test]
    async fn test_relay_on_other_domain_is_ignored() {
        let (mut processor, store) = processor();
        let dispatched = dispatch(0, root(1), 1_000);
        let hash = message_hash(&dispatched);

        processor
            .consume(vec![dispatched, relay(3000, root(1), root(2), 3_000)])
            .await
            .unwrap();
        assert_eq!(store.message(hash).await.unwrap().unwrap().state, MessageStage::Dispatched);
    }

    #[tokio::test]
    async fn test_update_covers_every_message_at_root() {
        let (mut processor, store) = processor();
        let first = dispatch(0, root(1), 1_000);
        let second = dispatch(1, root(1), 1_500);
        let hashes = [message_hash(&first), message_hash(&second)];

        processor
            .consume(vec![first, second, home_update(root(1), root(2), 2_000)])
            .await
            .unwrap();
        for hash in hashes {
            assert_eq!(store.message(hash).await.unwrap().unwrap().state, MessageStage::Updated);
        }
        let counts = store.stage_counts(ORIGIN).await.unwrap();
        assert_eq!(counts.updated, 2);
    }

    #[tokio::test]
    async fn test_unmatched_process_is_pooled() {
        let (mut processor, _) = processor();
        let event = process(B256::repeat_byte(0x42), 5_000);
        processor.consume(vec![event.clone()]).await.unwrap();
        assert_eq!(processor.pool().process(B256::repeat_byte(0x42)).await.unwrap(), Some(event));
    }
}

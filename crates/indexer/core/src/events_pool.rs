//! Buffer for events that arrived before the message they belong to.

use alloy_primitives::{Address, B256, U256};
use nomad_indexer_storage::{KeyValueStore, KvCache, StorageError};
use nomad_indexer_types::{DomainId, EventEnvelope, EventPayload};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Wall-clock time in milliseconds since the unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}

/// Events sharing one key.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolEntry {
    /// Wall-clock milliseconds at which the newest event was pooled.
    pooled_at: u64,
    events: Vec<EventEnvelope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Send,
    Update,
    Relay,
    Receive,
    Process,
}

impl Slot {
    const ALL: [Self; 5] = [Self::Send, Self::Update, Self::Relay, Self::Receive, Self::Process];

    const fn namespace(self) -> &'static str {
        match self {
            Self::Send => "pool_send",
            Self::Update => "pool_update",
            Self::Relay => "pool_relay",
            Self::Receive => "pool_receive",
            Self::Process => "pool_process",
        }
    }

    /// Several updates may share an old root. Every other slot holds one event.
    const fn is_list(self) -> bool {
        matches!(self, Self::Update | Self::Relay)
    }
}

fn root_key(origin: DomainId, old_root: B256) -> String {
    format!("{origin};{old_root}")
}

fn send_key(destination: DomainId, recipient: Address, amount: U256, block: u64) -> String {
    format!("{destination};{recipient};{amount};{block}")
}

fn receive_key(origin: DomainId, nonce: u32, amount: U256, recipient: Address) -> String {
    format!("{origin};{nonce};{amount};{recipient}")
}

/// Events keyed by what a message needs to look them up, stored in the key-value table.
///
/// Lookups never remove anything: a pooled event stays available to every message that matches
/// it until [`EventsPool::prune`] drops it. Retention counts from when an event was pooled, not
/// from its block time, so events met while backfilling old ranges are kept as long as fresh ones.
#[derive(Debug, Clone)]
pub struct EventsPool<S> {
    store: S,
}

impl<S> EventsPool<S>
where
    S: KeyValueStore + Clone,
{
    /// Creates a pool over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    fn table(&self, slot: Slot) -> KvCache<S, PoolEntry> {
        KvCache::new(self.store.clone(), slot.namespace())
    }

    fn slot(event: &EventEnvelope) -> Option<(Slot, String)> {
        match &event.payload {
            EventPayload::Dispatch(_) => None,
            EventPayload::HomeUpdate(update) => {
                Some((Slot::Update, root_key(event.domain, update.old_root)))
            }
            EventPayload::ReplicaUpdate(update) => {
                Some((Slot::Relay, root_key(event.replica_origin, update.old_root)))
            }
            EventPayload::ReplicaProcess(process) => {
                Some((Slot::Process, process.message_hash.to_string()))
            }
            EventPayload::BridgeSend(send) => Some((
                Slot::Send,
                send_key(send.to_domain, send.recipient(), send.amount, event.block),
            )),
            EventPayload::BridgeReceive(receive) => Some((
                Slot::Receive,
                receive_key(receive.origin(), receive.nonce(), receive.amount, receive.recipient),
            )),
        }
    }

    /// Buffers `event`. Returns `false` for dispatches, which are never pooled, and for events
    /// already present.
    pub async fn store(&self, event: &EventEnvelope) -> Result<bool, StorageError> {
        self.store_at(event, unix_millis()).await
    }

    /// [`EventsPool::store`] with an explicit pooling time in milliseconds.
    pub(crate) async fn store_at(
        &self,
        event: &EventEnvelope,
        now: u64,
    ) -> Result<bool, StorageError> {
        let Some((slot, key)) = Self::slot(event) else {
            return Ok(false);
        };
        let table = self.table(slot);
        let mut entry = table.get(&key).await?.unwrap_or_default();
        let hash = event.unique_hash();
        if entry.events.iter().any(|pooled| pooled.unique_hash() == hash) {
            return Ok(false);
        }
        if slot.is_list() {
            entry.events.push(event.clone());
        } else {
            entry.events = vec![event.clone()];
        }
        entry.pooled_at = now;
        table.set(&key, &entry).await?;
        trace!(target: "indexer::pool", kind = %event.kind(), key, "Pooled event");
        Ok(true)
    }

    /// Home updates of `origin` moving away from `old_root`, in arrival order.
    pub async fn updates(
        &self,
        origin: DomainId,
        old_root: B256,
    ) -> Result<Vec<EventEnvelope>, StorageError> {
        self.list(Slot::Update, &root_key(origin, old_root)).await
    }

    /// Replica updates of `origin`'s root `old_root`, on any domain, in arrival order.
    pub async fn relays(
        &self,
        origin: DomainId,
        old_root: B256,
    ) -> Result<Vec<EventEnvelope>, StorageError> {
        self.list(Slot::Relay, &root_key(origin, old_root)).await
    }

    /// The bridge send to `recipient` on `destination` of `amount`, made in `block`.
    pub async fn send(
        &self,
        destination: DomainId,
        recipient: Address,
        amount: U256,
        block: u64,
    ) -> Result<Option<EventEnvelope>, StorageError> {
        self.single(Slot::Send, &send_key(destination, recipient, amount, block)).await
    }

    /// The bridge receive of the transfer `origin`/`nonce`.
    pub async fn receive(
        &self,
        origin: DomainId,
        nonce: u32,
        amount: U256,
        recipient: Address,
    ) -> Result<Option<EventEnvelope>, StorageError> {
        self.single(Slot::Receive, &receive_key(origin, nonce, amount, recipient)).await
    }

    /// The process event of `message_hash`.
    pub async fn process(&self, message_hash: B256) -> Result<Option<EventEnvelope>, StorageError> {
        self.single(Slot::Process, &message_hash.to_string()).await
    }

    async fn list(&self, slot: Slot, key: &str) -> Result<Vec<EventEnvelope>, StorageError> {
        Ok(self.table(slot).get(key).await?.map(|entry| entry.events).unwrap_or_default())
    }

    async fn single(&self, slot: Slot, key: &str) -> Result<Option<EventEnvelope>, StorageError> {
        Ok(self.list(slot, key).await?.pop())
    }

    /// Drops entries that have not received an event since `cutoff`, in wall-clock milliseconds.
    /// Returns how many entries were dropped.
    pub async fn prune(&self, cutoff: u64) -> Result<usize, StorageError> {
        let mut pruned = 0;
        for slot in Slot::ALL {
            let table = self.table(slot);
            for key in table.keys().await? {
                let pooled_at = table.get(&key).await?.map(|entry| entry.pooled_at);
                if pooled_at.is_none_or(|pooled_at| pooled_at < cutoff) {
                    table.remove(&key).await?;
                    pruned += 1;
                }
            }
        }
        if pruned > 0 {
            debug!(target: "indexer::pool", pruned, cutoff, "Pruned pool");
        }
        Ok(pruned)
    }
}

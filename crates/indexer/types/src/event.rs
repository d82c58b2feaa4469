use crate::DomainId;
use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The six on-chain event kinds the indexer tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum EventKind {
    /// Message dispatched on the home contract.
    #[display("dispatch")]
    Dispatch,
    /// Home root advanced.
    #[display("home_update")]
    HomeUpdate,
    /// Root advance observed on a replica.
    #[display("replica_update")]
    ReplicaUpdate,
    /// Message processed on a replica.
    #[display("replica_process")]
    ReplicaProcess,
    /// Tokens sent through the bridge router.
    #[display("bridge_send")]
    BridgeSend,
    /// Tokens received through the bridge router.
    #[display("bridge_receive")]
    BridgeReceive,
}

impl EventKind {
    /// Tie-break rank for events sharing a timestamp.
    pub const fn order(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::BridgeSend => 1,
            Self::HomeUpdate => 2,
            Self::ReplicaUpdate => 3,
            Self::ReplicaProcess => 4,
            Self::BridgeReceive => 5,
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Dispatch => 1,
            Self::HomeUpdate => 2,
            Self::ReplicaUpdate => 3,
            Self::ReplicaProcess => 4,
            Self::BridgeSend => 5,
            Self::BridgeReceive => 6,
        }
    }
}

/// Where an envelope came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Fetched from a chain during this run.
    #[default]
    Fresh,
    /// Replayed from persistence.
    Stored,
}

/// `Dispatch` log of the home contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEvent {
    /// Hash of the dispatched message.
    pub message_hash: B256,
    /// Leaf index of the message in the home merkle tree.
    pub leaf_index: U256,
    /// Destination domain in the upper bits, nonce in the lower 32.
    pub destination_and_nonce: u64,
    /// Home root at the time of dispatch.
    pub committed_root: B256,
    /// Raw formatted message.
    pub message: Bytes,
}

impl DispatchEvent {
    /// Destination domain of the message.
    pub const fn destination(&self) -> DomainId {
        split_domain_and_nonce(self.destination_and_nonce).0
    }

    /// Nonce of the message on its origin.
    pub const fn nonce(&self) -> u32 {
        split_domain_and_nonce(self.destination_and_nonce).1
    }
}

/// `Update` log, emitted by both home and replica contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// Domain of the home whose root advanced.
    pub home_domain: DomainId,
    /// Root before the update.
    pub old_root: B256,
    /// Root after the update.
    pub new_root: B256,
    /// Updater signature.
    pub signature: Bytes,
}

/// `Process` log of a replica contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEvent {
    /// Hash of the processed message.
    pub message_hash: B256,
    /// Whether the handler call succeeded.
    pub success: bool,
    /// Hash of the handler's return data.
    pub return_data: B256,
}

/// `Send` log of the bridge router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEvent {
    /// Local token address.
    pub token: Address,
    /// Sender of the tokens.
    pub from: Address,
    /// Destination domain.
    pub to_domain: DomainId,
    /// Recipient, left-padded to 32 bytes.
    pub to_id: B256,
    /// Amount sent.
    pub amount: U256,
    /// Whether fast liquidity was requested.
    pub fast_liquidity_enabled: bool,
}

impl SendEvent {
    /// Recipient as an EVM address.
    pub fn recipient(&self) -> Address {
        crate::bytes32_to_address(&self.to_id)
    }
}

/// `Receive` log of the bridge router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveEvent {
    /// Origin domain in the upper bits, nonce in the lower 32.
    pub origin_and_nonce: u64,
    /// Local token address.
    pub token: Address,
    /// Recipient of the tokens.
    pub recipient: Address,
    /// Fast liquidity provider, zero if none.
    pub liquidity_provider: Address,
    /// Amount received.
    pub amount: U256,
}

impl ReceiveEvent {
    /// Origin domain of the transfer.
    pub const fn origin(&self) -> DomainId {
        split_domain_and_nonce(self.origin_and_nonce).0
    }

    /// Nonce of the transfer message on its origin.
    pub const fn nonce(&self) -> u32 {
        split_domain_and_nonce(self.origin_and_nonce).1
    }
}

/// Typed payload of an [`EventEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// See [`DispatchEvent`].
    Dispatch(DispatchEvent),
    /// An [`UpdateEvent`] from the home contract.
    HomeUpdate(UpdateEvent),
    /// An [`UpdateEvent`] from a replica contract.
    ReplicaUpdate(UpdateEvent),
    /// See [`ProcessEvent`].
    ReplicaProcess(ProcessEvent),
    /// See [`SendEvent`].
    BridgeSend(SendEvent),
    /// See [`ReceiveEvent`].
    BridgeReceive(ReceiveEvent),
}

impl EventPayload {
    /// Kind of this payload.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Dispatch(_) => EventKind::Dispatch,
            Self::HomeUpdate(_) => EventKind::HomeUpdate,
            Self::ReplicaUpdate(_) => EventKind::ReplicaUpdate,
            Self::ReplicaProcess(_) => EventKind::ReplicaProcess,
            Self::BridgeSend(_) => EventKind::BridgeSend,
            Self::BridgeReceive(_) => EventKind::BridgeReceive,
        }
    }

    fn encode_canonical(&self, out: &mut Vec<u8>) {
        fn dynamic(out: &mut Vec<u8>, bytes: &[u8]) {
            out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
            out.extend_from_slice(bytes);
        }

        match self {
            Self::Dispatch(ev) => {
                out.extend_from_slice(ev.message_hash.as_slice());
                out.extend_from_slice(&ev.leaf_index.to_be_bytes::<32>());
                out.extend_from_slice(&ev.destination_and_nonce.to_be_bytes());
                out.extend_from_slice(ev.committed_root.as_slice());
                dynamic(out, &ev.message);
            }
            Self::HomeUpdate(ev) | Self::ReplicaUpdate(ev) => {
                out.extend_from_slice(&ev.home_domain.to_be_bytes());
                out.extend_from_slice(ev.old_root.as_slice());
                out.extend_from_slice(ev.new_root.as_slice());
                dynamic(out, &ev.signature);
            }
            Self::ReplicaProcess(ev) => {
                out.extend_from_slice(ev.message_hash.as_slice());
                out.push(ev.success as u8);
                out.extend_from_slice(ev.return_data.as_slice());
            }
            Self::BridgeSend(ev) => {
                out.extend_from_slice(ev.token.as_slice());
                out.extend_from_slice(ev.from.as_slice());
                out.extend_from_slice(&ev.to_domain.to_be_bytes());
                out.extend_from_slice(ev.to_id.as_slice());
                out.extend_from_slice(&ev.amount.to_be_bytes::<32>());
                out.push(ev.fast_liquidity_enabled as u8);
            }
            Self::BridgeReceive(ev) => {
                out.extend_from_slice(&ev.origin_and_nonce.to_be_bytes());
                out.extend_from_slice(ev.token.as_slice());
                out.extend_from_slice(ev.recipient.as_slice());
                out.extend_from_slice(ev.liquidity_provider.as_slice());
                out.extend_from_slice(&ev.amount.to_be_bytes::<32>());
            }
        }
    }
}

/// Canonical representation of one on-chain event, augmented with transaction metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Domain the event was emitted on.
    pub domain: DomainId,
    /// Origin domain tracked by the emitting replica, `0` for non-replica events.
    pub replica_origin: DomainId,
    /// Block timestamp in milliseconds.
    pub timestamp: u64,
    /// Block number.
    pub block: u64,
    /// Whether the event was freshly fetched or replayed.
    #[serde(default)]
    pub source: EventSource,
    /// Gas used by the emitting transaction.
    pub gas_used: U256,
    /// Emitting transaction.
    pub tx_hash: B256,
    /// Sender of the emitting transaction.
    #[serde(default)]
    pub from: Address,
    /// Typed event data.
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Kind of the wrapped event.
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Deterministic identity of the event.
    ///
    /// Covers the domain, kind, replica origin, payload, gas used and transaction. Timestamp,
    /// block, source and sender are metadata and do not participate.
    pub fn unique_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&self.domain.to_be_bytes());
        buf.push(self.kind().tag());
        buf.extend_from_slice(&self.replica_origin.to_be_bytes());
        self.payload.encode_canonical(&mut buf);
        buf.extend_from_slice(&self.gas_used.to_be_bytes::<32>());
        buf.extend_from_slice(self.tx_hash.as_slice());
        keccak256(&buf)
    }

    /// Global ordering key: timestamp first, then the kind tie-break.
    pub const fn sort_key(&self) -> (u64, u8) {
        (self.timestamp, self.kind().order())
    }

    /// Returns a copy marked as replayed from persistence.
    pub fn into_stored(mut self) -> Self {
        self.source = EventSource::Stored;
        self
    }
}

/// Splits a packed `(domain << 32) | nonce` value.
pub const fn split_domain_and_nonce(packed: u64) -> (DomainId, u32) {
    ((packed >> 32) as DomainId, packed as u32)
}

/// Stable sort by [`EventEnvelope::sort_key`].
pub fn sort_events(events: &mut [EventEnvelope]) {
    events.sort_by_key(EventEnvelope::sort_key);
}

/// Drops envelopes whose [`EventEnvelope::unique_hash`] was already seen, keeping the first.
pub fn dedup_events(events: Vec<EventEnvelope>) -> Vec<EventEnvelope> {
    let mut seen = HashSet::with_capacity(events.len());
    events.into_iter().filter(|ev| seen.insert(ev.unique_hash())).collect()
}

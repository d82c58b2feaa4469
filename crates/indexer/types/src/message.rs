//! The lifecycle state machine of a single dispatched message.

use crate::{
    DispatchEvent, DomainId, EventEnvelope, MessageBodyError, MessageHeader, MessageKind,
};
use alloy_primitives::{Address, B256, Bytes, U256};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a message. Ordered: a message only ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
pub enum MessageStage {
    /// Emitted on the origin home.
    #[display("dispatched")]
    Dispatched = 0,
    /// Included in a signed home update.
    #[display("updated")]
    Updated = 1,
    /// Update relayed to the destination replica.
    #[display("relayed")]
    Relayed = 2,
    /// Tokens received on the destination bridge router.
    #[display("received")]
    Received = 3,
    /// Message processed on the destination replica.
    #[display("processed")]
    Processed = 4,
}

impl MessageStage {
    /// All stages, in order.
    pub const ALL: [Self; 5] =
        [Self::Dispatched, Self::Updated, Self::Relayed, Self::Received, Self::Processed];
}

/// Timestamp, gas and transaction of the event that drove a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    /// Event timestamp in milliseconds.
    pub timestamp: u64,
    /// Gas used by the event's transaction.
    pub gas_used: U256,
    /// The event's transaction.
    pub tx: B256,
}

impl StageRecord {
    fn from_envelope(event: &EventEnvelope) -> Self {
        Self { timestamp: event.timestamp, gas_used: event.gas_used, tx: event.tx_hash }
    }
}

/// Notification that a message reached a new stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Message that moved.
    pub message_hash: B256,
    /// Origin domain of the message.
    pub origin: DomainId,
    /// Destination domain of the message.
    pub destination: DomainId,
    /// Stage reached.
    pub stage: MessageStage,
    /// Timestamp of the event that caused the transition, in milliseconds.
    pub timestamp: u64,
}

/// Number of messages per stage for one origin.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Messages currently dispatched.
    pub dispatched: u64,
    /// Messages currently updated.
    pub updated: u64,
    /// Messages currently relayed.
    pub relayed: u64,
    /// Messages currently received.
    pub received: u64,
    /// Messages currently processed.
    pub processed: u64,
}

impl StageCounts {
    /// Counts one more message at `stage`.
    pub const fn add(&mut self, stage: MessageStage) {
        match stage {
            MessageStage::Dispatched => self.dispatched += 1,
            MessageStage::Updated => self.updated += 1,
            MessageStage::Relayed => self.relayed += 1,
            MessageStage::Received => self.received += 1,
            MessageStage::Processed => self.processed += 1,
        }
    }

    /// Count at `stage`.
    pub const fn get(&self, stage: MessageStage) -> u64 {
        match stage {
            MessageStage::Dispatched => self.dispatched,
            MessageStage::Updated => self.updated,
            MessageStage::Relayed => self.relayed,
            MessageStage::Received => self.received,
            MessageStage::Processed => self.processed,
        }
    }

    /// Sum over all stages.
    pub const fn total(&self) -> u64 {
        self.dispatched + self.updated + self.relayed + self.received + self.processed
    }
}

/// One dispatched message and everything observed about it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NomadMessage {
    /// Message hash, the primary key.
    pub message_hash: B256,
    /// Origin domain.
    pub origin: DomainId,
    /// Destination domain.
    pub destination: DomainId,
    /// Nonce on the origin.
    pub nonce: u32,
    /// Sender on the origin, left-padded.
    pub sender: B256,
    /// Recipient on the destination, left-padded.
    pub recipient: B256,
    /// Home root committed at dispatch. Updates and relays are matched against it.
    pub root: B256,
    /// Leaf index in the home tree.
    pub leaf_index: U256,
    /// Application payload.
    pub body: Bytes,
    /// Decoded payload.
    pub kind: MessageKind,
    /// Block of the dispatch.
    pub dispatch_block: u64,
    /// Current stage.
    pub state: MessageStage,
    /// Dispatch event record.
    pub dispatched: StageRecord,
    /// Latest home update applied.
    pub updated: Option<StageRecord>,
    /// Latest replica update applied.
    pub relayed: Option<StageRecord>,
    /// Latest bridge receive applied.
    pub received: Option<StageRecord>,
    /// Latest replica process applied.
    pub processed: Option<StageRecord>,
    /// Token sender, filled by a correlated bridge send.
    pub bridge_sender: Option<Address>,
    /// Transaction of the correlated bridge send.
    pub send_tx: Option<B256>,
    /// When the relayed root becomes processable on the destination, in milliseconds.
    #[serde(default)]
    pub confirm_at: Option<u64>,
}

impl NomadMessage {
    /// Builds a message from its dispatch event.
    pub fn from_dispatch(
        event: &EventEnvelope,
        dispatch: &DispatchEvent,
    ) -> Result<Self, MessageBodyError> {
        let header = MessageHeader::decode(&dispatch.message)?;
        let mut message = Self::unparsed(event, dispatch);
        message.sender = header.sender;
        message.recipient = header.recipient;
        message.kind = MessageKind::decode(&header.body);
        message.body = header.body;
        Ok(message)
    }

    /// Builds a message whose raw bytes lack a valid header.
    ///
    /// Routing comes from the dispatch event alone; the whole payload is kept as the body and
    /// the kind is [`MessageKind::Unknown`].
    pub fn unparsed(event: &EventEnvelope, dispatch: &DispatchEvent) -> Self {
        Self {
            message_hash: dispatch.message_hash,
            origin: event.domain,
            destination: dispatch.destination(),
            nonce: dispatch.nonce(),
            sender: B256::ZERO,
            recipient: B256::ZERO,
            root: dispatch.committed_root,
            leaf_index: dispatch.leaf_index,
            kind: MessageKind::Unknown,
            body: dispatch.message.clone(),
            dispatch_block: event.block,
            state: MessageStage::Dispatched,
            dispatched: StageRecord::from_envelope(event),
            updated: None,
            relayed: None,
            received: None,
            processed: None,
            bridge_sender: None,
            send_tx: None,
            confirm_at: None,
        }
    }

    /// Transition emitted when the message is created.
    pub const fn dispatched_transition(&self) -> Transition {
        self.transition(MessageStage::Dispatched, self.dispatched.timestamp)
    }

    /// Applies a home update.
    pub fn update(&mut self, event: &EventEnvelope) -> Option<Transition> {
        self.updated = Some(StageRecord::from_envelope(event));
        self.advance(MessageStage::Updated, event.timestamp)
    }

    /// Applies a replica update. `optimistic_seconds` is the fraud window of the destination.
    pub fn relay(&mut self, event: &EventEnvelope, optimistic_seconds: u64) -> Option<Transition> {
        self.relayed = Some(StageRecord::from_envelope(event));
        self.confirm_at = Self::stamp(self.relayed.as_ref())
            .map(|ts| ts.saturating_add(optimistic_seconds.saturating_mul(1000)));
        self.advance(MessageStage::Relayed, event.timestamp)
    }

    /// Applies a bridge receive.
    pub fn receive(&mut self, event: &EventEnvelope) -> Option<Transition> {
        self.received = Some(StageRecord::from_envelope(event));
        self.advance(MessageStage::Received, event.timestamp)
    }

    /// Applies a replica process.
    pub fn process(&mut self, event: &EventEnvelope) -> Option<Transition> {
        self.processed = Some(StageRecord::from_envelope(event));
        self.advance(MessageStage::Processed, event.timestamp)
    }

    /// Records the bridge send that accompanied the dispatch. Does not change the stage.
    pub const fn send(&mut self, event: &EventEnvelope) {
        self.bridge_sender = Some(event.from);
        self.send_tx = Some(event.tx_hash);
    }

    /// Whether a bridge send has been recorded.
    pub const fn is_sent(&self) -> bool {
        self.send_tx.is_some()
    }

    /// Whether `stage` has had its event applied.
    pub const fn has_applied(&self, stage: MessageStage) -> bool {
        match stage {
            MessageStage::Dispatched => true,
            MessageStage::Updated => self.updated.is_some(),
            MessageStage::Relayed => self.relayed.is_some(),
            MessageStage::Received => self.received.is_some(),
            MessageStage::Processed => self.processed.is_some(),
        }
    }

    /// Whether the stage still needs its event: not applied and not yet passed.
    pub fn awaits(&self, stage: MessageStage) -> bool {
        !self.has_applied(stage) && self.state < stage
    }

    fn advance(&mut self, stage: MessageStage, timestamp: u64) -> Option<Transition> {
        (self.state < stage).then(|| {
            self.state = stage;
            self.transition(stage, timestamp)
        })
    }

    const fn transition(&self, stage: MessageStage, timestamp: u64) -> Transition {
        Transition {
            message_hash: self.message_hash,
            origin: self.origin,
            destination: self.destination,
            stage,
            timestamp,
        }
    }

    /// Recipient and amount of the carried transfer, if any.
    pub fn transfer(&self) -> Option<(Address, U256)> {
        self.kind.as_transfer().map(|t| (t.recipient(), t.amount))
    }

    fn stamp(record: Option<&StageRecord>) -> Option<u64> {
        record.map(|r| r.timestamp).filter(|ts| *ts != 0)
    }

    /// Milliseconds from dispatch to update.
    pub fn to_update(&self) -> Option<u64> {
        let updated = Self::stamp(self.updated.as_ref())?;
        Some(updated.saturating_sub(self.dispatched.timestamp))
    }

    /// Milliseconds from the latest earlier stage to relay.
    pub fn to_relay(&self) -> Option<u64> {
        let relayed = Self::stamp(self.relayed.as_ref())?;
        let prior = Self::stamp(self.updated.as_ref()).unwrap_or(self.dispatched.timestamp);
        Some(relayed.saturating_sub(prior))
    }

    /// Milliseconds from the latest earlier stage to receive.
    pub fn to_receive(&self) -> Option<u64> {
        let received = Self::stamp(self.received.as_ref())?;
        Some(received.saturating_sub(self.before_delivery()))
    }

    /// Milliseconds from the latest earlier stage to process.
    pub fn to_process(&self) -> Option<u64> {
        let processed = Self::stamp(self.processed.as_ref())?;
        Some(processed.saturating_sub(self.before_delivery()))
    }

    fn before_delivery(&self) -> u64 {
        [Self::stamp(self.relayed.as_ref()), Self::stamp(self.updated.as_ref())]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.dispatched.timestamp)
    }
}

//! Core types shared across indexer components.
//!
//! This crate defines the data structures the Nomad message indexer passes between its
//! fetch pipeline, reconciliation buffer and message state machine.

mod domain;
pub use domain::{Domain, DomainId, RateLimitOverride};

mod event;
pub use event::{
    DispatchEvent, EventEnvelope, EventKind, EventPayload, EventSource, ProcessEvent,
    ReceiveEvent, SendEvent, UpdateEvent, dedup_events, sort_events, split_domain_and_nonce,
};

mod body;
pub use body::{
    GovernanceAction, MessageBodyError, MessageHeader, MessageKind, TransferMessage,
    bytes32_to_address,
};

mod message;
pub use message::{MessageStage, NomadMessage, StageCounts, StageRecord, Transition};

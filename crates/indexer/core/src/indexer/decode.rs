//! Typed payloads from raw contract logs.

use crate::client::{BridgeRouter, Home, Replica};
use alloy_primitives::B256;
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use nomad_indexer_types::{
    DispatchEvent, DomainId, EventPayload, ProcessEvent, ReceiveEvent, SendEvent, UpdateEvent,
};

/// Contract a batch of logs was queried from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogSource {
    Home,
    /// Replica tracking the given origin.
    Replica(DomainId),
    BridgeRouter,
}

impl LogSource {
    /// Topics to filter for.
    pub(crate) fn signatures(self) -> Vec<B256> {
        match self {
            Self::Home => vec![Home::Dispatch::SIGNATURE_HASH, Home::Update::SIGNATURE_HASH],
            Self::Replica(_) => {
                vec![Replica::Update::SIGNATURE_HASH, Replica::Process::SIGNATURE_HASH]
            }
            Self::BridgeRouter => {
                vec![BridgeRouter::Send::SIGNATURE_HASH, BridgeRouter::Receive::SIGNATURE_HASH]
            }
        }
    }

    /// Origin recorded on envelopes of this source.
    pub(crate) const fn replica_origin(self) -> DomainId {
        match self {
            Self::Replica(origin) => origin,
            _ => 0,
        }
    }
}

/// Decodes `log` as one of the events `source` emits. Unrelated topics yield `None`.
pub(crate) fn decode_log(
    source: LogSource,
    log: &Log,
) -> Result<Option<EventPayload>, alloy_sol_types::Error> {
    let Some(topic) = log.topic0().copied() else {
        return Ok(None);
    };
    let data = log.data();

    let payload = match source {
        LogSource::Home if topic == Home::Dispatch::SIGNATURE_HASH => {
            let ev = Home::Dispatch::decode_log_data(data)?;
            EventPayload::Dispatch(DispatchEvent {
                message_hash: ev.messageHash,
                leaf_index: ev.leafIndex,
                destination_and_nonce: ev.destinationAndNonce,
                committed_root: ev.committedRoot,
                message: ev.message,
            })
        }
        LogSource::Home if topic == Home::Update::SIGNATURE_HASH => {
            let ev = Home::Update::decode_log_data(data)?;
            EventPayload::HomeUpdate(UpdateEvent {
                home_domain: ev.homeDomain,
                old_root: ev.oldRoot,
                new_root: ev.newRoot,
                signature: ev.signature,
            })
        }
        LogSource::Replica(_) if topic == Replica::Update::SIGNATURE_HASH => {
            let ev = Replica::Update::decode_log_data(data)?;
            EventPayload::ReplicaUpdate(UpdateEvent {
                home_domain: ev.homeDomain,
                old_root: ev.oldRoot,
                new_root: ev.newRoot,
                signature: ev.signature,
            })
        }
        LogSource::Replica(_) if topic == Replica::Process::SIGNATURE_HASH => {
            let ev = Replica::Process::decode_log_data(data)?;
            EventPayload::ReplicaProcess(ProcessEvent {
                message_hash: ev.messageHash,
                success: ev.success,
                return_data: ev.returnData,
            })
        }
        LogSource::BridgeRouter if topic == BridgeRouter::Send::SIGNATURE_HASH => {
            let ev = BridgeRouter::Send::decode_log_data(data)?;
            EventPayload::BridgeSend(SendEvent {
                token: ev.token,
                from: ev.from,
                to_domain: ev.toDomain,
                to_id: ev.toId,
                amount: ev.amount,
                fast_liquidity_enabled: ev.fastLiquidityEnabled,
            })
        }
        LogSource::BridgeRouter if topic == BridgeRouter::Receive::SIGNATURE_HASH => {
            let ev = BridgeRouter::Receive::decode_log_data(data)?;
            EventPayload::BridgeReceive(ReceiveEvent {
                origin_and_nonce: ev.originAndNonce,
                token: ev.token,
                recipient: ev.recipient,
                liquidity_provider: ev.liquidityProvider,
                amount: ev.amount,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(payload))
}

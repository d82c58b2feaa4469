//! Decoding of formatted Nomad messages and their application-level bodies.

use crate::DomainId;
use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HEADER_LEN: usize = 76;
const TOKEN_ID_LEN: usize = 36;
const TRANSFER_ACTION_LEN: usize = 97;
const GOVERNANCE_BATCH_LEN: usize = 33;
const GOVERNANCE_TRANSFER_LEN: usize = 37;

const ACTION_TRANSFER: u8 = 3;
const ACTION_FAST_TRANSFER: u8 = 4;
const ACTION_BATCH: u8 = 1;
const ACTION_TRANSFER_GOVERNOR: u8 = 2;

/// Error decoding a formatted message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageBodyError {
    /// Message shorter than the fixed header.
    #[error("message too short: {0} bytes, header needs {HEADER_LEN}")]
    TooShort(usize),
}

/// Fixed header of a formatted message, followed by its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Origin domain.
    pub origin: DomainId,
    /// Sender on the origin domain.
    pub sender: B256,
    /// Nonce on the origin domain.
    pub nonce: u32,
    /// Destination domain.
    pub destination: DomainId,
    /// Recipient on the destination domain.
    pub recipient: B256,
    /// Application payload.
    pub body: Bytes,
}

impl MessageHeader {
    /// Decodes `origin | sender | nonce | destination | recipient | body`.
    pub fn decode(raw: &[u8]) -> Result<Self, MessageBodyError> {
        if raw.len() < HEADER_LEN {
            return Err(MessageBodyError::TooShort(raw.len()));
        }
        Ok(Self {
            origin: read_u32(raw, 0),
            sender: B256::from_slice(&raw[4..36]),
            nonce: read_u32(raw, 36),
            destination: read_u32(raw, 40),
            recipient: B256::from_slice(&raw[44..76]),
            body: Bytes::copy_from_slice(&raw[HEADER_LEN..]),
        })
    }
}

/// Token transfer carried by a bridge message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMessage {
    /// Canonical domain of the token.
    pub token_domain: DomainId,
    /// Canonical id of the token.
    pub token_id: B256,
    /// Recipient, left-padded to 32 bytes.
    pub to: B256,
    /// Amount transferred.
    pub amount: U256,
    /// Hash of the token details.
    pub details_hash: B256,
    /// Whether fast liquidity was allowed.
    pub allow_fast: bool,
}

impl TransferMessage {
    /// Recipient as an EVM address.
    pub fn recipient(&self) -> Address {
        bytes32_to_address(&self.to)
    }
}

/// Governance action carried by a governance message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum GovernanceAction {
    /// Commits to a batch of calls.
    Batch {
        /// Hash of the batch.
        batch_hash: B256,
    },
    /// Moves the governor role.
    TransferGovernor {
        /// Domain of the new governor.
        domain: DomainId,
        /// New governor, left-padded to 32 bytes.
        governor: B256,
    },
}

/// Decoded sub-message of a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageKind {
    /// A bridge token transfer.
    Transfer(TransferMessage),
    /// A governance action.
    Governance(GovernanceAction),
    /// Body not recognised.
    Unknown,
}

impl MessageKind {
    /// Classifies a message body. Never fails: undecodable bodies are [`MessageKind::Unknown`].
    pub fn decode(body: &[u8]) -> Self {
        if let Some(transfer) = decode_transfer(body) {
            return Self::Transfer(transfer);
        }
        decode_governance(body).map_or(Self::Unknown, Self::Governance)
    }

    /// Returns the transfer, if this is one.
    pub const fn as_transfer(&self) -> Option<&TransferMessage> {
        match self {
            Self::Transfer(transfer) => Some(transfer),
            _ => None,
        }
    }
}

fn decode_transfer(body: &[u8]) -> Option<TransferMessage> {
    if body.len() != TOKEN_ID_LEN + TRANSFER_ACTION_LEN {
        return None;
    }
    let action = &body[TOKEN_ID_LEN..];
    let action_type = action[0];
    if action_type != ACTION_TRANSFER && action_type != ACTION_FAST_TRANSFER {
        return None;
    }
    Some(TransferMessage {
        token_domain: read_u32(body, 0),
        token_id: B256::from_slice(&body[4..36]),
        to: B256::from_slice(&action[1..33]),
        amount: U256::from_be_slice(&action[33..65]),
        details_hash: B256::from_slice(&action[65..97]),
        allow_fast: action_type == ACTION_FAST_TRANSFER,
    })
}

fn decode_governance(body: &[u8]) -> Option<GovernanceAction> {
    match (body.first().copied(), body.len()) {
        (Some(ACTION_BATCH), GOVERNANCE_BATCH_LEN) => {
            Some(GovernanceAction::Batch { batch_hash: B256::from_slice(&body[1..33]) })
        }
        (Some(ACTION_TRANSFER_GOVERNOR), GOVERNANCE_TRANSFER_LEN) => {
            Some(GovernanceAction::TransferGovernor {
                domain: read_u32(body, 1),
                governor: B256::from_slice(&body[5..37]),
            })
        }
        _ => None,
    }
}

/// Takes the low 20 bytes of a left-padded identifier.
pub fn bytes32_to_address(id: &B256) -> Address {
    Address::from_slice(&id[12..])
}

fn read_u32(raw: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&raw[at..at + 4]);
    u32::from_be_bytes(word)
}

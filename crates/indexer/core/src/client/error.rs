use alloy_primitives::B256;
use alloy_transport::TransportError;
use thiserror::Error;

/// Errors raised by a [`ChainClient`](super::ChainClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request failed at the transport or JSON-RPC layer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The node returned no block for the requested number.
    #[error("block {0} not found")]
    MissingBlock(u64),

    /// The node returned no transaction for the requested hash.
    #[error("transaction {0} not found")]
    MissingTransaction(B256),

    /// The node returned no receipt for the requested hash.
    #[error("receipt for {0} not found")]
    MissingReceipt(B256),

    /// A contract call returned data that does not match its ABI.
    #[error(transparent)]
    Decode(#[from] alloy_sol_types::Error),

    /// A configured endpoint is not a valid URL.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    /// The domain has no endpoint configured.
    #[error("no rpc endpoint configured")]
    NoEndpoints,
}

impl ClientError {
    /// Whether the failure is attributable to the endpoint and worth switching over for.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        use ClientError::*;
        match (self, other) {
            (Transport(a), Transport(b)) => a.to_string() == b.to_string(),
            (MissingBlock(a), MissingBlock(b)) => a == b,
            (MissingTransaction(a), MissingTransaction(b)) => a == b,
            (MissingReceipt(a), MissingReceipt(b)) => a == b,
            (Decode(a), Decode(b)) => a.to_string() == b.to_string(),
            (InvalidUrl(a), InvalidUrl(b)) => a == b,
            (NoEndpoints, NoEndpoints) => true,
            _ => false,
        }
    }
}

impl Eq for ClientError {}

use super::IntegrityError;
use crate::{client::ClientError, retry::RetryError};
use alloy_primitives::B256;
use nomad_indexer_storage::StorageError;
use nomad_indexer_types::DomainId;
use thiserror::Error;

/// Errors raised while indexing a domain.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// An RPC call kept failing until the retry policy gave up.
    #[error("rpc retries exhausted: {0}")]
    Rpc(#[from] RetryError<ClientError>),

    /// Reading or writing persisted state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The root chain does not account for every update.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A log emitted by a tracked contract could not be decoded.
    #[error("undecodable log in transaction {tx}: {source}")]
    Decode {
        /// Transaction that emitted the log.
        tx: B256,
        /// Decoder error.
        #[source]
        source: alloy_sol_types::Error,
    },

    /// The node returned a log without its block number or transaction hash.
    #[error("log on domain {0} is missing its inclusion data")]
    IncompleteLog(DomainId),
}

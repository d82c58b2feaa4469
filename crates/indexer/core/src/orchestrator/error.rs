use crate::{indexer::IndexerError, processor::ProcessorError};
use nomad_indexer_storage::StorageError;
use nomad_indexer_types::DomainId;
use thiserror::Error;

/// Errors that abort orchestrator startup.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A domain failed to restore or verify its persisted state.
    #[error("domain {domain}: {source}")]
    Indexer {
        /// Domain that failed.
        domain: DomainId,
        /// Underlying error.
        #[source]
        source: IndexerError,
    },

    /// Replaying persisted events failed.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Reading persisted state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No chain client was supplied for a configured domain.
    #[error("no client for domain {0}")]
    MissingClient(DomainId),
}

/// Rejected administrative requests. Nothing is changed when one is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    /// The domain is not configured.
    #[error("unknown domain {0}")]
    UnknownDomain(DomainId),

    /// The requested start block is beyond what was scanned so far.
    #[error("domain {domain}: block {requested} is above the scanned height {height}")]
    HeightAboveScanned {
        /// Target domain.
        domain: DomainId,
        /// Requested start block, after clamping to the deploy height.
        requested: u64,
        /// Highest block scanned.
        height: u64,
    },

    /// Reading message counts failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

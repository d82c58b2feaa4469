use nomad_indexer_storage::StorageError;
use thiserror::Error;

/// Errors raised while applying events to messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    /// Reading or writing messages or the pool failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

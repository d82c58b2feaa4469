use thiserror::Error;

/// Errors that may occur while interacting with indexer storage.
///
/// This enum is used across all implementations of the storage traits.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A stored value could not be encoded or decoded.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// Reading or writing the snapshot file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A lock guarding in-memory state was poisoned.
    #[error("lock poisoned")]
    LockPoisoned,

    /// A stored value was present but not in the expected shape.
    #[error("corrupt entry {namespace}/{key}: {reason}")]
    CorruptEntry {
        /// Namespace of the entry.
        namespace: String,
        /// Key of the entry.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An update targeted a message that was never inserted.
    #[error("message {0} not found")]
    MessageNotFound(alloy_primitives::B256),
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        use StorageError::*;
        match (self, other) {
            (Serde(a), Serde(b)) => a.to_string() == b.to_string(),
            (Io(a), Io(b)) => a.kind() == b.kind(),
            (LockPoisoned, LockPoisoned) => true,
            (
                CorruptEntry { namespace: n1, key: k1, reason: r1 },
                CorruptEntry { namespace: n2, key: k2, reason: r2 },
            ) => n1 == n2 && k1 == k2 && r1 == r2,
            (MessageNotFound(a), MessageNotFound(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for StorageError {}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

//! Persistence for the Nomad message indexer.
//!
//! Exposes the storage seams the indexer depends on ([`KeyValueStore`], [`MessageStore`] and the
//! event storage reader/writer pair), the key-value backed [`EventStore`] that keeps raw events and
//! per-domain watermarks, and [`MemoryStore`], an in-process backend that can snapshot itself to a
//! JSON file.

mod error;
pub use error::StorageError;

mod traits;
pub use traits::{EventStorageReader, EventStorageWriter, KeyValueStore, MessageStore};

mod kv;
pub use kv::KvCache;

mod events;
pub use events::{EventStore, Watermark};

mod memory;
pub use memory::MemoryStore;

mod macros;

pub(crate) mod metrics;

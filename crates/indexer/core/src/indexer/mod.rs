//! Per-domain event fetching.

mod cache;

mod decode;

mod error;
pub use error::IndexerError;

mod failure;

mod integrity;
pub use integrity::{IntegrityError, check_integrity, root_chain_residual};

mod domain;
pub use domain::{Indexer, IndexerStatus};

//! Configuration management for the indexer.

mod core_config;
pub use core_config::{ConfigError, DEFAULT_BATCH_SIZE, IndexerConfig, RetryConfig};

//! Core of the Nomad message indexer.
//!
//! One [`Indexer`] per domain turns Home, Replica and BridgeRouter logs into
//! [`EventEnvelope`](nomad_indexer_types::EventEnvelope)s, the [`Processor`] applies them to
//! messages and the [`Orchestrator`] drives both in a polling loop.

pub mod client;
pub use client::{ChainClient, ClientError, RpcChainClient};

pub mod config;
pub use config::{ConfigError, IndexerConfig, RetryConfig};

mod events_pool;
pub use events_pool::EventsPool;

pub mod indexer;
pub use indexer::{Indexer, IndexerError, IndexerStatus, IntegrityError};

pub(crate) mod metrics;

pub mod orchestrator;
pub use orchestrator::{
    AdminError, DomainStatus, HomeHealth, Orchestrator, OrchestratorError, OrchestratorHandle,
};

pub mod processor;
pub use processor::{Processor, ProcessorError};

pub mod rate_limiter;
pub use rate_limiter::{RateBudget, RpcMethod, RpcRateLimiter};

pub mod retry;
pub use retry::{RetryError, retry};

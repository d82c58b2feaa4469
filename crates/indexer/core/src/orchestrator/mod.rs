//! Top-level service loop tying the per-domain indexers to the processor.

mod admin;
pub use admin::{DomainStatus, OrchestratorHandle};

mod error;
pub use error::{AdminError, OrchestratorError};

mod health;
pub use health::HomeHealth;

mod service;
pub use service::Orchestrator;

mod statistics;

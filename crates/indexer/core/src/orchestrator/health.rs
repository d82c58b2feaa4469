//! Liveness checks run after every indexing pass.

use crate::{
    client::{ChainClient, HOME_STATE_ACTIVE},
    indexer::Indexer,
    metrics::Metrics,
};
use nomad_indexer_storage::KeyValueStore;
use tracing::{error, trace, warn};

/// Outcome of probing one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeHealth {
    /// The home contract accepts messages.
    Active,
    /// The home contract reports a failed state.
    Failed,
    /// The RPC endpoint did not answer.
    Unreachable,
}

/// Reads the home state of `indexer`'s domain and exports the result.
pub(crate) async fn check_home<C, S>(indexer: &Indexer<C, S>) -> HomeHealth
where
    C: ChainClient,
    S: KeyValueStore + Clone,
{
    let domain = indexer.domain();
    let label = domain.id.to_string();

    let health = match indexer.client().home_state(domain.home).await {
        Ok(HOME_STATE_ACTIVE) => HomeHealth::Active,
        Ok(state) => {
            error!(
                target: "indexer::orchestrator",
                domain = domain.id,
                name = %domain.name,
                state,
                "Home contract failed"
            );
            HomeHealth::Failed
        }
        Err(err) => {
            warn!(
                target: "indexer::orchestrator",
                domain = domain.id,
                %err,
                "Health check could not reach the chain"
            );
            HomeHealth::Unreachable
        }
    };

    let reachable = health != HomeHealth::Unreachable;
    metrics::gauge!(Metrics::RPC_HEALTHY, "domain" => label.clone())
        .set(if reachable { 1.0 } else { 0.0 });
    if reachable {
        metrics::gauge!(Metrics::HOME_FAILED, "domain" => label.clone())
            .set(if health == HomeHealth::Failed { 1.0 } else { 0.0 });
    }
    metrics::gauge!(Metrics::BLOCKS_BEHIND_TIP, "domain" => label)
        .set(indexer.status().blocks_behind_tip as f64);

    trace!(target: "indexer::orchestrator", domain = domain.id, ?health, "Health checked");
    health
}

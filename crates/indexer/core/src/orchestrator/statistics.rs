//! Aggregate message counts per origin.

use crate::metrics::Metrics;
use nomad_indexer_storage::{MessageStore, StorageError};
use nomad_indexer_types::{DomainId, StageCounts};
use std::collections::BTreeMap;
use tracing::info;

/// Counts messages from each of `origins` per stage, then exports and logs them.
pub(crate) async fn report<S: MessageStore>(
    store: &S,
    origins: impl IntoIterator<Item = DomainId>,
) -> Result<BTreeMap<DomainId, StageCounts>, StorageError> {
    let mut all = BTreeMap::new();
    for origin in origins {
        let counts = store.stage_counts(origin).await?;
        Metrics::record_stage_counts(origin, &counts);
        info!(
            target: "indexer::orchestrator",
            origin,
            total = counts.total(),
            dispatched = counts.dispatched,
            updated = counts.updated,
            relayed = counts.relayed,
            received = counts.received,
            processed = counts.processed,
            "Message statistics"
        );
        all.insert(origin, counts);
    }
    Ok(all)
}

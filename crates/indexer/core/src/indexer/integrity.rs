//! Root-chain continuity of `Update` events.
//!
//! Every update moves a root forward: `old_root -> new_root`. Walking from the oldest known root
//! must visit every recorded update exactly once. Any update left over means an update is missing
//! from the middle of the chain, or the same transition was recorded twice.

use alloy_primitives::B256;
use nomad_indexer_types::{DomainId, EventEnvelope, EventPayload, UpdateEvent};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// A root chain that does not account for all of its updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{domain}: {residual} {} left after walking the root chain", describe(.remote))]
pub struct IntegrityError {
    /// Domain the updates were observed on.
    pub domain: DomainId,
    /// Origin tracked by the replica, `None` for the home chain.
    pub remote: Option<DomainId>,
    /// Updates not reached by the walk.
    pub residual: usize,
}

fn describe(remote: &Option<DomainId>) -> String {
    match remote {
        Some(remote) => format!("updates of replica for {remote}"),
        None => "home updates".to_string(),
    }
}

/// Number of updates not reachable from the oldest one.
///
/// The walk starts at the old root of the update with the earliest timestamp. Each mapped edge is
/// consumed once, so cycles terminate.
pub fn root_chain_residual<'a, I>(updates: I) -> usize
where
    I: IntoIterator<Item = (u64, &'a UpdateEvent)>,
{
    walk(None, updates).0
}

/// Walks `updates` from `start`, or from the old root of the earliest update when `None`.
///
/// Returns the number of updates left over and the root the walk ended on.
fn walk<'a, I>(start: Option<B256>, updates: I) -> (usize, Option<B256>)
where
    I: IntoIterator<Item = (u64, &'a UpdateEvent)>,
{
    let mut edges: HashMap<B256, B256> = HashMap::new();
    let mut total = 0usize;
    let mut earliest: Option<(u64, B256)> = None;

    for (timestamp, update) in updates {
        edges.insert(update.old_root, update.new_root);
        total += 1;
        if earliest.is_none_or(|(first, _)| timestamp < first) {
            earliest = Some((timestamp, update.old_root));
        }
    }

    let Some(mut root) = start.or(earliest.map(|(_, root)| root)) else {
        return (0, None);
    };
    while let Some(next) = edges.remove(&root) {
        total -= 1;
        root = next;
    }
    (total, Some(root))
}

/// Checks the home chain and every replica chain among `events` of `domain`.
pub fn check_integrity(domain: DomainId, events: &[EventEnvelope]) -> Result<(), IntegrityError> {
    RootChains::new(domain).extend(events)
}

#[derive(Debug, Default)]
struct Chain {
    tip: Option<B256>,
    seen: HashSet<B256>,
}

/// Verified root chains of one domain, extended one batch at a time.
///
/// Each chain remembers the root it ended on, so a new batch is walked from there and only its
/// unseen updates are visited.
#[derive(Debug)]
pub(crate) struct RootChains {
    domain: DomainId,
    /// Keyed by replica origin, `None` for the home chain.
    chains: BTreeMap<Option<DomainId>, Chain>,
}

impl RootChains {
    pub(crate) const fn new(domain: DomainId) -> Self {
        Self { domain, chains: BTreeMap::new() }
    }

    /// Appends the updates among `events` to their chains.
    ///
    /// Updates already verified are skipped. Nothing is recorded unless every chain accounts for
    /// all of its new updates.
    pub(crate) fn extend(&mut self, events: &[EventEnvelope]) -> Result<(), IntegrityError> {
        let mut pending: BTreeMap<Option<DomainId>, Vec<(u64, &UpdateEvent, B256)>> =
            BTreeMap::new();
        for event in events {
            let (remote, update) = match &event.payload {
                EventPayload::HomeUpdate(update) => (None, update),
                EventPayload::ReplicaUpdate(update) => (Some(event.replica_origin), update),
                _ => continue,
            };
            let hash = event.unique_hash();
            if self.chains.get(&remote).is_some_and(|chain| chain.seen.contains(&hash)) {
                continue;
            }
            pending.entry(remote).or_default().push((event.timestamp, update, hash));
        }

        let mut tips = Vec::with_capacity(pending.len());
        for (remote, updates) in &pending {
            let start = self.chains.get(remote).and_then(|chain| chain.tip);
            let (residual, tip) =
                walk(start, updates.iter().map(|(timestamp, update, _)| (*timestamp, *update)));
            if residual != 0 {
                return Err(IntegrityError { domain: self.domain, remote: *remote, residual });
            }
            tips.push((*remote, tip));
        }

        for ((remote, tip), updates) in tips.into_iter().zip(pending.into_values()) {
            let chain = self.chains.entry(remote).or_default();
            chain.tip = tip;
            chain.seen.extend(updates.into_iter().map(|(_, _, hash)| hash));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use nomad_indexer_types::EventSource;

    fn root(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    fn edge(old: u8, new: u8) -> UpdateEvent {
        UpdateEvent {
            home_domain: 1000,
            old_root: root(old),
            new_root: root(new),
            signature: Bytes::new(),
        }
    }

    /// root0 -> root1 -> ... -> rootN, one second apart.
    fn chain(n: u8) -> Vec<(u64, UpdateEvent)> {
        (0..n).map(|i| (u64::from(i) * 1000, edge(i, i + 1))).collect()
    }

    fn residual(updates: &[(u64, UpdateEvent)]) -> usize {
        root_chain_residual(updates.iter().map(|(ts, u)| (*ts, u)))
    }

    #[test]
    fn test_complete_chain_passes() {
        assert_eq!(residual(&chain(10)), 0);
        assert_eq!(residual(&[]), 0);
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let mut updates = chain(10);
        updates.reverse();
        updates.swap(2, 7);
        assert_eq!(residual(&updates), 0);
    }

    #[test]
    fn test_missing_edge_is_detected() {
        for gap in 1..9 {
            let mut updates = chain(10);
            updates.remove(gap);
            assert!(residual(&updates) > 0, "gap at {gap}");
        }
    }

    #[test]
    fn test_duplicated_edge_is_detected() {
        let mut updates = chain(10);
        updates.push((20_000, edge(4, 5)));
        assert_eq!(residual(&updates), 1);
    }

    #[test]
    fn test_cycle_terminates() {
        let updates = vec![(0, edge(1, 2)), (1000, edge(2, 1)), (2000, edge(1, 2))];
        assert_eq!(residual(&updates), 1);
    }

    fn envelope(replica_origin: DomainId, ts: u64, update: UpdateEvent) -> EventEnvelope {
        EventEnvelope {
            domain: 1000,
            replica_origin,
            timestamp: ts,
            block: ts / 1000,
            source: EventSource::Fresh,
            gas_used: U256::ZERO,
            tx_hash: B256::ZERO,
            from: Address::ZERO,
            payload: if replica_origin == 0 {
                EventPayload::HomeUpdate(update)
            } else {
                EventPayload::ReplicaUpdate(update)
            },
        }
    }

    #[test]
    fn test_replica_chains_are_checked_independently() {
        let mut events: Vec<EventEnvelope> =
            chain(5).into_iter().map(|(ts, u)| envelope(0, ts, u)).collect();
        // Two replicas tracking unrelated chains whose roots collide.
        events.extend(chain(5).into_iter().map(|(ts, u)| envelope(2000, ts, u)));
        events.extend(chain(5).into_iter().map(|(ts, u)| envelope(3000, ts + 500, u)));
        assert_eq!(check_integrity(1000, &events), Ok(()));

        events.retain(|e| {
            !(e.replica_origin == 3000 &&
                matches!(&e.payload, EventPayload::ReplicaUpdate(u) if u.old_root == root(2)))
        });
        assert_eq!(
            check_integrity(1000, &events),
            Err(IntegrityError { domain: 1000, remote: Some(3000), residual: 2 })
        );
    }

    fn home_events(updates: Vec<(u64, UpdateEvent)>) -> Vec<EventEnvelope> {
        updates.into_iter().map(|(ts, u)| envelope(0, ts, u)).collect()
    }

    #[test]
    fn test_chains_extend_across_batches() {
        let events = home_events(chain(9));
        let mut chains = RootChains::new(1000);
        chains.extend(&events[..3]).unwrap();
        // Overlapping batches re-deliver events already verified.
        chains.extend(&events[1..6]).unwrap();
        chains.extend(&events[6..]).unwrap();
        chains.extend(&[]).unwrap();
        assert_eq!(chains.chains[&None].tip, Some(root(9)));
    }

    #[test]
    fn test_gap_in_later_batch_is_detected() {
        let events = home_events(chain(9));
        let mut chains = RootChains::new(1000);
        chains.extend(&events[..4]).unwrap();

        let err = chains.extend(&events[5..]).unwrap_err();
        assert_eq!(err, IntegrityError { domain: 1000, remote: None, residual: 4 });
        // The failed batch left nothing behind, so the complete range still fits.
        chains.extend(&events[4..]).unwrap();
        assert_eq!(chains.chains[&None].tip, Some(root(9)));
    }

    #[test]
    fn test_edge_repeated_in_later_batch_is_detected() {
        let mut chains = RootChains::new(1000);
        chains.extend(&home_events(chain(5))).unwrap();

        // Same transition recorded again by a different update.
        let mut again = envelope(0, 9_000, edge(4, 5));
        again.tx_hash = B256::repeat_byte(0xee);
        assert_eq!(
            chains.extend(&[again]),
            Err(IntegrityError { domain: 1000, remote: None, residual: 1 })
        );
    }

    #[test]
    fn test_failed_replica_keeps_home_chain_unchanged() {
        let mut chains = RootChains::new(1000);
        let mut events = home_events(chain(2));
        events.push(envelope(2000, 0, edge(0, 1)));
        events.push(envelope(2000, 2000, edge(2, 3)));
        assert!(chains.extend(&events).is_err());
        assert!(chains.chains.is_empty());
    }

    #[test]
    fn test_home_failure_names_domain() {
        let mut updates = chain(4);
        updates.remove(1);
        let events: Vec<_> = updates.into_iter().map(|(ts, u)| envelope(0, ts, u)).collect();
        let err = check_integrity(1000, &events).unwrap_err();
        assert_eq!(err, IntegrityError { domain: 1000, remote: None, residual: 2 });
        assert_eq!(err.to_string(), "1000: 2 home updates left after walking the root chain");
    }
}

use derive_more::Constructor;
use nomad_indexer_types::{Domain, DomainId};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Duration};
use thiserror::Error;

/// Default number of blocks fetched per batch.
pub const DEFAULT_BATCH_SIZE: u64 = 2000;

/// Retry policy applied to every RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Constructor, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on every subsequent one.
    pub base_delay_ms: u64,
    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 100, base_delay_ms: 2_000, max_delay_ms: 5 * 60 * 1000 }
    }
}

impl RetryConfig {
    /// Delay before the first retry.
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound for a single delay.
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration for the indexer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerConfig {
    /// Domains to index.
    pub domains: Vec<Domain>,

    /// Domain hosting the governance router. Its replicas track every other domain.
    pub governor_domain: DomainId,

    /// Blocks per batch when a domain has no override.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Blocks re-fetched below each batch start.
    #[serde(default = "default_from_lag")]
    pub from_lag: u64,

    /// Blocks kept back from the chain tip.
    #[serde(default = "default_to_lag")]
    pub to_lag: u64,

    /// Pause between orchestrator iterations.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// RPC retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Message updates in flight at once.
    #[serde(default = "default_store_concurrency")]
    pub store_concurrency: usize,

    /// Re-fetch attempts after a steady-state integrity failure.
    #[serde(default = "default_integrity_attempts")]
    pub integrity_attempts: u32,

    /// Trailing window over which RPC failures are counted.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Pool entries older than this are pruned. `None` keeps everything.
    #[serde(default = "default_pool_retention_secs")]
    pub pool_retention_secs: Option<u64>,

    /// Seed for shuffling events before they are applied. Unset in production.
    #[serde(default)]
    pub chaos_seed: Option<u64>,
}

const fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

const fn default_from_lag() -> u64 {
    20
}

const fn default_to_lag() -> u64 {
    5
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_store_concurrency() -> usize {
    10
}

const fn default_integrity_attempts() -> u32 {
    3
}

const fn default_failure_window_secs() -> u64 {
    60 * 60
}

const fn default_pool_retention_secs() -> Option<u64> {
    Some(7 * 24 * 60 * 60)
}

impl IndexerConfig {
    /// Creates a configuration with defaults for everything but the domains.
    pub fn new(domains: Vec<Domain>, governor_domain: DomainId) -> Self {
        Self {
            domains,
            governor_domain,
            batch_size: default_batch_size(),
            from_lag: default_from_lag(),
            to_lag: default_to_lag(),
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryConfig::default(),
            store_concurrency: default_store_concurrency(),
            integrity_attempts: default_integrity_attempts(),
            failure_window_secs: default_failure_window_secs(),
            pool_retention_secs: default_pool_retention_secs(),
            chaos_seed: None,
        }
    }

    /// Looks up a domain by id.
    pub fn domain(&self, id: DomainId) -> Option<&Domain> {
        self.domains.iter().find(|d| d.id == id)
    }

    /// Batch size for `domain`, honouring its override.
    pub fn batch_size_for(&self, domain: &Domain) -> u64 {
        domain.batch_size.unwrap_or(self.batch_size).max(1)
    }

    /// Remote domains whose replicas live on `domain`.
    ///
    /// The governor domain hosts a replica of every other domain, the rest only of the governor.
    /// Remotes without a configured replica address are left out.
    pub fn remote_domains(&self, domain: &Domain) -> Vec<DomainId> {
        self.domains
            .iter()
            .map(|d| d.id)
            .filter(|id| *id != domain.id)
            .filter(|id| domain.id == self.governor_domain || *id == self.governor_domain)
            .filter(|id| domain.replicas.contains_key(id))
            .collect()
    }

    /// Pause between orchestrator iterations.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Trailing window over which RPC failures are counted.
    pub const fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    /// Replaces RPC lists from `<NAME>_RPC` variables resolved through `lookup`.
    ///
    /// Values are comma separated and tried in order.
    pub fn apply_rpc_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for domain in &mut self.domains {
            if let Some(raw) = lookup(&domain.rpc_env_var()) {
                let rpcs: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if !rpcs.is_empty() {
                    domain.rpcs = rpcs;
                }
            }
        }
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domains.is_empty() {
            return Err(ConfigError::NoDomains);
        }
        let mut seen = HashSet::new();
        for domain in &self.domains {
            if !seen.insert(domain.id) {
                return Err(ConfigError::DuplicateDomain(domain.id));
            }
            if domain.rpcs.is_empty() {
                return Err(ConfigError::MissingRpc(domain.name.clone()));
            }
            if domain.batch_size == Some(0) {
                return Err(ConfigError::ZeroBatchSize(domain.id));
            }
        }
        if self.domain(self.governor_domain).is_none() {
            return Err(ConfigError::UnknownGovernor(self.governor_domain));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize(0));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        Ok(())
    }
}

/// Errors raised when validating an [`IndexerConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No domains configured.
    #[error("no domains configured")]
    NoDomains,
    /// Two domains share an id.
    #[error("domain {0} configured twice")]
    DuplicateDomain(DomainId),
    /// A domain has no RPC endpoint.
    #[error("domain {0} has no rpc endpoint")]
    MissingRpc(String),
    /// The governor domain is not among the configured domains.
    #[error("governor domain {0} is not configured")]
    UnknownGovernor(DomainId),
    /// A batch size of zero, globally (`0`) or for the given domain.
    #[error("batch size must be positive (domain {0})")]
    ZeroBatchSize(DomainId),
    /// Retry policy allows no attempts.
    #[error("retry policy must allow at least one attempt")]
    ZeroRetryAttempts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use std::collections::{BTreeMap, HashMap};

    fn domain(id: DomainId, name: &str, replicas: &[DomainId]) -> Domain {
        Domain {
            id,
            name: name.to_string(),
            rpcs: vec![format!("http://{name}:8545")],
            deploy_height: 0,
            home: Address::repeat_byte(1),
            replicas: replicas
                .iter()
                .map(|r| (*r, Address::repeat_byte(*r as u8)))
                .collect::<BTreeMap<_, _>>(),
            bridge_router: None,
            optimistic_seconds: 1800,
            batch_size: None,
            rate_limit: None,
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfig::new(
            vec![
                domain(1, "ethereum", &[2, 3]),
                domain(2, "moonbeam", &[1]),
                domain(3, "evmos", &[1, 2]),
            ],
            1,
        )
    }

    #[test]
    fn test_remote_domains() {
        let config = config();
        assert_eq!(config.remote_domains(&config.domains[0]), vec![2, 3]);
        assert_eq!(config.remote_domains(&config.domains[1]), vec![1]);
        // Non-governor domains only track the governor, whatever else is configured.
        assert_eq!(config.remote_domains(&config.domains[2]), vec![1]);
    }

    #[test]
    fn test_batch_size_override() {
        let mut config = config();
        config.domains[1].batch_size = Some(500);
        assert_eq!(config.batch_size_for(&config.domains[0]), DEFAULT_BATCH_SIZE);
        assert_eq!(config.batch_size_for(&config.domains[1]), 500);
    }

    #[test]
    fn test_rpc_overrides() {
        let mut config = config();
        let env: HashMap<&str, &str> =
            HashMap::from([("MOONBEAM_RPC", "http://a, http://b,"), ("EVMOS_RPC", " ")]);
        config.apply_rpc_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.domains[1].rpcs, vec!["http://a".to_string(), "http://b".to_string()]);
        assert_eq!(config.domains[2].rpcs, vec!["http://evmos:8545".to_string()]);
    }

    #[test]
    fn test_validate() {
        assert_eq!(config().validate(), Ok(()));

        let mut bad = config();
        bad.governor_domain = 99;
        assert_eq!(bad.validate(), Err(ConfigError::UnknownGovernor(99)));

        let mut bad = config();
        bad.domains.push(domain(2, "dup", &[]));
        assert_eq!(bad.validate(), Err(ConfigError::DuplicateDomain(2)));

        let mut bad = config();
        bad.domains[0].rpcs.clear();
        assert_eq!(bad.validate(), Err(ConfigError::MissingRpc("ethereum".to_string())));

        let mut bad = config();
        bad.retry.max_attempts = 0;
        assert_eq!(bad.validate(), Err(ConfigError::ZeroRetryAttempts));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "domains": [{
                "id": 1,
                "name": "ethereum",
                "rpcs": ["http://localhost:8545"],
                "deployHeight": 100,
                "home": "0x0000000000000000000000000000000000000001"
            }],
            "governorDomain": 1
        }"#;
        let config: IndexerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, IndexerConfig::new(config.domains.clone(), 1));
    }
}

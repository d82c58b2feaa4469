use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric identifier of a domain, as used by the Nomad contracts.
pub type DomainId = u32;

/// A single chain participating in the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    /// Domain identifier.
    pub id: DomainId,
    /// Human readable name, also used to resolve `<NAME>_RPC` overrides.
    pub name: String,
    /// RPC endpoints in fallback order.
    pub rpcs: Vec<String>,
    /// First block to scan.
    pub deploy_height: u64,
    /// Home contract address.
    pub home: Address,
    /// Replica contract per remote domain.
    #[serde(default)]
    pub replicas: BTreeMap<DomainId, Address>,
    /// Bridge router address, if the bridge is deployed here.
    #[serde(default)]
    pub bridge_router: Option<Address>,
    /// Optimistic fraud-proof window of the replicas on this domain, in seconds.
    #[serde(default = "default_optimistic_seconds")]
    pub optimistic_seconds: u64,
    /// Overrides the global batch size for this domain.
    #[serde(default)]
    pub batch_size: Option<u64>,
    /// Overrides the provider-derived rate limit budget.
    #[serde(default)]
    pub rate_limit: Option<RateLimitOverride>,
}

const fn default_optimistic_seconds() -> u64 {
    30 * 60
}

/// Explicit rate limit budget for a domain's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOverride {
    /// Capacity units refilled per period.
    pub units: f64,
    /// Refill period in milliseconds.
    pub period_ms: u64,
}

impl Domain {
    /// Returns the replica contract tracking `remote`, if one is configured.
    pub fn replica_for(&self, remote: DomainId) -> Option<Address> {
        self.replicas.get(&remote).copied()
    }

    /// Environment variable consulted for an RPC override, e.g. `ETHEREUM_RPC`.
    pub fn rpc_env_var(&self) -> String {
        format!("{}_RPC", self.name.to_uppercase())
    }
}

//! Per-endpoint capacity-unit budgeting for RPC calls.

use derive_more::Display;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use nomad_indexer_types::RateLimitOverride;
use std::{num::NonZeroU32, time::Duration};
use tracing::trace;

/// Cost of the most expensive call. Buckets always hold at least this much.
const MAX_CALL_COST: u32 = 75;

/// Units a provider grants per request-per-second of advertised throughput.
const UNITS_PER_REQUEST: f64 = 25.0;

/// RPC method kinds with a known cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RpcMethod {
    /// `eth_blockNumber`
    #[display("get_block_number")]
    BlockNumber,
    /// `eth_getLogs`
    #[display("get_logs")]
    Logs,
    /// `eth_getBlockByNumber`
    #[display("get_block")]
    Block,
    /// `eth_getTransactionByHash`
    #[display("get_transaction")]
    Transaction,
    /// `eth_getTransactionReceipt`
    #[display("get_transaction_receipt")]
    Receipt,
    /// `eth_call`
    #[display("call")]
    Call,
}

impl RpcMethod {
    /// All methods, for metric registration.
    pub const ALL: [Self; 6] =
        [Self::BlockNumber, Self::Logs, Self::Block, Self::Transaction, Self::Receipt, Self::Call];

    /// Capacity units consumed by one call.
    pub const fn cost(self) -> u32 {
        match self {
            Self::BlockNumber => 10,
            Self::Logs => MAX_CALL_COST,
            Self::Block => 16,
            Self::Transaction => 17,
            Self::Receipt => 15,
            Self::Call => 26,
        }
    }

    /// Metric label of the method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockNumber => "get_block_number",
            Self::Logs => "get_logs",
            Self::Block => "get_block",
            Self::Transaction => "get_transaction",
            Self::Receipt => "get_transaction_receipt",
            Self::Call => "call",
        }
    }
}

/// Units refilled per period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudget {
    /// Units per period. May be fractional.
    pub units: f64,
    /// Refill period.
    pub period: Duration,
}

impl RateBudget {
    /// A budget of `units` per second.
    pub const fn per_second(units: f64) -> Self {
        Self { units, period: Duration::from_secs(1) }
    }

    /// Budget for a provider advertising `rps` requests per second.
    pub fn from_requests_per_second(rps: f64) -> Self {
        Self::per_second(rps * UNITS_PER_REQUEST)
    }

    /// Picks a budget from the endpoint's provider, falling back to the domain name.
    pub fn for_endpoint(domain_name: &str, url: &str) -> Self {
        if url.contains("alchemy") {
            return Self::per_second(330.0);
        }
        if url.contains("infura") {
            return Self::per_second(1.15 * UNITS_PER_REQUEST);
        }
        let rps = match domain_name.to_lowercase().as_str() {
            "moonbeam" => 3.9,
            "milkomedac1" => 3.86,
            "xdai" => 3.1,
            "evmos" => 2.1,
            "avalanche" => 3.66,
            "candle" => 2.1,
            _ => 1.0,
        };
        Self::from_requests_per_second(rps)
    }
}

impl From<RateLimitOverride> for RateBudget {
    fn from(value: RateLimitOverride) -> Self {
        Self { units: value.units, period: Duration::from_millis(value.period_ms) }
    }
}

/// Token-bucket limiter in capacity units.
///
/// Callers are delayed until enough units have refilled, never rejected. The bucket is sized to a
/// whole multiple of the budget that fits the most expensive call.
#[derive(Debug)]
pub struct RpcRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    burst: NonZeroU32,
    budget: RateBudget,
}

impl RpcRateLimiter {
    /// Creates a limiter refilling `budget`.
    pub fn new(budget: RateBudget) -> Self {
        let units = if budget.units.is_finite() && budget.units > 0.0 { budget.units } else { 1.0 };
        let multiplier = (f64::from(MAX_CALL_COST) / units).ceil().max(1.0);
        let burst = NonZeroU32::new((units * multiplier).ceil() as u32).unwrap_or(NonZeroU32::MIN);

        let per_unit = budget.period.div_f64(units).max(Duration::from_nanos(1));
        let quota = Quota::with_period(per_unit)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);

        Self { limiter: RateLimiter::direct(quota), burst, budget }
    }

    /// Configured budget.
    pub const fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Waits until a call of kind `method` fits the budget.
    pub async fn acquire(&self, method: RpcMethod) {
        self.acquire_units(method.cost()).await;
    }

    /// Waits until `units` fit the budget. Requests above the bucket size are capped to it.
    pub async fn acquire_units(&self, units: u32) {
        let Some(n) = NonZeroU32::new(units.min(self.burst.get())) else {
            return;
        };
        // Capped to the burst above, so capacity is always sufficient.
        if self.limiter.until_n_ready(n).await.is_err() {
            trace!(target: "indexer::rpc", units, "Rate limiter rejected oversized request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Instant;

    #[rstest]
    #[case("ethereum", "https://eth-mainnet.alchemyapi.io/v2/key", 330.0)]
    #[case("ethereum", "https://mainnet.infura.io/v3/key", 28.75)]
    #[case("moonbeam", "https://rpc.api.moonbeam.network", 97.5)]
    #[case("evmos", "https://eth.bd.evmos.org:8545", 52.5)]
    #[case("unknown", "http://localhost:8545", 25.0)]
    fn test_budget_for_endpoint(#[case] name: &str, #[case] url: &str, #[case] units: f64) {
        let budget = RateBudget::for_endpoint(name, url);
        assert!((budget.units - units).abs() < 1e-9, "{name}: {}", budget.units);
        assert_eq!(budget.period, Duration::from_secs(1));
    }

    #[test]
    fn test_bucket_fits_largest_call() {
        let limiter = RpcRateLimiter::new(RateBudget::per_second(25.0));
        assert_eq!(limiter.burst.get(), 75);

        let limiter = RpcRateLimiter::new(RateBudget::per_second(330.0));
        assert_eq!(limiter.burst.get(), 330);
    }

    #[tokio::test]
    async fn test_calls_within_burst_are_immediate() {
        let limiter = RpcRateLimiter::new(RateBudget::per_second(330.0));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire(RpcMethod::Logs).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_calls_above_budget_are_delayed_not_rejected() {
        // 100 units per 200ms, bucket of 100.
        let limiter = RpcRateLimiter::new(RateBudget {
            units: 100.0,
            period: Duration::from_millis(200),
        });
        let start = Instant::now();
        let mut completed = 0;
        // 4 × 50 units: two fit the burst, two more need a full refill.
        for _ in 0..4 {
            limiter.acquire_units(50).await;
            completed += 1;
        }
        let elapsed = start.elapsed();
        assert_eq!(completed, 4);
        assert!(elapsed >= Duration::from_millis(180), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_000), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_oversized_request_is_capped() {
        let limiter = RpcRateLimiter::new(RateBudget::per_second(75.0));
        let start = Instant::now();
        limiter.acquire_units(10_000).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}

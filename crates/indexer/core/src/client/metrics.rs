//! Metrics for the chain RPC client.

use crate::rate_limiter::RpcMethod;
use nomad_indexer_types::DomainId;

/// Container for metrics.
#[derive(Debug, Clone)]
pub(super) struct Metrics;

impl Metrics {
    /// Identifier for the counter of successful RPC requests. Labels: `method`, `domain`.
    pub(crate) const RPC_REQUESTS_SUCCESS_TOTAL: &'static str =
        "nomad_indexer_rpc_requests_success_total";
    /// Identifier for the counter of failed RPC requests. Labels: `method`, `domain`.
    pub(crate) const RPC_REQUESTS_ERROR_TOTAL: &'static str =
        "nomad_indexer_rpc_requests_error_total";
    /// Identifier for the histogram of RPC request durations. Labels: `method`, `domain`.
    pub(crate) const RPC_REQUEST_DURATION_SECONDS: &'static str =
        "nomad_indexer_rpc_request_duration_seconds";
    /// Identifier for the counter of endpoint switches. Labels: `domain`.
    pub(crate) const RPC_FALLBACK_TOTAL: &'static str = "nomad_indexer_rpc_fallback_total";

    /// Describes the client metrics and zeroes them for `domain`.
    pub(crate) fn init(domain: DomainId) {
        Self::describe();
        Self::zero(domain);
    }

    fn describe() {
        metrics::describe_counter!(
            Self::RPC_REQUESTS_SUCCESS_TOTAL,
            metrics::Unit::Count,
            "Total number of successful RPC requests made by the indexer"
        );
        metrics::describe_counter!(
            Self::RPC_REQUESTS_ERROR_TOTAL,
            metrics::Unit::Count,
            "Total number of failed RPC requests made by the indexer"
        );
        metrics::describe_histogram!(
            Self::RPC_REQUEST_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of RPC requests made by the indexer"
        );
        metrics::describe_counter!(
            Self::RPC_FALLBACK_TOTAL,
            metrics::Unit::Count,
            "Number of times the indexer switched to a fallback RPC endpoint"
        );
    }

    fn zero(domain: DomainId) {
        for method in RpcMethod::ALL {
            metrics::counter!(
                Self::RPC_REQUESTS_SUCCESS_TOTAL,
                "method" => method.as_str(),
                "domain" => domain.to_string()
            )
            .increment(0);
            metrics::counter!(
                Self::RPC_REQUESTS_ERROR_TOTAL,
                "method" => method.as_str(),
                "domain" => domain.to_string()
            )
            .increment(0);
        }
        metrics::counter!(Self::RPC_FALLBACK_TOTAL, "domain" => domain.to_string()).increment(0);
    }
}

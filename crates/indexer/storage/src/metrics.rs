use nomad_indexer_types::DomainId;

/// Container for event storage metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    pub(crate) const STORAGE_REQUESTS_SUCCESS_TOTAL: &'static str =
        "nomad_indexer_storage_success_total";
    pub(crate) const STORAGE_REQUESTS_ERROR_TOTAL: &'static str =
        "nomad_indexer_storage_error_total";
    pub(crate) const STORAGE_REQUEST_DURATION_SECONDS: &'static str =
        "nomad_indexer_storage_duration_seconds";

    pub(crate) const STORAGE_METHOD_STORE_EVENTS: &'static str = "store_events";
    pub(crate) const STORAGE_METHOD_ALL_EVENTS: &'static str = "all_events";
    pub(crate) const STORAGE_METHOD_WATERMARK: &'static str = "watermark";
    pub(crate) const STORAGE_METHOD_ADVANCE_HEIGHT: &'static str = "advance_height";

    pub(crate) fn init(domain: DomainId) {
        Self::describe();
        Self::zero(domain);
    }

    fn describe() {
        metrics::describe_counter!(
            Self::STORAGE_REQUESTS_SUCCESS_TOTAL,
            metrics::Unit::Count,
            "Total number of successful indexer event storage requests"
        );
        metrics::describe_counter!(
            Self::STORAGE_REQUESTS_ERROR_TOTAL,
            metrics::Unit::Count,
            "Total number of failed indexer event storage requests"
        );
        metrics::describe_histogram!(
            Self::STORAGE_REQUEST_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of indexer event storage requests"
        );
    }

    fn zero_storage_methods(domain: DomainId, method_name: &'static str) {
        metrics::counter!(
            Self::STORAGE_REQUESTS_SUCCESS_TOTAL,
            "method" => method_name,
            "domain" => domain.to_string()
        )
        .increment(0);

        metrics::counter!(
            Self::STORAGE_REQUESTS_ERROR_TOTAL,
            "method" => method_name,
            "domain" => domain.to_string()
        )
        .increment(0);
    }

    fn zero(domain: DomainId) {
        Self::zero_storage_methods(domain, Self::STORAGE_METHOD_STORE_EVENTS);
        Self::zero_storage_methods(domain, Self::STORAGE_METHOD_ALL_EVENTS);
        Self::zero_storage_methods(domain, Self::STORAGE_METHOD_WATERMARK);
        Self::zero_storage_methods(domain, Self::STORAGE_METHOD_ADVANCE_HEIGHT);
    }
}

//! Metrics for message processing and domain health.

use nomad_indexer_types::{DomainId, MessageStage, NomadMessage, StageCounts};

/// Container for metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    /// Gauge of messages per current stage. Labels: `origin`, `stage`.
    pub(crate) const MESSAGES: &'static str = "nomad_indexer_messages";
    /// Counter of stage transitions. Labels: `stage`.
    pub(crate) const TRANSITIONS_TOTAL: &'static str = "nomad_indexer_transitions_total";
    /// Counter of events buffered for a message not yet seen. Labels: `kind`.
    pub(crate) const POOLED_EVENTS_TOTAL: &'static str = "nomad_indexer_pooled_events_total";
    /// Histogram of time spent reaching a stage from the previous one. Labels: `stage`.
    pub(crate) const STAGE_LATENCY_SECONDS: &'static str = "nomad_indexer_stage_latency_seconds";
    /// Histogram of gas used by the transaction that moved a message to a stage. Labels: `stage`.
    pub(crate) const STAGE_GAS_USED: &'static str = "nomad_indexer_stage_gas_used";
    /// Gauge set to 1 while a domain's home contract is not active. Labels: `domain`.
    pub(crate) const HOME_FAILED: &'static str = "nomad_indexer_home_failed";
    /// Gauge set to 1 while a domain's RPC answers. Labels: `domain`.
    pub(crate) const RPC_HEALTHY: &'static str = "nomad_indexer_rpc_healthy";
    /// Gauge of blocks between the chain tip and the last indexed block. Labels: `domain`.
    pub(crate) const BLOCKS_BEHIND_TIP: &'static str = "nomad_indexer_blocks_behind_tip";

    /// Describes every metric and zeroes the per-domain series.
    pub(crate) fn init(domains: &[DomainId]) {
        Self::describe();
        for domain in domains {
            Self::zero(*domain);
        }
    }

    fn describe() {
        metrics::describe_gauge!(
            Self::MESSAGES,
            metrics::Unit::Count,
            "Number of indexed messages per origin and current stage"
        );
        metrics::describe_counter!(
            Self::TRANSITIONS_TOTAL,
            metrics::Unit::Count,
            "Number of message stage transitions applied"
        );
        metrics::describe_counter!(
            Self::POOLED_EVENTS_TOTAL,
            metrics::Unit::Count,
            "Number of events buffered before their message was known"
        );
        metrics::describe_histogram!(
            Self::STAGE_LATENCY_SECONDS,
            metrics::Unit::Seconds,
            "Time a message took to reach a stage from the previous one"
        );
        metrics::describe_histogram!(
            Self::STAGE_GAS_USED,
            metrics::Unit::Count,
            "Gas used by the transaction that moved a message to a stage"
        );
        metrics::describe_gauge!(
            Self::HOME_FAILED,
            metrics::Unit::Count,
            "Whether the home contract of a domain is in a failed state"
        );
        metrics::describe_gauge!(
            Self::RPC_HEALTHY,
            metrics::Unit::Count,
            "Whether the RPC endpoint of a domain answered the last health check"
        );
        metrics::describe_gauge!(
            Self::BLOCKS_BEHIND_TIP,
            metrics::Unit::Count,
            "Blocks between the chain tip and the last indexed block"
        );
    }

    fn zero(domain: DomainId) {
        metrics::gauge!(Self::HOME_FAILED, "domain" => domain.to_string()).set(0.0);
        metrics::gauge!(Self::RPC_HEALTHY, "domain" => domain.to_string()).set(0.0);
        metrics::gauge!(Self::BLOCKS_BEHIND_TIP, "domain" => domain.to_string()).set(0.0);
        Self::record_stage_counts(domain, &StageCounts::default());
    }

    pub(crate) fn record_stage_counts(origin: DomainId, counts: &StageCounts) {
        for stage in MessageStage::ALL {
            metrics::gauge!(
                Self::MESSAGES,
                "origin" => origin.to_string(),
                "stage" => stage.to_string()
            )
            .set(counts.get(stage) as f64);
        }
    }

    /// Records a transition of `message` to `stage`, with its latency and gas where known.
    pub(crate) fn record_transition(message: &NomadMessage, stage: MessageStage) {
        metrics::counter!(Self::TRANSITIONS_TOTAL, "stage" => stage.to_string()).increment(1);

        let (latency, record) = match stage {
            MessageStage::Dispatched => (None, Some(&message.dispatched)),
            MessageStage::Updated => (message.to_update(), message.updated.as_ref()),
            MessageStage::Relayed => (message.to_relay(), message.relayed.as_ref()),
            MessageStage::Received => (message.to_receive(), message.received.as_ref()),
            MessageStage::Processed => (message.to_process(), message.processed.as_ref()),
        };
        if let Some(ms) = latency {
            metrics::histogram!(Self::STAGE_LATENCY_SECONDS, "stage" => stage.to_string())
                .record(ms as f64 / 1000.0);
        }
        if let Some(record) = record {
            metrics::histogram!(Self::STAGE_GAS_USED, "stage" => stage.to_string())
                .record(u64::try_from(record.gas_used).unwrap_or(u64::MAX) as f64);
        }
    }
}

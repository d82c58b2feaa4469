//! Shared CLI plumbing for the Nomad indexer binaries: logging flags and subscriber setup,
//! Prometheus exporter flags and clap styling.

mod log;
pub use log::{FileLogConfig, LogArgs, LogConfig, LogRotation, StdoutLogConfig};

mod metrics;
pub use metrics::{MetricsArgs, MetricsError};

mod styles;
pub use styles::cli_styles;

mod tracing;
pub use tracing::{LogFormat, init_test_tracing};

//! Prometheus exporter flags.

use clap::Args;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Failed to start the exporter.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The recorder or its HTTP listener could not be installed.
    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Metrics arguments shared by every binary.
#[derive(Args, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Serves Prometheus metrics over HTTP.
    #[arg(long = "metrics.enabled", global = true, env = "METRICS_ENABLED")]
    pub enabled: bool,

    /// Listen address of the metrics server.
    #[arg(long = "metrics.addr", global = true, default_value = "0.0.0.0", env = "METRICS_ADDR")]
    pub addr: IpAddr,

    /// Listen port of the metrics server.
    #[arg(long = "metrics.port", global = true, default_value_t = 9090, env = "METRICS_PORT")]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Address the exporter listens on.
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Installs the global Prometheus recorder and its HTTP listener when enabled.
    pub fn init_metrics(&self) -> Result<(), MetricsError> {
        if self.enabled {
            PrometheusBuilder::new().with_http_listener(self.socket_addr()).install()?;
        }
        Ok(())
    }
}

//! Contains the indexer CLI.

use crate::flags::IndexerArgs;
use anyhow::{Context as _, Result};
use clap::Parser;
use nomad_cli::{LogArgs, LogConfig, MetricsArgs, cli_styles};
use nomad_indexer_core::{Orchestrator, RpcChainClient};
use nomad_indexer_storage::{KeyValueStore, MemoryStore};
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Nomad cross-chain message indexer.
#[derive(Parser, Debug)]
#[command(
    name = "nomad-indexer",
    about = "Nomad cross-chain message indexer",
    styles = cli_styles()
)]
pub struct Cli {
    /// Global args
    #[command(flatten)]
    pub global: LogArgs,

    /// Prometheus metrics args
    #[command(flatten)]
    pub metrics: MetricsArgs,

    /// Indexer args
    #[command(flatten)]
    pub indexer: IndexerArgs,
}

impl Cli {
    /// Runs the CLI.
    pub fn run(self) -> Result<()> {
        self.init_logs(&self.global)?;

        Self::run_until_ctrl_c(async move {
            self.metrics.init_metrics()?;
            let config = Arc::new(self.indexer.init_config().await?);

            let store = Arc::new(match &self.indexer.snapshot {
                Some(path) => MemoryStore::open(path)
                    .await
                    .with_context(|| format!("Failed to open snapshot '{}'", path.display()))?,
                None => MemoryStore::default(),
            });

            let mut clients = BTreeMap::new();
            for domain in &config.domains {
                let client = RpcChainClient::new(domain)
                    .with_context(|| format!("Failed to create client for {}", domain.name))?;
                clients.insert(domain.id, client);
            }

            let cancellation = CancellationToken::new();
            let mut orchestrator =
                Orchestrator::new(config, store.clone(), clients, cancellation.clone())?;
            orchestrator.init().await.context("Failed to initialise orchestrator")?;

            let handle = orchestrator.handle();
            for force in &self.indexer.force_from {
                let block = handle.force_from(force.domain, force.block)?;
                info!(target: "indexer", domain = force.domain, block, "Forced start block");
            }

            let mut running = tokio::spawn(orchestrator.run());
            tokio::select! {
                res = &mut running => res?,
                _ = tokio::signal::ctrl_c() => {
                    info!(target: "indexer", "Ctrl+C received, stopping after the current pass...");
                    cancellation.cancel();
                    running.await?;
                }
            }

            for status in handle.status().await? {
                info!(
                    target: "indexer",
                    domain = status.domain,
                    last_indexed_block = status.last_indexed_block,
                    messages = status.message_count,
                    "Final status"
                );
            }
            if let Err(err) = store.flush().await {
                warn!(target: "indexer", %err, "Failed to flush store on shutdown");
            }
            info!(target: "indexer", "Indexer shut down gracefully.");
            Ok(())
        })
    }

    /// Run until the future completes.
    pub fn run_until_ctrl_c<F>(fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let rt = Self::tokio_runtime().map_err(|e| anyhow::anyhow!(e))?;
        rt.block_on(fut)
    }

    /// Creates a new default tokio multi-thread [`Runtime`](tokio::runtime::Runtime) with all
    /// features enabled
    pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    }

    /// Initializes the telemetry stack.
    pub fn init_logs(&self, args: &LogArgs) -> Result<()> {
        let filter = tracing_subscriber::EnvFilter::from_default_env();
        LogConfig::new(args.clone()).init_tracing_subscriber(Some(filter))?;
        Ok(())
    }
}

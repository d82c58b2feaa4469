use anyhow::{Context as _, Result, anyhow};
use clap::Args;
use nomad_indexer_core::IndexerConfig;
use nomad_indexer_types::DomainId;
use std::{path::PathBuf, str::FromStr};

/// Start block override for one domain, written `domain=block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceFrom {
    /// Domain id.
    pub domain: DomainId,
    /// Block to restart from.
    pub block: u64,
}

impl FromStr for ForceFrom {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (domain, block) =
            s.split_once('=').ok_or_else(|| anyhow!("expected `domain=block`, got '{s}'"))?;
        Ok(Self {
            domain: domain.trim().parse().with_context(|| format!("invalid domain '{domain}'"))?,
            block: block.trim().parse().with_context(|| format!("invalid block '{block}'"))?,
        })
    }
}

/// Indexer configuration arguments.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct IndexerArgs {
    /// Path to the JSON configuration listing the domains to index.
    #[arg(long, short = 'c', env = "INDEXER_CONFIG")]
    pub config: PathBuf,

    /// Blocks fetched per batch, for domains without their own override.
    #[arg(long = "batch-size", env = "BATCH_SIZE")]
    pub batch_size: Option<u64>,

    /// Pause between indexing passes, in milliseconds.
    #[arg(long = "poll-interval", env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Shuffles events with this seed before applying them. Testing only.
    #[arg(long = "chaos-seed", env = "CHAOS_SEED")]
    pub chaos_seed: Option<u64>,

    /// JSON file the store is restored from and flushed to. In memory only when unset.
    #[arg(long, env = "SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Restarts a domain from a block, e.g. `--force-from 6648936=15000000`. Repeatable.
    #[arg(long = "force-from", value_name = "DOMAIN=BLOCK")]
    pub force_from: Vec<ForceFrom>,
}

impl IndexerArgs {
    /// Reads the configuration file and applies flag and `<NAME>_RPC` overrides.
    pub async fn init_config(&self) -> Result<IndexerConfig> {
        let raw = tokio::fs::read_to_string(&self.config)
            .await
            .with_context(|| format!("Failed to read '{}'", self.config.display()))?;
        let config: IndexerConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse JSON from '{}'", self.config.display()))?;
        self.apply(config, |key| std::env::var(key).ok())
    }

    fn apply<F>(&self, mut config: IndexerConfig, env: F) -> Result<IndexerConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(poll_interval) = self.poll_interval {
            config.poll_interval_ms = poll_interval;
        }
        if self.chaos_seed.is_some() {
            config.chaos_seed = self.chaos_seed;
        }
        config.apply_rpc_overrides(env);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;
    use std::{collections::HashMap, io::Write};

    #[derive(Parser, Debug)]
    struct MockCommand {
        #[command(flatten)]
        indexer: IndexerArgs,
    }

    const CONFIG: &str = r#"{
        "domains": [
            {
                "id": 6648936,
                "name": "ethereum",
                "rpcs": ["http://localhost:8545"],
                "deployHeight": 13983724,
                "home": "0x92d3404a7e6c91455bbd81475cd9fad96acff4c8",
                "replicas": { "1650811245": "0x5bae47bf29f4e9b1e275c0b427b84c4daa30033a" }
            },
            {
                "id": 1650811245,
                "name": "moonbeam",
                "rpcs": ["http://localhost:9933"],
                "deployHeight": 171256,
                "home": "0x8f184d6aa1977fd2f9d9024317d0ea5cf5815b6f",
                "replicas": { "6648936": "0x7f58bb8311db968ab110889f2dfa04ab7e8e831b" },
                "batchSize": 500
            }
        ],
        "governorDomain": 6648936
    }"#;

    #[test]
    fn test_indexer_args_required_only() {
        let args = MockCommand::parse_from(["test", "--config", "indexer.json"]).indexer;
        assert_eq!(args.config, PathBuf::from("indexer.json"));
        assert_eq!(args.batch_size, None);
        assert_eq!(args.snapshot, None);
        assert!(args.force_from.is_empty());
    }

    #[test]
    fn test_indexer_args_all() {
        let args = MockCommand::parse_from([
            "test",
            "-c",
            "indexer.json",
            "--batch-size",
            "100",
            "--poll-interval",
            "1000",
            "--chaos-seed",
            "7",
            "--snapshot",
            "/tmp/store.json",
            "--force-from",
            "6648936=15000000",
            "--force-from",
            "1650811245=200000",
        ])
        .indexer;
        assert_eq!(args.batch_size, Some(100));
        assert_eq!(args.poll_interval, Some(1000));
        assert_eq!(args.chaos_seed, Some(7));
        assert_eq!(args.snapshot, Some(PathBuf::from("/tmp/store.json")));
        assert_eq!(
            args.force_from,
            vec![
                ForceFrom { domain: 6648936, block: 15_000_000 },
                ForceFrom { domain: 1650811245, block: 200_000 },
            ]
        );
    }

    #[rstest]
    #[case::missing_separator("6648936")]
    #[case::bad_domain("eth=5")]
    #[case::bad_block("6648936=latest")]
    fn test_force_from_invalid(#[case] value: &str) {
        assert!(value.parse::<ForceFrom>().is_err());
        assert!(MockCommand::try_parse_from(["test", "-c", "x", "--force-from", value]).is_err());
    }

    #[tokio::test]
    async fn test_init_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap();

        let args = MockCommand::parse_from(["test", "-c", path]).indexer;
        let config = args.init_config().await.unwrap();
        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.governor_domain, 6648936);
        assert_eq!(config.domains[1].batch_size, Some(500));
    }

    #[tokio::test]
    async fn test_init_config_missing_file() {
        let args = MockCommand::parse_from(["test", "-c", "/nonexistent/indexer.json"]).indexer;
        let err = args.init_config().await.unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_flags_and_env_override_file() {
        let args = MockCommand::parse_from([
            "test",
            "-c",
            "indexer.json",
            "--batch-size",
            "250",
            "--chaos-seed",
            "3",
        ])
        .indexer;
        let env = HashMap::from([("MOONBEAM_RPC", "http://a,http://b")]);
        let config = args
            .apply(serde_json::from_str(CONFIG).unwrap(), |key| {
                env.get(key).map(|v| v.to_string())
            })
            .unwrap();

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.chaos_seed, Some(3));
        assert_eq!(config.domains[1].rpcs, vec!["http://a".to_string(), "http://b".to_string()]);
        assert_eq!(config.domains[0].rpcs, vec!["http://localhost:8545".to_string()]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let args = MockCommand::parse_from(["test", "-c", "indexer.json", "--batch-size", "0"])
            .indexer;
        assert!(args.apply(serde_json::from_str(CONFIG).unwrap(), |_| None).is_err());
    }
}

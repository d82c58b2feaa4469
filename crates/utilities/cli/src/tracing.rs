//! [`tracing_subscriber`] setup.

use crate::{FileLogConfig, LogConfig, LogRotation};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::MakeWriter,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
};

const LOG_FILE_PREFIX: &str = "nomad-indexer.log";

/// The format of the logs.
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    /// Full format (default).
    #[default]
    Full,
    /// JSON format.
    Json,
    /// Pretty format.
    Pretty,
    /// Compact format.
    Compact,
}

impl LogFormat {
    fn layer<S, W>(self, writer: W) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: ::tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = tracing_subscriber::fmt::layer().with_writer(writer);
        match self {
            Self::Full => layer.boxed(),
            Self::Json => layer.json().boxed(),
            Self::Pretty => layer.pretty().boxed(),
            Self::Compact => layer.compact().boxed(),
        }
    }
}

impl FileLogConfig {
    fn appender(&self) -> tracing_appender::rolling::RollingFileAppender {
        let directory = self.directory_path.clone();
        match self.rotation {
            LogRotation::Minutely => {
                tracing_appender::rolling::minutely(directory, LOG_FILE_PREFIX)
            }
            LogRotation::Hourly => tracing_appender::rolling::hourly(directory, LOG_FILE_PREFIX),
            LogRotation::Daily => tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX),
            LogRotation::Never => tracing_appender::rolling::never(directory, LOG_FILE_PREFIX),
        }
    }
}

impl LogConfig {
    /// Installs the global subscriber.
    ///
    /// `env_filter` defaults to `RUST_LOG`; the configured level is added on top of it.
    pub fn init_tracing_subscriber(
        &self,
        env_filter: Option<EnvFilter>,
    ) -> Result<(), TryInitError> {
        let file_layer =
            self.file_logs.as_ref().map(|file_logs| file_logs.format.layer(file_logs.appender()));
        let stdout_layer = self
            .stdout_logs
            .as_ref()
            .map(|stdout_logs| stdout_logs.format.layer(std::io::stdout));

        let env_filter = env_filter
            .unwrap_or_else(EnvFilter::from_default_env)
            .add_directive(self.global_level.into());

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
    }
}

/// Installs a default subscriber for tests. Later calls are no-ops.
pub fn init_test_tracing() {
    let _ = LogConfig::default().init_tracing_subscriber(None);
}

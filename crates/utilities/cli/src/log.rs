//! Logging flags.

use crate::LogFormat;
use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// When the log file is rolled over.
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum LogRotation {
    /// Every minute.
    Minutely,
    /// Every hour.
    Hourly,
    /// Every day.
    #[default]
    Daily,
    /// Never.
    Never,
}

/// Logging arguments shared by every binary.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LogArgs {
    /// Verbosity. `-v` logs errors only, `-vvv` info (default), `-vvvvv` everything.
    #[arg(
        short = 'v',
        long = "verbosity",
        action = ArgAction::Count,
        default_value_t = 3,
        global = true
    )]
    pub level: u8,

    /// Silences stdout logs.
    #[arg(long = "logs.stdout.quiet", short = 'q', global = true)]
    pub stdout_quiet: bool,

    /// Format of stdout logs.
    #[arg(long = "logs.stdout.format", default_value = "full", global = true)]
    pub stdout_format: LogFormat,

    /// Directory for log files. File logging is off unless set.
    #[arg(long = "logs.file.directory", env = "LOG_DIRECTORY", global = true)]
    pub file_directory: Option<PathBuf>,

    /// Format of file logs.
    #[arg(long = "logs.file.format", default_value = "full", global = true)]
    pub file_format: LogFormat,

    /// Rotation of file logs.
    #[arg(long = "logs.file.rotation", default_value = "daily", global = true)]
    pub file_rotation: LogRotation,
}

impl Default for LogArgs {
    fn default() -> Self {
        Self {
            level: 3,
            stdout_quiet: false,
            stdout_format: LogFormat::Full,
            file_directory: None,
            file_format: LogFormat::Full,
            file_rotation: LogRotation::Daily,
        }
    }
}

/// Stdout logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdoutLogConfig {
    /// Output format.
    pub format: LogFormat,
}

/// File logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogConfig {
    /// Directory holding the rolled files.
    pub directory_path: PathBuf,
    /// Output format.
    pub format: LogFormat,
    /// Rotation policy.
    pub rotation: LogRotation,
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Most verbose level emitted.
    pub global_level: LevelFilter,
    /// Stdout logging, if enabled.
    pub stdout_logs: Option<StdoutLogConfig>,
    /// File logging, if enabled.
    pub file_logs: Option<FileLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LogArgs::default())
    }
}

impl LogConfig {
    /// Resolves `args`.
    pub fn new(args: LogArgs) -> Self {
        let global_level = match args.level {
            0 => LevelFilter::OFF,
            1 => LevelFilter::ERROR,
            2 => LevelFilter::WARN,
            3 => LevelFilter::INFO,
            4 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        let stdout_logs =
            (!args.stdout_quiet).then_some(StdoutLogConfig { format: args.stdout_format });
        let file_logs = args.file_directory.map(|directory_path| FileLogConfig {
            directory_path,
            format: args.file_format,
            rotation: args.file_rotation,
        });
        Self { global_level, stdout_logs, file_logs }
    }
}

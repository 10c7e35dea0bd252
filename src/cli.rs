use std::path::PathBuf;

use clap::{Parser, Subcommand};
use std::fs::read_to_string;
use thiserror::Error;

use crate::config::Document;

/// shoalsink streams Kafka-compatible topics into a sharded, replicated
/// ClickHouse cluster.
#[derive(Parser, Debug)]
#[command(name = "shoalsink", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long, default_value = "shoalsink.toml")]
    pub config: PathBuf,

    /// Log level, e.g. "info", "debug", "shoalsink=trace". Falls back to RUST_LOG.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Comma-separated log sinks: "stdout", "stderr", or a file path.
    #[arg(long, value_delimiter = ',', default_value = "stdout")]
    pub log_paths: Vec<String>,

    /// How often to push metrics, in seconds.
    #[arg(long)]
    pub push_interval: Option<u64>,

    /// Kafka SASL username, falls back to $SHOALSINK_KAFKA_USERNAME.
    #[arg(long, env = "SHOALSINK_KAFKA_USERNAME")]
    pub kafka_username: Option<String>,

    /// Kafka SASL password, falls back to $SHOALSINK_KAFKA_PASSWORD.
    #[arg(long, env = "SHOALSINK_KAFKA_PASSWORD")]
    pub kafka_password: Option<String>,

    /// ClickHouse username, falls back to $SHOALSINK_CLICKHOUSE_USERNAME.
    #[arg(long, env = "SHOALSINK_CLICKHOUSE_USERNAME")]
    pub clickhouse_username: Option<String>,

    /// ClickHouse password, falls back to $SHOALSINK_CLICKHOUSE_PASSWORD.
    #[arg(long, env = "SHOALSINK_CLICKHOUSE_PASSWORD")]
    pub clickhouse_password: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the ingestion pipeline.
    Run {
        /// Override every configured group's buffer size.
        #[arg(long)]
        buffer_size: Option<usize>,

        /// Override how often buffers flush, in seconds.
        #[arg(long)]
        flush_interval_sec: Option<u64>,

        /// Override the worker count per ClickHouse shard.
        #[arg(long)]
        max_open_conns: Option<usize>,
    },

    /// Validate a configuration file without starting anything.
    Configcheck {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum ConfigCheckError {
    #[error("I/O error on \"{0}\": {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("TOML parse error in \"{0}\": {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("{0}")]
    Invalid(#[from] crate::config::error::Error),
}

/// Parse and cross-validate a configuration file, without touching the
/// global config singleton.
pub fn config_check(path: PathBuf) -> Result<(), ConfigCheckError> {
    let source =
        read_to_string(&path).map_err(|err| ConfigCheckError::Io(path.clone(), err))?;
    let document: Document =
        toml::from_str(&source).map_err(|err| ConfigCheckError::Parse(path.clone(), err))?;
    document.check()?;
    Ok(())
}

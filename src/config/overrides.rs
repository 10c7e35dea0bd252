//! CLI overrides applied on top of the loaded configuration document.

/// Settings the CLI is allowed to override without touching the file on disk.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Override every group's buffer size.
    pub buffer_size: Option<usize>,
    /// Override every group's flush interval, in seconds.
    pub flush_interval_sec: Option<u64>,
    /// Override the metrics push interval, in seconds.
    pub push_interval: Option<u64>,
    /// Override `clickhouse.max_open_conns`.
    pub max_open_conns: Option<usize>,
    /// Override `kafka.sasl.username`, typically sourced from an env var.
    pub kafka_username: Option<String>,
    /// Override `kafka.sasl.password`, typically sourced from an env var.
    pub kafka_password: Option<String>,
    /// Override `clickhouse.username`, typically sourced from an env var.
    pub clickhouse_username: Option<String>,
    /// Override `clickhouse.password`, typically sourced from an env var.
    pub clickhouse_password: Option<String>,
}

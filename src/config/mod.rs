//! Configuration.

pub mod error;
pub mod overrides;
pub mod remote;

use error::Error;
pub use overrides::Overrides;
use parking_lot::Mutex;

use std::fs::read_to_string;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

static CONFIG: Lazy<ArcSwap<Document>> = Lazy::new(|| ArcSwap::from_pointee(Document::default()));

static LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Current configuration.
pub fn config() -> Arc<Document> {
    CONFIG.load().clone()
}

/// Load the configuration document from disk.
pub fn load(path: &PathBuf) -> Result<Document, Error> {
    let document = Document::load(path)?;
    set(document)
}

pub fn set(document: Document) -> Result<Document, Error> {
    let _lock = LOCK.lock();
    document.check()?;
    CONFIG.store(Arc::new(document.clone()));
    Ok(document)
}

/// Apply CLI-sourced overrides on top of whatever is currently loaded.
pub fn overrides(overrides: Overrides) {
    let _lock = LOCK.lock();
    let mut document = (*config()).clone();
    let Overrides {
        buffer_size,
        flush_interval_sec,
        push_interval,
        max_open_conns,
        kafka_username,
        kafka_password,
        clickhouse_username,
        clickhouse_password,
    } = overrides;

    if let Some(buffer_size) = buffer_size {
        for group in document.groups.iter_mut() {
            group.buffer_size = buffer_size;
        }
    }

    if let Some(flush_interval_sec) = flush_interval_sec {
        for group in document.groups.iter_mut() {
            group.flush_interval_sec = flush_interval_sec;
        }
    }

    if let Some(push_interval) = push_interval {
        document.general.push_interval = push_interval;
    }

    if let Some(max_open_conns) = max_open_conns {
        document.clickhouse.max_open_conns = max_open_conns;
    }

    if let Some(kafka_username) = kafka_username {
        document.kafka.sasl.username = Some(kafka_username);
    }

    if let Some(kafka_password) = kafka_password {
        document.kafka.sasl.password = Some(kafka_password);
    }

    if let Some(clickhouse_username) = clickhouse_username {
        document.clickhouse.username = clickhouse_username;
    }

    if let Some(clickhouse_password) = clickhouse_password {
        document.clickhouse.password = clickhouse_password;
    }

    CONFIG.store(Arc::new(document));
}

/// The configuration document, loaded from `--local-cfg-file` (TOML) or
/// pushed by a remote config manager.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub kafka: Kafka,
    #[serde(default)]
    pub clickhouse: Clickhouse,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl Document {
    /// Load configuration from disk, or use defaults if the file is missing.
    pub fn load(path: &PathBuf) -> Result<Self, Error> {
        let document: Document = if let Ok(source) = read_to_string(path) {
            let document = toml::from_str(&source)?;
            info!("loaded \"{}\"", path.display());
            document
        } else {
            warn!(
                "\"{}\" doesn't exist, loading defaults instead",
                path.display()
            );
            Document::default()
        };

        Ok(document)
    }

    /// Validate cross-references between groups and tasks.
    pub fn check(&self) -> Result<(), Error> {
        if self.clickhouse.hosts.is_empty() {
            return Err(Error::EmptyClickhouseHosts);
        }

        for group in &self.groups {
            if group.topics.is_empty() {
                return Err(Error::EmptyGroup(group.name.clone()));
            }
        }

        for task in &self.tasks {
            if !self.topic_in_any_group(&task.topic) {
                warn!(
                    "task \"{}\" references topic \"{}\" that isn't consumed by any group",
                    task.name, task.topic
                );
            }
        }

        Ok(())
    }

    fn topic_in_any_group(&self, topic: &str) -> bool {
        self.groups.iter().any(|g| g.topics.iter().any(|t| t == topic))
    }

    /// Tasks belonging to a given topic.
    pub fn tasks_for_topic(&self, topic: &str) -> Vec<TaskConfig> {
        self.tasks
            .iter()
            .filter(|t| t.topic == topic)
            .cloned()
            .collect()
    }

    /// Group by name.
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// Process-wide settings that aren't specific to Kafka or ClickHouse.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// How often to push metrics, in seconds.
    #[serde(default = "General::push_interval")]
    pub push_interval: u64,
    /// Host the OpenMetrics HTTP server binds to. Falls back to an outbound-IP probe if unset.
    pub metrics_host: Option<String>,
    /// Port the OpenMetrics HTTP server binds to.
    #[serde(default = "General::metrics_port")]
    pub metrics_port: u16,
    /// Prefix prepended to every exposed metric name.
    pub metrics_namespace: Option<String>,
    /// Shutdown grace period.
    #[serde(default = "General::shutdown_timeout")]
    pub shutdown_timeout: u64,
    /// Tokio worker thread count. `0` runs a current-thread runtime instead
    /// of a multi-threaded one.
    #[serde(default)]
    pub workers: usize,
}

impl Default for General {
    fn default() -> Self {
        Self {
            push_interval: Self::push_interval(),
            metrics_host: None,
            metrics_port: Self::metrics_port(),
            metrics_namespace: None,
            shutdown_timeout: Self::shutdown_timeout(),
            workers: 0,
        }
    }
}

impl General {
    fn push_interval() -> u64 {
        10
    }

    fn metrics_port() -> u16 {
        9090
    }

    fn shutdown_timeout() -> u64 {
        30_000
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }
}

/// Message bus connection settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Kafka {
    /// Bootstrap brokers, e.g. `["broker1:9092", "broker2:9092"]`.
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub tls: KafkaTls,
    #[serde(default)]
    pub sasl: KafkaSasl,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct KafkaTls {
    #[serde(default)]
    pub enable: bool,
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub endpoint_ident_algo: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct KafkaSasl {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub gssapi: Option<Gssapi>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaslMechanism {
    #[default]
    Plain,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
    Gssapi,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Gssapi {
    pub service_name: Option<String>,
    pub kerberos_config_path: Option<PathBuf>,
    #[serde(default)]
    pub auth_type: GssapiAuthType,
    pub username: Option<String>,
    pub realm: Option<String>,
    pub password: Option<String>,
    pub keytab_path: Option<PathBuf>,
    #[serde(default)]
    pub disable_pafxfast: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Copy)]
#[serde(rename_all = "snake_case")]
pub enum GssapiAuthType {
    #[default]
    Password,
    Keytab,
}

/// Destination database connection settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Clickhouse {
    /// One entry per shard; each entry lists that shard's replicas.
    #[serde(default)]
    pub hosts: Vec<Vec<String>>,
    #[serde(default = "Clickhouse::port")]
    pub port: u16,
    #[serde(default = "Clickhouse::db")]
    pub db: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default = "Clickhouse::max_open_conns")]
    pub max_open_conns: usize,
}

impl Clickhouse {
    fn port() -> u16 {
        9000
    }

    fn db() -> String {
        "default".into()
    }

    fn max_open_conns() -> usize {
        4
    }

    /// Number of shards configured.
    pub fn shard_count(&self) -> usize {
        self.hosts.len()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Native,
    Http,
}

/// A consumer group: a set of topics consumed together, sharing offsets and a cadence.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "GroupConfig::buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "GroupConfig::flush_interval_sec")]
    pub flush_interval_sec: u64,
    #[serde(default)]
    pub earliest: bool,
}

impl GroupConfig {
    fn buffer_size() -> usize {
        1000
    }

    fn flush_interval_sec() -> u64 {
        5
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_sec)
    }

    /// `fetch.max.bytes` sized from the buffer, so a single fetch can hold a full batch.
    pub fn fetch_max_bytes(&self) -> usize {
        (self.buffer_size * 2048).max(1024 * 1024)
    }
}

/// A task: one topic routed into one ClickHouse table, with a record-level transform.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,
    pub topic: String,
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub parser: ParserKind,
    pub timezone: Option<String>,
    pub time_unit: Option<String>,
    pub csv_delimiter: Option<char>,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    #[default]
    Fastjson,
    Gjson,
    Csv,
}

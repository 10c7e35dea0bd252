//! Top-level supervisor: owns the live configuration, and reconciles
//! running consumers/tasks against it on every reload.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Clickhouse, Document, GroupConfig};
use crate::db::cluster::ClusterPool;
use crate::db::connection::ConnectionOpener;

use super::bus::BusClient;
use super::commit::CommitCoordinator;
use super::consumer::Consumer;
use super::task_service::TaskService;
use super::Error;

/// Builds a bus client for a group. The production path connects to Kafka;
/// tests substitute an in-memory bus.
pub trait BusFactory: Send + Sync {
    fn connect(&self, document: &Document, group: &GroupConfig) -> Result<Arc<dyn BusClient>, Error>;
}

/// `RdKafkaBus` factory, the only production implementation.
pub struct RdKafkaBusFactory;

impl BusFactory for RdKafkaBusFactory {
    fn connect(&self, document: &Document, group: &GroupConfig) -> Result<Arc<dyn BusClient>, Error> {
        let bus = super::bus::RdKafkaBus::connect(document, group)?;
        Ok(Arc::new(bus))
    }
}

struct GroupEntry {
    group: GroupConfig,
    consumer: Arc<Consumer>,
    task: JoinHandle<Result<(), Error>>,
}

pub struct Sinker {
    cluster: Arc<ClusterPool>,
    bus_factory: Arc<dyn BusFactory>,
    commit_tx: mpsc::Sender<super::commit::CommitIntent>,
    coordinator_task: JoinHandle<()>,
    document: Mutex<Arc<Document>>,
    groups: Mutex<HashMap<String, GroupEntry>>,
    cancel: CancellationToken,
}

impl Sinker {
    pub fn new(opener: Arc<dyn ConnectionOpener>, bus_factory: Arc<dyn BusFactory>) -> Self {
        let (commit_tx, commit_rx) = mpsc::channel(64);
        let coordinator = Arc::new(CommitCoordinator::new(commit_rx));
        let coordinator_task = tokio::spawn(async move { coordinator.run().await });

        Self {
            cluster: Arc::new(ClusterPool::empty(opener)),
            bus_factory,
            commit_tx,
            coordinator_task,
            document: Mutex::new(Arc::new(Document::default())),
            groups: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn document(&self) -> Arc<Document> {
        self.document.lock().clone()
    }

    /// Reconcile running state against `document`: rebuild the cluster pool
    /// if ClickHouse settings changed, then start/restart/stop consumer
    /// groups so the running set matches `document.groups` exactly.
    pub async fn reload(&self, document: Document) -> Result<(), Error> {
        document.check()?;

        let previous = self.document.lock().clone();
        if clickhouse_changed(&previous.clickhouse, &document.clickhouse) {
            self.cluster.init(&document.clickhouse, self.cancel.clone()).await?;
        }
        // A bus-wide setting (brokers, TLS, SASL) changed: no group's existing
        // connection is usable anymore, so every group restarts regardless of
        // its own config.
        let bus_changed = kafka_changed(&previous.kafka, &document.kafka);

        let mut groups = self.groups.lock();
        let mut wanted = HashSet::new();

        for group in &document.groups {
            wanted.insert(group.name.clone());

            let live_update = match groups.get(&group.name) {
                Some(entry) => !bus_changed && !needs_restart(&entry.group, group),
                None => false,
            };
            if live_update {
                let entry = groups.get_mut(&group.name).expect("checked above");
                if entry.group != *group {
                    info!("group \"{}\" buffer/flush settings changed, applying live", group.name);
                    entry.consumer.update_group(group);
                    entry.group = group.clone();
                }
                continue;
            }

            if let Some(stale) = groups.remove(&group.name) {
                info!("group \"{}\" topics or bus settings changed, restarting", group.name);
                retire(stale);
            }

            let task_services: Vec<Arc<TaskService>> = group
                .topics
                .iter()
                .flat_map(|topic| document.tasks_for_topic(topic))
                .map(|config| Arc::new(TaskService::new(&config, self.cluster.clone())))
                .collect();

            if task_services.is_empty() {
                warn!("group \"{}\" has no tasks configured for its topics", group.name);
            }

            let bus = self.bus_factory.connect(&document, group)?;
            let consumer = Arc::new(Consumer::new(
                group.name.clone(),
                group.clone(),
                bus,
                task_services,
                self.cluster.num_shards().max(1),
                self.commit_tx.clone(),
            ));

            let runner = consumer.clone();
            let task = tokio::spawn(async move { runner.run().await });

            groups.insert(
                group.name.clone(),
                GroupEntry {
                    group: group.clone(),
                    consumer,
                    task,
                },
            );
        }

        let stale_names: Vec<String> = groups
            .keys()
            .filter(|name| !wanted.contains(*name))
            .cloned()
            .collect();
        for name in stale_names {
            if let Some(entry) = groups.remove(&name) {
                info!("group \"{}\" no longer configured, stopping", name);
                retire(entry);
            }
        }

        drop(groups);
        *self.document.lock() = Arc::new(document);
        Ok(())
    }

    pub fn running_groups(&self) -> Vec<String> {
        self.groups.lock().keys().cloned().collect()
    }

    /// Cancel every consumer, give them `timeout` to drain, then tear down
    /// the cluster pool and commit coordinator.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();

        let entries: Vec<GroupEntry> = {
            let mut groups = self.groups.lock();
            groups.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &entries {
            entry.consumer.cancel();
        }

        for entry in entries {
            if tokio::time::timeout(timeout, entry.task).await.is_err() {
                warn!("group \"{}\" did not stop within the shutdown timeout", entry.group.name);
            }
        }

        self.cluster.close();
        self.coordinator_task.abort();
    }
}

fn clickhouse_changed(a: &Clickhouse, b: &Clickhouse) -> bool {
    serde_json::to_string(a).ok() != serde_json::to_string(b).ok()
}

fn kafka_changed(a: &crate::config::Kafka, b: &crate::config::Kafka) -> bool {
    serde_json::to_string(a).ok() != serde_json::to_string(b).ok()
}

/// Only a topic-set or join-mode change requires tearing the consumer down:
/// both affect what gets subscribed/assigned at join time. Buffer size and
/// flush interval take effect live via `Consumer::update_group`.
fn needs_restart(old: &GroupConfig, new: &GroupConfig) -> bool {
    old.topics != new.topics || old.earliest != new.earliest
}

/// Cancel a retired group and let it finish its rebalance-safe drain in the
/// background, rather than blocking `reload` on it or aborting it mid-write.
fn retire(entry: GroupEntry) {
    entry.consumer.cancel();
    tokio::spawn(async move {
        if let Err(err) = entry.task.await {
            warn!(
                "group \"{}\" task ended with a join error during teardown: {}",
                entry.group.name, err
            );
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{GroupConfig, ParserKind, TaskConfig};
    use crate::db::connection::test::FakeOpener;
    use crate::ingest::bus::test::FakeBus;

    struct FakeBusFactory;

    impl BusFactory for FakeBusFactory {
        fn connect(&self, _document: &Document, _group: &GroupConfig) -> Result<Arc<dyn BusClient>, Error> {
            Ok(Arc::new(FakeBus::default()))
        }
    }

    fn document(shards: usize, group_name: &str, buffer_size: usize) -> Document {
        Document {
            clickhouse: Clickhouse {
                hosts: (0..shards).map(|i| vec![format!("ch{}", i)]).collect(),
                max_open_conns: 1,
                ..Clickhouse::default()
            },
            groups: vec![GroupConfig {
                name: group_name.into(),
                topics: vec!["events".into()],
                buffer_size,
                ..GroupConfig::default()
            }],
            tasks: vec![TaskConfig {
                name: "events".into(),
                topic: "events".into(),
                table_name: "events".into(),
                columns: vec!["message".into()],
                parser: ParserKind::Fastjson,
                ..TaskConfig::default()
            }],
            ..Document::default()
        }
    }

    fn sinker() -> Sinker {
        Sinker::new(Arc::new(FakeOpener::default()), Arc::new(FakeBusFactory))
    }

    #[tokio::test]
    async fn test_reload_starts_configured_groups() {
        let sinker = sinker();
        sinker.reload(document(2, "g1", 10)).await.unwrap();
        assert_eq!(sinker.running_groups(), vec!["g1".to_string()]);
        sinker.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_reload_applies_buffer_size_change_live_without_restart() {
        let sinker = sinker();
        sinker.reload(document(2, "g1", 10)).await.unwrap();
        let consumer_before = {
            let groups = sinker.groups.lock();
            groups["g1"].consumer.clone()
        };

        sinker.reload(document(2, "g1", 20)).await.unwrap();
        assert_eq!(sinker.running_groups(), vec!["g1".to_string()]);

        let consumer_after = {
            let groups = sinker.groups.lock();
            groups["g1"].consumer.clone()
        };
        assert!(
            Arc::ptr_eq(&consumer_before, &consumer_after),
            "a buffer-size-only change must not tear down the running consumer"
        );
        assert_eq!(consumer_after.buffer_size_for_test(), 20);
        sinker.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_reload_restarts_group_on_topic_change() {
        let sinker = sinker();
        sinker.reload(document(2, "g1", 10)).await.unwrap();
        let consumer_before = {
            let groups = sinker.groups.lock();
            groups["g1"].consumer.clone()
        };

        let mut retopic = document(2, "g1", 10);
        retopic.groups[0].topics = vec!["other".into()];
        sinker.reload(retopic).await.unwrap();

        let consumer_after = {
            let groups = sinker.groups.lock();
            groups["g1"].consumer.clone()
        };
        assert!(
            !Arc::ptr_eq(&consumer_before, &consumer_after),
            "a topic change must restart the consumer"
        );
        sinker.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_reload_stops_removed_groups() {
        let sinker = sinker();
        sinker.reload(document(2, "g1", 10)).await.unwrap();

        let mut empty = document(2, "g1", 10);
        empty.groups.clear();
        sinker.reload(empty).await.unwrap();

        assert!(sinker.running_groups().is_empty());
        sinker.shutdown(Duration::from_millis(50)).await;
    }
}

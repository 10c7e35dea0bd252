//! Per-group consumer: fetch, decode/enrich/route concurrently, flush on
//! threshold, and hand completed batches off to the commit coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GroupConfig;
use crate::model::RecordMap;

use super::bus::BusClient;
use super::commit::{CommitIntent, ConsumerHandle};
use super::enrichment;
use super::sharder::flush_threshold;
use super::task_service::TaskService;
use super::Error;

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;

/// No-progress watchdog: ten minutes without a successful fetch is treated
/// as a dead connection, not a quiet topic.
const WATCHDOG: Duration = Duration::from_secs(600);

/// A polled batch is decoded by up to this many concurrent workers sharing
/// one atomic cursor into the fetch.
const MAX_DECODE_WORKERS: usize = 10;

pub struct Consumer {
    pub id: String,
    name: String,
    bus: Arc<dyn BusClient>,
    tasks_by_topic: HashMap<String, Arc<TaskService>>,
    tasks_by_table: HashMap<String, Arc<TaskService>>,
    state: Arc<AtomicU8>,
    handle: Arc<ConsumerHandle>,
    commit_tx: mpsc::Sender<CommitIntent>,
    cancel: CancellationToken,
    pending: Mutex<RecordMap>,
    shard_count: usize,
    buffer_size: AtomicUsize,
    flush_interval_millis: AtomicU64,
    threshold: AtomicUsize,
}

impl Consumer {
    pub fn new(
        id: String,
        group: GroupConfig,
        bus: Arc<dyn BusClient>,
        tasks: Vec<Arc<TaskService>>,
        shard_count: usize,
        commit_tx: mpsc::Sender<CommitIntent>,
    ) -> Self {
        let mut tasks_by_topic = HashMap::new();
        let mut tasks_by_table = HashMap::new();
        for task in tasks {
            // First task declared for a topic is its default route; later
            // tasks sharing the same topic are reachable only by explicit
            // `__table_name` override.
            tasks_by_topic
                .entry(task.topic.clone())
                .or_insert_with(|| task.clone());
            tasks_by_table.insert(task.table_name.clone(), task.clone());
        }

        let threshold = flush_threshold(group.buffer_size, shard_count);

        Self {
            id,
            name: group.name.clone(),
            bus,
            tasks_by_topic,
            tasks_by_table,
            state: Arc::new(AtomicU8::new(STOPPED)),
            handle: Arc::new(ConsumerHandle::new()),
            commit_tx,
            cancel: CancellationToken::new(),
            pending: Mutex::new(RecordMap::new()),
            shard_count,
            buffer_size: AtomicUsize::new(group.buffer_size),
            flush_interval_millis: AtomicU64::new(group.flush_interval_sec * 1000),
            threshold: AtomicUsize::new(threshold),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Apply a buffer-size/flush-interval change without a restart, per the
    /// `updateGroup` path: topics and join semantics are unaffected, so the
    /// bus client and its subscription stay untouched.
    pub fn update_group(&self, group: &GroupConfig) {
        self.buffer_size.store(group.buffer_size, Ordering::SeqCst);
        self.flush_interval_millis
            .store(group.flush_interval_sec * 1000, Ordering::SeqCst);
        self.threshold.store(
            flush_threshold(group.buffer_size, self.shard_count),
            Ordering::SeqCst,
        );
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::SeqCst)
    }

    fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_millis.load(Ordering::SeqCst))
    }

    fn threshold(&self) -> usize {
        self.threshold.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn buffer_size_for_test(&self) -> usize {
        self.buffer_size()
    }

    /// Decode, enrich, and route one fetch's worth of records, splitting the
    /// work across a bounded pool of workers sharing an atomic cursor. After
    /// a successful pass, extends the pending offset map and flushes if the
    /// buffered threshold was crossed.
    pub async fn process_fetch(
        &self,
        records: Vec<crate::model::InputRecord>,
    ) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let cursor = Arc::new(AtomicUsize::new(0));
        let records = Arc::new(records);
        let workers = MAX_DECODE_WORKERS.min(records.len().max(1));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let cursor = cursor.clone();
            let records = records.clone();
            let tasks_by_table: HashMap<String, Arc<TaskService>> = self.tasks_by_table.clone();
            let tasks_by_topic: HashMap<String, Arc<TaskService>> = self.tasks_by_topic.clone();
            let state = self.state.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::task::spawn_blocking(move || {
                loop {
                    if state.load(Ordering::SeqCst) == STOPPED || cancel.is_cancelled() {
                        return Ok::<(), Error>(());
                    }
                    let i = cursor.fetch_add(1, Ordering::SeqCst);
                    if i >= records.len() {
                        return Ok::<(), Error>(());
                    }
                    let record = &records[i];

                    let task = record
                        .table_override()
                        .and_then(|table| tasks_by_table.get(table))
                        .or_else(|| tasks_by_topic.get(&record.topic))
                        .cloned();

                    let Some(task) = task else {
                        warn!(
                            "no task configured for topic \"{}\" (partition {}, offset {})",
                            record.topic, record.partition, record.offset
                        );
                        continue;
                    };

                    let enriched = match enrichment::enrich(&record.topic, &record.value) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            warn!(
                                "dropping malformed record on topic \"{}\" partition {} offset {}: {}",
                                record.topic, record.partition, record.offset, err
                            );
                            continue;
                        }
                    };

                    if let Err(err) = task.put(&enriched) {
                        warn!(
                            "dropping record on topic \"{}\" partition {} offset {}: {}",
                            record.topic, record.partition, record.offset, err
                        );
                    }
                }
            }));
        }

        for handle in handles {
            handle
                .await
                .map_err(|err| Error::Bus(err.to_string()))??;
        }

        let mut per_partition: HashMap<(String, i32), (i64, i64)> = HashMap::new();
        for record in records.iter() {
            let key = (record.topic.clone(), record.partition);
            per_partition
                .entry(key)
                .and_modify(|(first, last)| {
                    *first = (*first).min(record.offset);
                    *last = (*last).max(record.offset);
                })
                .or_insert((record.offset, record.offset));
        }

        let buffered = {
            let mut pending = self.pending.lock();
            for ((topic, partition), (first, last)) in per_partition {
                pending.extend(&topic, partition, first, last);
            }
            drop(pending);
            self.tasks_by_table
                .values()
                .map(|task| task.buffered_count())
                .max()
                .unwrap_or(0)
        };

        if buffered >= self.threshold() {
            self.trigger_flush().await?;
        }

        Ok(())
    }

    /// Snapshot the pending offset map, spawn a task that flushes every
    /// TaskService's buffers concurrently, and enqueue a commit intent gated
    /// on that flush. Returns immediately: the commit happens asynchronously.
    pub async fn trigger_flush(&self) -> Result<(), Error> {
        let offsets = {
            let mut pending = self.pending.lock();
            pending.take()
        };
        if offsets.is_empty() {
            return Ok(());
        }

        self.handle.num_flying.fetch_add(1, Ordering::SeqCst);

        // Every configured task is keyed uniquely by its destination table,
        // so iterating this map flushes each task exactly once.
        let tasks: Vec<Arc<TaskService>> = self.tasks_by_table.values().cloned().collect();

        let write_barrier = tokio::spawn(async move {
            let results = futures::future::join_all(tasks.iter().map(|t| t.flush())).await;
            for result in results {
                result?;
            }
            Ok::<(), Error>(())
        });

        let intent = CommitIntent {
            group: self.name.clone(),
            offsets,
            write_barrier,
            handle: self.handle.clone(),
            bus: self.bus.clone(),
        };

        self.commit_tx
            .send(intent)
            .await
            .map_err(|_| Error::Bus("commit coordinator channel closed".into()))?;

        Ok(())
    }

    /// Main poll/process loop. Runs until cancelled, then performs the
    /// rebalance-safe shutdown: drain every task's buffers and block until
    /// every outstanding commit has resolved before returning. A periodic
    /// ticker flushes whatever is buffered even when the threshold is never
    /// crossed, so `flush_interval_sec` bounds end-to-end latency on its own;
    /// its period is re-read from the live atomic on every tick, so an
    /// `update_group` takes effect on the very next flush.
    pub async fn run(&self) -> Result<(), Error> {
        self.state.store(RUNNING, Ordering::SeqCst);
        info!("consumer \"{}\" starting for group \"{}\"", self.id, self.name);

        let mut last_progress = tokio::time::Instant::now();
        let mut next_tick = tokio::time::Instant::now() + self.flush_interval();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next_tick) => {
                    self.trigger_flush().await?;
                    next_tick = tokio::time::Instant::now() + self.flush_interval();
                    continue;
                }
                result = self.bus.poll_fetch(self.buffer_size(), Duration::from_secs(1)) => {
                    let fetch = result?;
                    if fetch.is_empty() {
                        if last_progress.elapsed() > WATCHDOG {
                            return Err(Error::Stalled(self.id.clone(), WATCHDOG));
                        }
                        continue;
                    }
                    last_progress = tokio::time::Instant::now();
                    self.process_fetch(fetch).await?;
                }
            }
        }

        self.stop().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Partition-revoked / shutdown path: flush whatever is buffered, wait
    /// for every in-flight commit to resolve, then release the bus. This is
    /// the at-least-once bargain: offsets never advance past what's durably
    /// written, but a slow cleanup holds up the rebalance.
    pub async fn stop(&self) -> Result<(), Error> {
        self.trigger_flush().await?;
        self.handle.wait_drained().await;
        self.bus.close().await?;
        self.state.store(STOPPED, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Clickhouse, GroupConfig, ParserKind, TaskConfig};
    use crate::db::cluster::ClusterPool;
    use crate::db::connection::test::FakeOpener;
    use crate::ingest::bus::test::FakeBus;
    use crate::model::InputRecord;
    use std::sync::Arc;

    async fn harness(shards: usize) -> (Consumer, Arc<FakeBus>, mpsc::Receiver<CommitIntent>) {
        let pool = ClusterPool::empty(Arc::new(FakeOpener::default()));
        let config = Clickhouse {
            hosts: (0..shards).map(|i| vec![format!("ch{}", i)]).collect(),
            max_open_conns: 1,
            ..Clickhouse::default()
        };
        pool.init(&config, CancellationToken::new()).await.unwrap();
        let pool = Arc::new(pool);

        let events = Arc::new(TaskService::new(
            &TaskConfig {
                name: "events".into(),
                topic: "events".into(),
                table_name: "events".into(),
                columns: vec!["message".into()],
                parser: ParserKind::Fastjson,
                ..TaskConfig::default()
            },
            pool.clone(),
        ));
        let alt = Arc::new(TaskService::new(
            &TaskConfig {
                name: "alt".into(),
                topic: "events".into(),
                table_name: "alt_events".into(),
                columns: vec!["message".into()],
                parser: ParserKind::Fastjson,
                ..TaskConfig::default()
            },
            pool,
        ));

        let bus = Arc::new(FakeBus::default());
        let (tx, rx) = mpsc::channel(8);

        let group = GroupConfig {
            name: "g".into(),
            topics: vec!["events".into()],
            buffer_size: 4,
            ..GroupConfig::default()
        };

        let consumer = Consumer::new(
            "c1".into(),
            group,
            bus.clone(),
            vec![events, alt],
            shards,
            tx,
        );
        // Tests exercise process_fetch/trigger_flush/stop directly without
        // going through run(), so mark the consumer running the way run()
        // would — decode workers now check this state.
        consumer.state.store(RUNNING, Ordering::SeqCst);

        (consumer, bus, rx)
    }

    fn record(topic: &str, offset: i64, table_override: Option<&str>) -> InputRecord {
        let mut headers = Vec::new();
        if let Some(table) = table_override {
            headers.push(("__table_name".to_string(), table.as_bytes().to_vec()));
        }
        InputRecord {
            topic: topic.into(),
            partition: 0,
            key: vec![],
            value: serde_json::json!({"message": "hi"}).to_string().into_bytes(),
            offset,
            timestamp: 0,
            headers,
        }
    }

    #[tokio::test]
    async fn test_process_fetch_routes_by_table_override() {
        let (consumer, _bus, _rx) = harness(1).await;
        let records = vec![
            record("events", 0, None),
            record("events", 1, Some("alt_events")),
        ];
        consumer.process_fetch(records).await.unwrap();

        assert_eq!(consumer.tasks_by_table["events"].buffered_count(), 1);
        assert_eq!(consumer.tasks_by_table["alt_events"].buffered_count(), 1);
    }

    #[tokio::test]
    async fn test_trigger_flush_sends_commit_intent_with_offset_range() {
        let (consumer, _bus, mut rx) = harness(1).await;
        let records = vec![record("events", 0, None), record("events", 5, None)];
        consumer.process_fetch(records).await.unwrap();
        consumer.trigger_flush().await.unwrap();

        let intent = rx.recv().await.unwrap();
        let range = &intent.offsets.0["events"][&0];
        assert_eq!(range.begin, 0);
        assert_eq!(range.end, 5);

        intent.write_barrier.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_and_waits_for_commit() {
        let (consumer, _bus, mut rx) = harness(1).await;
        consumer
            .process_fetch(vec![record("events", 0, None)])
            .await
            .unwrap();

        let handle = consumer.handle.clone();
        let stopper = tokio::spawn(async move { consumer.stop().await });

        let intent = rx.recv().await.unwrap();
        assert_eq!(handle.num_flying.load(Ordering::SeqCst), 1);
        intent.write_barrier.await.unwrap().unwrap();
        handle.num_flying.fetch_sub(1, Ordering::SeqCst);
        handle.commit_done.notify_waiters();

        stopper.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_update_group_applies_without_touching_bus_or_tasks() {
        let (consumer, _bus, _rx) = harness(1).await;
        let before = consumer.threshold();

        consumer.update_group(&GroupConfig {
            name: "g".into(),
            topics: vec!["events".into()],
            buffer_size: 4000,
            flush_interval_sec: 2,
            ..GroupConfig::default()
        });

        assert_eq!(consumer.buffer_size(), 4000);
        assert_eq!(consumer.flush_interval(), Duration::from_secs(2));
        assert_ne!(consumer.threshold(), before);
    }
}

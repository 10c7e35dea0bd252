//! One (topic → table) pipeline: decode, route to its sharder, drain on request.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TaskConfig;
use crate::db::cluster::ClusterPool;
use crate::parser::{self, Parser};

use super::sharder::Sharder;
use super::Error;

pub struct TaskService {
    pub name: String,
    pub topic: String,
    pub table_name: String,
    columns: Vec<String>,
    sharder: Arc<Sharder>,
    parser_kind: crate::config::ParserKind,
    // A small per-worker parser cache stands in for the original's instance
    // pool: Rust's ownership model makes a thread-local pool unnecessary, but
    // reusing instances still avoids reallocating parser scratch buffers.
    parser_cache: Mutex<Vec<Box<dyn Parser>>>,
    // Per-task monotonic counter driving round-robin shard routing. Kept
    // local rather than global to avoid contention across tasks.
    batch_counter: AtomicI64,
}

impl TaskService {
    pub fn new(config: &TaskConfig, cluster: Arc<ClusterPool>) -> Self {
        Self {
            name: config.name.clone(),
            topic: config.topic.clone(),
            table_name: config.table_name.clone(),
            columns: config.columns.clone(),
            sharder: Arc::new(Sharder::new(
                cluster,
                config.table_name.clone(),
                config.columns.clone(),
            )),
            parser_kind: config.parser,
            parser_cache: Mutex::new(Vec::new()),
            batch_counter: AtomicI64::new(0),
        }
    }

    /// Decode, validate column count, route to a shard, and buffer the row.
    /// Returns the sharder's new total buffered count.
    pub fn put(&self, value: &[u8]) -> Result<usize, Error> {
        let mut parser = self.checkout_parser();
        let parsed = parser.parse(value, &self.columns);
        self.checkin_parser(parser);

        let row = parsed?;
        if row.len() != self.columns.len() {
            return Err(Error::ColumnCount {
                expected: self.columns.len(),
                got: row.len(),
            });
        }

        let shard_index = self.next_shard_index();
        Ok(self.sharder.put(shard_index, row))
    }

    fn checkout_parser(&self) -> Box<dyn Parser> {
        self.parser_cache
            .lock()
            .pop()
            .unwrap_or_else(|| parser::build(self.parser_kind))
    }

    fn checkin_parser(&self, mut parser: Box<dyn Parser>) {
        parser.reset();
        self.parser_cache.lock().push(parser);
    }

    fn next_shard_index(&self) -> usize {
        let shard_count = self.sharder.num_shards().max(1) as i64;
        let batch_num = self.batch_counter.fetch_add(1, Ordering::Relaxed);
        batch_num.rem_euclid(shard_count) as usize
    }

    pub fn buffered_count(&self) -> usize {
        self.sharder.buffered_count()
    }

    pub async fn flush(&self) -> Result<usize, Error> {
        self.sharder.flush().await
    }

    pub async fn drain(&self) -> Result<usize, Error> {
        self.sharder.drain().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Clickhouse, ParserKind, TaskConfig};
    use crate::db::cluster::ClusterPool;
    use crate::db::connection::test::FakeOpener;
    use tokio_util::sync::CancellationToken;

    async fn task_service(shards: usize) -> TaskService {
        let pool = ClusterPool::empty(Arc::new(FakeOpener::default()));
        let config = Clickhouse {
            hosts: (0..shards).map(|i| vec![format!("ch{}", i)]).collect(),
            max_open_conns: 1,
            ..Clickhouse::default()
        };
        pool.init(&config, CancellationToken::new()).await.unwrap();

        TaskService::new(
            &TaskConfig {
                name: "events".into(),
                topic: "events".into(),
                table_name: "events".into(),
                columns: vec!["message".into()],
                parser: ParserKind::Fastjson,
                ..TaskConfig::default()
            },
            Arc::new(pool),
        )
    }

    #[tokio::test]
    async fn test_put_routes_round_robin_across_shards() {
        let service = task_service(3).await;
        for i in 0..9 {
            let payload = format!(r#"{{"message": "m{}"}}"#, i);
            service.put(payload.as_bytes()).unwrap();
        }
        // All 9 rows distributed across 3 shards: each shard gets 3.
        assert_eq!(service.buffered_count(), 9);
    }

    #[tokio::test]
    async fn test_put_propagates_parser_error() {
        let service = task_service(1).await;
        let result = service.put(b"not json");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_flush_empties_buffers_and_reports_written() {
        let service = task_service(2).await;
        service.put(br#"{"message": "a"}"#).unwrap();
        service.put(br#"{"message": "b"}"#).unwrap();

        let written = service.flush().await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(service.buffered_count(), 0);
    }
}

//! Owns every shard's writer; routes batches and manages cluster-wide
//! lifecycle (rebuild on configuration change).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Clickhouse;

use super::address::shards_from_config;
use super::connection::ConnectionOpener;
use super::shard::ShardState;
use super::writer::{ShardWriter, WriteOutcome, WriteTask};
use super::Error;

struct Cluster {
    writers: Vec<Arc<ShardWriter>>,
}

/// Process-wide pool of per-shard writers. Rebuilding swaps the whole cluster
/// atomically under a single lifecycle lock: build the new shards, open one
/// liveness connection each, then swap. The old shards are closed only after
/// the swap has returned, so in-flight `shard_for` lookups never see a torn
/// state.
pub struct ClusterPool {
    opener: Arc<dyn ConnectionOpener>,
    cluster: Mutex<Cluster>,
}

impl ClusterPool {
    /// Build a pool with no shards; call `init` before routing any batches.
    pub fn empty(opener: Arc<dyn ConnectionOpener>) -> Self {
        Self {
            opener,
            cluster: Mutex::new(Cluster { writers: vec![] }),
        }
    }

    /// Replace the cluster with one built from `config`, probing each shard's
    /// first replica before adopting it.
    pub async fn init(&self, config: &Clickhouse, cancel: CancellationToken) -> Result<(), Error> {
        let shards = shards_from_config(config);
        let mut writers = Vec::with_capacity(shards.len());

        for (index, replicas) in shards.into_iter().enumerate() {
            let shard = Arc::new(ShardState::new(index, replicas, self.opener.clone()));
            // Liveness probe: open once before the shard is adopted.
            shard.next_good_replica(0).await?;
            writers.push(Arc::new(ShardWriter::new(
                shard,
                config.max_open_conns,
                cancel.clone(),
            )));
        }

        let old = {
            let mut guard = self.cluster.lock();
            std::mem::replace(&mut guard.writers, writers)
        };

        info!("clickhouse cluster pool rebuilt with {} shard(s)", old.len());

        for writer in old {
            writer.close();
        }

        Ok(())
    }

    /// Number of shards, i.e. the sharding modulus.
    pub fn num_shards(&self) -> usize {
        self.cluster.lock().writers.len()
    }

    /// Route `batch_num` to its shard and submit the batch, waiting for completion.
    pub async fn submit(
        &self,
        batch_num: i64,
        table: String,
        columns: Vec<String>,
        rows: Vec<crate::model::Row>,
    ) -> Result<WriteOutcome, Error> {
        let writer = {
            let guard = self.cluster.lock();
            if guard.writers.is_empty() {
                return Err(Error::UnknownShard(0, 0));
            }
            let index = (batch_num.rem_euclid(guard.writers.len() as i64)) as usize;
            guard.writers[index].clone()
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        writer
            .submit(WriteTask {
                table,
                columns,
                rows,
                reply: tx,
            })
            .await?;

        rx.await.map_err(|_| Error::Closed)?
    }

    /// Close every shard's writer pool, draining their workers.
    pub fn close(&self) {
        for writer in &self.cluster.lock().writers {
            writer.close();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::connection::test::FakeOpener;
    use crate::model::Cell;

    fn config(shards: usize) -> Clickhouse {
        Clickhouse {
            hosts: (0..shards).map(|i| vec![format!("ch{}", i)]).collect(),
            max_open_conns: 2,
            ..Clickhouse::default()
        }
    }

    #[tokio::test]
    async fn test_init_builds_one_writer_per_shard() {
        let pool = ClusterPool::empty(Arc::new(FakeOpener::default()));
        pool.init(&config(3), CancellationToken::new()).await.unwrap();
        assert_eq!(pool.num_shards(), 3);
    }

    #[tokio::test]
    async fn test_sharding_is_round_robin_modulo_shard_count() {
        let pool = ClusterPool::empty(Arc::new(FakeOpener::default()));
        pool.init(&config(4), CancellationToken::new()).await.unwrap();

        for n in [0i64, 4, 8, 1, 5, 9] {
            let outcome = pool
                .submit(
                    n,
                    "t".into(),
                    vec!["n".into()],
                    vec![crate::model::Row(vec![Cell::Int(n)])],
                )
                .await
                .unwrap();
            assert_eq!(outcome.written, 1);
        }
    }

    #[tokio::test]
    async fn test_reinit_swaps_cluster_without_losing_shard_count() {
        let pool = ClusterPool::empty(Arc::new(FakeOpener::default()));
        pool.init(&config(2), CancellationToken::new()).await.unwrap();
        assert_eq!(pool.num_shards(), 2);

        pool.init(&config(5), CancellationToken::new()).await.unwrap();
        assert_eq!(pool.num_shards(), 5);
    }
}

//! Accumulates rows per destination shard and flushes them as batches.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;

use crate::db::cluster::ClusterPool;
use crate::model::Row;

use super::Error;

pub struct Sharder {
    cluster: Arc<ClusterPool>,
    table: String,
    columns: Vec<String>,
    buffers: Mutex<Vec<Vec<Row>>>,
}

impl Sharder {
    pub fn new(cluster: Arc<ClusterPool>, table: String, columns: Vec<String>) -> Self {
        let shard_count = cluster.num_shards().max(1);
        Self {
            cluster,
            table,
            columns,
            buffers: Mutex::new((0..shard_count).map(|_| Vec::new()).collect()),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Buffer `row` under `shard_index`, returning the new total buffered
    /// count across all shards.
    pub fn put(&self, shard_index: usize, row: Row) -> usize {
        let mut buffers = self.buffers.lock();
        let n = buffers.len();
        buffers[shard_index % n].push(row);
        buffers.iter().map(Vec::len).sum()
    }

    pub fn buffered_count(&self) -> usize {
        self.buffers.lock().iter().map(Vec::len).sum()
    }

    /// Drain every non-empty shard buffer as one batch each, submitted in
    /// parallel, and wait for all of them to complete. Returns the total
    /// number of rows actually written (bad rows excluded).
    pub async fn flush(&self) -> Result<usize, Error> {
        let batches: Vec<(usize, Vec<Row>)> = {
            let mut buffers = self.buffers.lock();
            buffers
                .iter_mut()
                .enumerate()
                .filter(|(_, rows)| !rows.is_empty())
                .map(|(index, rows)| (index, std::mem::take(rows)))
                .collect()
        };

        let futures = batches.into_iter().map(|(index, rows)| {
            let cluster = self.cluster.clone();
            let table = self.table.clone();
            let columns = self.columns.clone();
            async move { cluster.submit(index as i64, table, columns, rows).await }
        });

        let mut written = 0;
        for outcome in join_all(futures).await {
            written += outcome?.written;
        }

        Ok(written)
    }

    /// Block until every previously submitted batch has completed. Since
    /// `flush` already awaits each batch inline, draining is just flushing
    /// whatever remains.
    pub async fn drain(&self) -> Result<usize, Error> {
        self.flush().await
    }
}

/// `min(bufferSize * shardCount * 4/5, 2^27)`, the total-buffered-row count
/// at which a flush is triggered ahead of the ticker.
pub fn flush_threshold(buffer_size: usize, shard_count: usize) -> usize {
    let raw = (buffer_size as u128) * (shard_count.max(1) as u128) * 4 / 5;
    raw.min(1u128 << 27) as usize
}

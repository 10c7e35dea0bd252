//! Database-layer errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no good replica available for shard {shard}, tried: {tried:?}")]
    NoGoodReplica { shard: usize, tried: Vec<String> },

    #[error("connection to \"{0}\" failed: {1}")]
    Connect(String, String),

    #[error("batch send failed: {0}")]
    Send(String),

    #[error("shard writer is closed")]
    Closed,

    #[error("unknown shard index {0} (cluster has {1} shards)")]
    UnknownShard(usize, usize),

    #[error("clickhouse client error: {0}")]
    Clickhouse(String),
}

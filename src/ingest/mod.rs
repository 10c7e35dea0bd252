//! The ingestion pipeline: bus consumption, enrichment, sharded writes, and
//! the commit bookkeeping that ties the two together.

pub mod bus;
pub mod commit;
pub mod consumer;
pub mod enrichment;
pub mod sharder;
pub mod sinker;
pub mod task_service;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] crate::config::error::Error),

    #[error("parser error: {0}")]
    Parser(#[from] crate::parser::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("db error: {0}")]
    Db(#[from] crate::db::Error),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("enrichment error: {0}")]
    Enrichment(String),

    #[error("column count mismatch: expected {expected}, got {got}")]
    ColumnCount { expected: usize, got: usize },

    #[error("no task configured for topic \"{0}\"")]
    UnknownTopic(String),

    #[error("no task configured for table \"{0}\"")]
    UnknownTable(String),

    #[error("consumer \"{0}\" made no progress for {1:?}")]
    Stalled(String, std::time::Duration),
}

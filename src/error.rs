//! Crate-level error aggregation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] crate::config::error::Error),

    #[error("database error: {0}")]
    Db(#[from] crate::db::Error),

    #[error("ingest error: {0}")]
    Ingest(#[from] crate::ingest::Error),

    #[error("parser error: {0}")]
    Parser(#[from] crate::parser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

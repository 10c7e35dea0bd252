//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("error parsing config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("error parsing JSON in config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("group \"{0}\" has no topics configured")]
    EmptyGroup(String),

    #[error("no clickhouse hosts configured")]
    EmptyClickhouseHosts,
}

//! Pluggable payload decoders: raw record bytes in, a typed `Row` out.

pub mod csv;
pub mod fastjson;
pub mod gjson;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ParserKind;
use crate::model::Row;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid utf-8 payload: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("column count mismatch: expected {expected}, got {got}")]
    ColumnCount { expected: usize, got: usize },

    #[error("missing field \"{0}\"")]
    MissingField(String),

    #[error("empty csv record")]
    EmptyCsv,
}

/// Decodes one record's value into a `Row` matching a task's configured columns.
/// Implementations may hold internal scratch state and are reset between uses
/// by a worker's parser cache rather than recreated per record.
#[async_trait]
pub trait Parser: Send {
    fn parse(&mut self, value: &[u8], columns: &[String]) -> Result<Row, Error>;

    /// Clear any scratch state so the instance can be handed to another record.
    fn reset(&mut self) {}
}

/// Build a fresh parser instance for the given kind.
pub fn build(kind: ParserKind) -> Box<dyn Parser> {
    match kind {
        ParserKind::Fastjson => Box::new(fastjson::FastJsonParser::default()),
        ParserKind::Gjson => Box::new(gjson::GjsonParser::default()),
        ParserKind::Csv => Box::new(csv::CsvParser::new(b',')),
    }
}

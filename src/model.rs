//! Core data types shared by the ingest pipeline.

use std::collections::HashMap;

/// A single record as received from the message bus. Immutable after receipt.
#[derive(Debug, Clone)]
pub struct InputRecord {
    pub topic: String,
    pub partition: i32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub offset: i64,
    pub timestamp: i64,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl InputRecord {
    /// Value of the `__table_name` header, if present and non-empty.
    pub fn table_override(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == "__table_name")
            .and_then(|(_, value)| std::str::from_utf8(value).ok())
            .filter(|value| !value.is_empty())
    }
}

/// One typed cell in a destination row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::String(s) => write!(f, "{}", s),
        }
    }
}

/// A row of typed cells, ordered to match the destination table's columns.
#[derive(Debug, Clone, Default)]
pub struct Row(pub Vec<Cell>);

impl Row {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Cell> for Row {
    fn from_iter<T: IntoIterator<Item = Cell>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}

/// Min first-offset / max last-offset seen for one (topic, partition) within a flush window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    pub begin: i64,
    pub end: i64,
}

impl Default for BatchRange {
    fn default() -> Self {
        Self {
            begin: i64::MAX,
            end: -1,
        }
    }
}

impl BatchRange {
    /// Widen the range to include `[first, last]`.
    pub fn extend(&mut self, first: i64, last: i64) {
        self.begin = self.begin.min(first);
        self.end = self.end.max(last);
    }

    /// No offsets have been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.begin > self.end
    }
}

/// `topic -> (partition -> BatchRange)`, accumulated by one Consumer between flushes.
#[derive(Debug, Clone, Default)]
pub struct RecordMap(pub HashMap<String, HashMap<i32, BatchRange>>);

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widen the (topic, partition) range with a fetch's observed first/last offsets.
    pub fn extend(&mut self, topic: &str, partition: i32, first: i64, last: i64) {
        self.0
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default()
            .extend(first, last);
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|partitions| partitions.is_empty())
    }

    /// Take the contents, leaving an empty map in its place. Used at flush time so
    /// records arriving immediately after are accumulated into a fresh window.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_batch_range_default_is_empty() {
        assert!(BatchRange::default().is_empty());
    }

    #[test]
    fn test_batch_range_extend_widens() {
        let mut range = BatchRange::default();
        range.extend(10, 20);
        range.extend(5, 15);
        assert_eq!(range.begin, 5);
        assert_eq!(range.end, 20);
    }

    #[test]
    fn test_record_map_take_leaves_empty() {
        let mut map = RecordMap::new();
        map.extend("t", 0, 0, 9);
        assert!(!map.is_empty());

        let sealed = map.take();
        assert!(!sealed.is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn test_table_override_header() {
        let record = InputRecord {
            topic: "t".into(),
            partition: 0,
            key: vec![],
            value: vec![],
            offset: 0,
            timestamp: 0,
            headers: vec![("__table_name".into(), b"u".to_vec())],
        };
        assert_eq!(record.table_override(), Some("u"));
    }

    #[test]
    fn test_table_override_empty_header_ignored() {
        let record = InputRecord {
            topic: "t".into(),
            partition: 0,
            key: vec![],
            value: vec![],
            offset: 0,
            timestamp: 0,
            headers: vec![("__table_name".into(), b"".to_vec())],
        };
        assert_eq!(record.table_override(), None);
    }
}

//! Path-based extraction, modeled after `gjson`'s dotted-path lookups.
//!
//! Unlike `fastjson`, columns may be nested paths (`"user.id"`) rather than
//! top-level field names, which is cheaper when only a handful of fields out
//! of a large payload are needed.

use serde_json::Value;

use crate::model::{Cell, Row};

use super::{Error, Parser};

#[derive(Default)]
pub struct GjsonParser {
    scratch: Option<Value>,
}

impl Parser for GjsonParser {
    fn parse(&mut self, value: &[u8], columns: &[String]) -> Result<Row, Error> {
        let text = std::str::from_utf8(value)?;
        let parsed: Value = serde_json::from_str(text)?;

        let row = columns
            .iter()
            .map(|path| path_lookup(&parsed, path))
            .collect();

        self.scratch = Some(parsed);
        Ok(row)
    }

    fn reset(&mut self) {
        self.scratch = None;
    }
}

fn path_lookup(root: &Value, path: &str) -> Cell {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Cell::Null,
        }
    }

    match current {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(Cell::Int)
            .unwrap_or_else(|| Cell::Float(n.as_f64().unwrap_or_default())),
        Value::String(s) => Cell::String(s.clone()),
        other => Cell::String(other.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nested_path_lookup() {
        let mut parser = GjsonParser::default();
        let columns = vec!["user.id".to_string()];
        let row = parser
            .parse(br#"{"user": {"id": 42}}"#, &columns)
            .unwrap();
        assert_eq!(row.0, vec![Cell::Int(42)]);
    }

    #[test]
    fn test_missing_path_is_null() {
        let mut parser = GjsonParser::default();
        let columns = vec!["user.missing".to_string()];
        let row = parser.parse(br#"{"user": {}}"#, &columns).unwrap();
        assert_eq!(row.0, vec![Cell::Null]);
    }
}

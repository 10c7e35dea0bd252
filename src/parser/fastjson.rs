//! Straightforward "decode the whole object, pull columns by name" parser.

use serde_json::Value;

use crate::model::{Cell, Row};

use super::{Error, Parser};

#[derive(Default)]
pub struct FastJsonParser {
    scratch: Option<Value>,
}

impl Parser for FastJsonParser {
    fn parse(&mut self, value: &[u8], columns: &[String]) -> Result<Row, Error> {
        let text = std::str::from_utf8(value)?;
        let parsed: Value = serde_json::from_str(text)?;

        let row = columns
            .iter()
            .map(|column| cell_for(&parsed, column))
            .collect();

        self.scratch = Some(parsed);
        Ok(row)
    }

    fn reset(&mut self) {
        self.scratch = None;
    }
}

fn cell_for(value: &Value, column: &str) -> Cell {
    match value.get(column) {
        None | Some(Value::Null) => Cell::Null,
        Some(Value::Bool(b)) => Cell::Bool(*b),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Cell::Int(i)
            } else {
                Cell::Float(n.as_f64().unwrap_or_default())
            }
        }
        Some(Value::String(s)) => Cell::String(s.clone()),
        Some(other) => Cell::String(other.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_extracts_columns_in_order() {
        let mut parser = FastJsonParser::default();
        let columns = vec!["message".to_string(), "count".to_string()];
        let row = parser
            .parse(br#"{"message": "hi", "count": 3}"#, &columns)
            .unwrap();
        assert_eq!(row.0, vec![Cell::String("hi".into()), Cell::Int(3)]);
    }

    #[test]
    fn test_parse_missing_column_is_null() {
        let mut parser = FastJsonParser::default();
        let columns = vec!["missing".to_string()];
        let row = parser.parse(br#"{"message": "hi"}"#, &columns).unwrap();
        assert_eq!(row.0, vec![Cell::Null]);
    }

    #[test]
    fn test_parse_invalid_json_errors() {
        let mut parser = FastJsonParser::default();
        assert!(parser.parse(b"not json", &[]).is_err());
    }
}

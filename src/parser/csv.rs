//! Delimited-text parser built on `csv-core`, for tasks whose payload is a
//! single CSV/TSV record rather than JSON.

use csv_core::{ReadFieldResult, Reader, ReaderBuilder};

use crate::model::{Cell, Row};

use super::{Error, Parser};

pub struct CsvParser {
    delimiter: u8,
    scratch: Vec<u8>,
}

impl CsvParser {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            scratch: vec![0u8; 4096],
        }
    }
}

impl Parser for CsvParser {
    fn parse(&mut self, value: &[u8], columns: &[String]) -> Result<Row, Error> {
        // A fresh reader per record avoids depending on any cross-call reset
        // semantics; csv-core readers are cheap to build.
        let mut reader: Reader = ReaderBuilder::new().delimiter(self.delimiter).build();

        let mut input = value;
        let mut fields = Vec::with_capacity(columns.len());

        loop {
            let (result, read, written) = reader.read_field(input, &mut self.scratch);
            let field = String::from_utf8_lossy(&self.scratch[..written]).into_owned();
            input = &input[read..];

            match result {
                ReadFieldResult::Field { record_end } => {
                    fields.push(field);
                    if record_end {
                        break;
                    }
                }
                ReadFieldResult::End => break,
                ReadFieldResult::InputEmpty => continue,
                ReadFieldResult::OutputFull => {
                    self.scratch.resize(self.scratch.len() * 2, 0);
                    continue;
                }
            }
        }

        if fields.is_empty() {
            return Err(Error::EmptyCsv);
        }

        let row = fields.into_iter().map(cell_for).collect();
        Ok(row)
    }
}

fn cell_for(field: String) -> Cell {
    if field.is_empty() {
        Cell::Null
    } else if let Ok(i) = field.parse::<i64>() {
        Cell::Int(i)
    } else if let Ok(f) = field.parse::<f64>() {
        Cell::Float(f)
    } else {
        Cell::String(field)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_typed_fields() {
        let mut parser = CsvParser::new(b',');
        let columns = vec!["a".into(), "b".into(), "c".into()];
        let row = parser.parse(b"hello,42,3.5", &columns).unwrap();
        assert_eq!(
            row.0,
            vec![
                Cell::String("hello".into()),
                Cell::Int(42),
                Cell::Float(3.5),
            ]
        );
    }

    #[test]
    fn test_parse_empty_field_is_null() {
        let mut parser = CsvParser::new(b',');
        let row = parser.parse(b"a,,c", &[]).unwrap();
        assert_eq!(row.0[1], Cell::Null);
    }
}

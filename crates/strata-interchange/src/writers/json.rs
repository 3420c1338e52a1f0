//! JSON array and JSON Lines output

use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use strata_core::{ColumnMeta, Result, StrataError, Value};

use super::{ChunkFile, FormatWriter};
use crate::options::OutputOptions;

/// Row as a JSON object with keys in column order
fn row_object(names: &[String], row: &[Value]) -> JsonValue {
    let mut object = Map::with_capacity(names.len());
    for (name, value) in names.iter().zip(row) {
        object.insert(name.clone(), JsonValue::from(value.clone()));
    }
    JsonValue::Object(object)
}

fn encode_error(e: serde_json::Error) -> StrataError {
    StrataError::Write(format!("Failed to encode JSON row: {}", e))
}

/// Writes one JSON array of row objects
pub struct JsonWriter {
    file: ChunkFile,
    pretty: bool,
    names: Vec<String>,
    rows_written: u64,
}

impl JsonWriter {
    pub fn create(path: &Path, output: &OutputOptions) -> Result<Self> {
        let file = ChunkFile::create(path)?;
        tracing::debug!(path = %path.display(), "created JSON writer");
        Ok(Self {
            file,
            pretty: output.pretty,
            names: Vec::new(),
            rows_written: 0,
        })
    }
}

impl FormatWriter for JsonWriter {
    fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        self.names = columns.iter().map(|c| c.name.clone()).collect();
        self.file.write_all(b"[")
    }

    fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()> {
        let mut buf = Vec::new();
        for row in rows {
            if self.rows_written > 0 {
                buf.push(b',');
            }
            let object = row_object(&self.names, row);
            if self.pretty {
                buf.extend_from_slice(b"\n  ");
                let text = serde_json::to_string_pretty(&object).map_err(encode_error)?;
                buf.extend_from_slice(text.replace('\n', "\n  ").as_bytes());
            } else {
                serde_json::to_writer(&mut buf, &object).map_err(encode_error)?;
            }
            self.rows_written += 1;
        }
        self.file.write_all(&buf)
    }

    fn finish(&mut self) -> Result<()> {
        let footer: &[u8] = if self.pretty && self.rows_written > 0 {
            b"\n]\n"
        } else {
            b"]\n"
        };
        self.file.write_all(footer)?;
        self.file.flush()
    }
}

/// Writes one JSON object per line
pub struct JsonLinesWriter {
    file: ChunkFile,
    names: Vec<String>,
}

impl JsonLinesWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = ChunkFile::create(path)?;
        tracing::debug!(path = %path.display(), "created JSON Lines writer");
        Ok(Self {
            file,
            names: Vec::new(),
        })
    }
}

impl FormatWriter for JsonLinesWriter {
    fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        self.names = columns.iter().map(|c| c.name.clone()).collect();
        Ok(())
    }

    fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()> {
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, &row_object(&self.names, row)).map_err(encode_error)?;
            buf.push(b'\n');
        }
        self.file.write_all(&buf)
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta::new("zeta", "TEXT", 0),
            ColumnMeta::new("alpha", "INTEGER", 1),
        ]
    }

    #[test]
    fn json_array_spans_chunks_and_keeps_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut writer = JsonWriter::create(&path, &OutputOptions::default()).unwrap();
        writer.begin(&columns()).unwrap();
        writer.write_chunk(&[vec![Value::from("a"), Value::Int64(1)]]).unwrap();
        writer
            .write_chunk(&[vec![Value::Null, Value::Int64(2)], vec![Value::from("c"), Value::Null]])
            .unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[{\"zeta\":\"a\",\"alpha\":1},{\"zeta\":null,\"alpha\":2},{\"zeta\":\"c\",\"alpha\":null}]\n"
        );
    }

    #[test]
    fn pretty_json_is_still_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pretty.json");
        let mut writer = JsonWriter::create(
            &path,
            &OutputOptions {
                pretty: true,
                ..OutputOptions::default()
            },
        )
        .unwrap();
        writer.begin(&columns()).unwrap();
        writer
            .write_chunk(&[vec![Value::from("a"), Value::Int64(1)], vec![Value::from("b"), Value::Int64(2)]])
            .unwrap();
        writer.finish().unwrap();

        let parsed: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            parsed,
            json!([{"zeta": "a", "alpha": 1}, {"zeta": "b", "alpha": 2}])
        );
    }

    #[test]
    fn empty_export_is_an_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        let mut writer = JsonWriter::create(&path, &OutputOptions::default()).unwrap();
        writer.begin(&columns()).unwrap();
        writer.finish().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]\n");
    }

    #[test]
    fn json_lines_writes_one_object_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut writer = JsonLinesWriter::create(&path).unwrap();
        writer.begin(&columns()).unwrap();
        writer
            .write_chunk(&[vec![Value::from("a"), Value::Int64(1)], vec![Value::from("b"), Value::Bool(true)]])
            .unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\"zeta\":\"a\",\"alpha\":1}\n{\"zeta\":\"b\",\"alpha\":true}\n"
        );
    }
}

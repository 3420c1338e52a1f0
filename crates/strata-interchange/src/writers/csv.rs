//! Delimited text output

use std::path::Path;
use strata_core::{ColumnMeta, Result, StrataError, Value};

use super::{ChunkFile, FormatWriter, cell_text};
use crate::options::OutputOptions;

/// Writer for CSV (or any single-byte delimited) text
pub struct CsvWriter {
    file: ChunkFile,
    delimiter: u8,
    include_header: bool,
    null_text: String,
}

impl CsvWriter {
    pub fn create(path: &Path, output: &OutputOptions) -> Result<Self> {
        let delimiter = match output.delimiter.as_bytes() {
            [byte] => *byte,
            _ => {
                return Err(StrataError::Configuration(format!(
                    "CSV delimiter must be a single character, got {:?}",
                    output.delimiter
                )));
            }
        };

        let file = ChunkFile::create(path)?;
        tracing::debug!(path = %path.display(), "created CSV writer");
        Ok(Self {
            file,
            delimiter,
            include_header: output.include_header,
            null_text: output.null_text.clone(),
        })
    }

    fn encode<I, S>(&self, records: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = Vec<S>>,
        S: AsRef<[u8]>,
    {
        let mut writer = ::csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());
        for record in records {
            writer
                .write_record(record)
                .map_err(|e| StrataError::Write(format!("Failed to encode CSV row: {}", e)))?;
        }
        writer
            .into_inner()
            .map_err(|e| StrataError::Write(format!("Failed to encode CSV chunk: {}", e)))
    }
}

impl FormatWriter for CsvWriter {
    fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        if !self.include_header {
            return Ok(());
        }
        let header = columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        let buf = self.encode([header])?;
        self.file.write_all(&buf)
    }

    fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()> {
        let records = rows.iter().map(|row| {
            row.iter()
                .map(|value| cell_text(value, &self.null_text))
                .collect::<Vec<_>>()
        });
        let buf = self.encode(records)?;
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

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta::new("id", "INTEGER", 0),
            ColumnMeta::new("note", "TEXT", 1),
            ColumnMeta::new("raw", "BLOB", 2),
        ]
    }

    #[test]
    fn writes_header_and_quotes_awkward_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut writer = CsvWriter::create(
            &path,
            &OutputOptions {
                null_text: "NULL".into(),
                ..OutputOptions::default()
            },
        )
        .unwrap();

        writer.begin(&columns()).unwrap();
        writer
            .write_chunk(&[
                vec![Value::Int64(1), Value::from("plain"), Value::Bytes(vec![0xde, 0xad])],
                vec![Value::Int64(2), Value::from("has, comma \"q\""), Value::Null],
            ])
            .unwrap();
        writer.write_chunk(&[vec![Value::Int64(3), Value::Null, Value::Null]]).unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "id,note,raw\n1,plain,dead\n2,\"has, comma \"\"q\"\"\",NULL\n3,NULL,NULL\n"
        );
    }

    #[test]
    fn custom_delimiter_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let mut writer = CsvWriter::create(
            &path,
            &OutputOptions {
                delimiter: "\t".into(),
                include_header: false,
                ..OutputOptions::default()
            },
        )
        .unwrap();
        writer.begin(&columns()).unwrap();
        writer
            .write_chunk(&[vec![Value::Int64(1), Value::from("a"), Value::Null]])
            .unwrap();
        writer.finish().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\ta\t\n");
    }

    #[test]
    fn multi_character_delimiter_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvWriter::create(
            &dir.path().join("x.csv"),
            &OutputOptions {
                delimiter: "::".into(),
                ..OutputOptions::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, StrataError::Configuration(_)));
    }
}

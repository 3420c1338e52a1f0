//! Format writers for export operations
//!
//! Every writer turns row chunks into one output format. A chunk is encoded
//! into memory first and written with a single `write_all`, so an interrupted
//! export leaves at worst a truncated tail, never interleaved chunks.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use strata_core::{ColumnMeta, DialectInfo, Result, StrataError, TableOrView, Value};

use crate::options::{ExportFormat, OutputOptions};

pub mod csv;
pub mod json;
pub mod sql;
pub mod xlsx;

pub use self::csv::CsvWriter;
pub use self::json::{JsonLinesWriter, JsonWriter};
pub use self::sql::SqlWriter;
pub use self::xlsx::XlsxWriter;

/// Serializer for one output format
pub trait FormatWriter: Send {
    /// Called once with the result columns before any rows
    fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()>;

    /// Append one chunk of rows, each in column order
    fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()>;

    /// Write any footer and flush
    fn finish(&mut self) -> Result<()>;
}

/// Create the writer for `format`, creating (or truncating) the file at `path`
pub fn create_writer(
    format: ExportFormat,
    path: &Path,
    output: &OutputOptions,
    table: &TableOrView,
    dialect: &DialectInfo,
) -> Result<Box<dyn FormatWriter>> {
    tracing::debug!(format = %format, path = %path.display(), "creating export writer");
    Ok(match format {
        ExportFormat::Csv => Box::new(CsvWriter::create(path, output)?),
        ExportFormat::Json => Box::new(JsonWriter::create(path, output)?),
        ExportFormat::Jsonl => Box::new(JsonLinesWriter::create(path)?),
        ExportFormat::Sql => Box::new(SqlWriter::create(path, output, table, dialect)?),
        ExportFormat::Xlsx => Box::new(XlsxWriter::create(path, output, table)?),
    })
}

/// Check that the output directory exists
pub(crate) fn validate_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        return Err(StrataError::Write(format!(
            "Directory does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

/// Output file written one whole chunk at a time
pub(crate) struct ChunkFile {
    file: File,
    path: PathBuf,
}

impl ChunkFile {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        validate_path(path)?;
        let file = File::create(path).map_err(|e| {
            StrataError::Write(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).map_err(|e| {
            StrataError::Write(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| {
            StrataError::Write(format!("Failed to flush {}: {}", self.path.display(), e))
        })
    }
}

/// Plain text for a cell, with `null_text` for NULL
pub(crate) fn cell_text(value: &Value, null_text: &str) -> String {
    value.to_text().unwrap_or_else(|| null_text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("out.csv");
        let err = ChunkFile::create(&path).err().unwrap();
        assert!(matches!(err, StrataError::Write(_)));
    }

    #[test]
    fn every_format_has_a_writer() {
        let dir = tempfile::tempdir().unwrap();
        let table = TableOrView::table("t");
        for format in ExportFormat::ALL {
            let path = dir.path().join(format!("out.{}", format.extension()));
            let mut writer = create_writer(
                format,
                &path,
                &OutputOptions::default(),
                &table,
                &DialectInfo::default(),
            )
            .unwrap();
            writer.begin(&[ColumnMeta::new("id", "INTEGER", 0)]).unwrap();
            writer.write_chunk(&[vec![Value::Int64(1)]]).unwrap();
            writer.finish().unwrap();
            assert!(path.exists(), "{format} output missing");
        }
    }
}

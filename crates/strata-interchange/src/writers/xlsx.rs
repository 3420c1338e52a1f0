//! Spreadsheet output
//!
//! The worksheet runs in constant-memory mode: each finished row is flushed
//! to a temporary file, so memory does not grow with the export. The `.xlsx`
//! archive itself is only written at `finish`, so a cancelled or failed
//! export leaves no partial spreadsheet behind.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use strata_core::{ColumnMeta, Result, StrataError, TableOrView, Value};

use super::{FormatWriter, validate_path};
use crate::options::OutputOptions;

const MAX_ROWS: u32 = 1_048_576;
const MAX_COLUMNS: usize = 16_384;
const MAX_SHEET_NAME: usize = 31;
/// Largest integer magnitude a spreadsheet number holds exactly
const MAX_EXACT_INTEGER: u64 = 1 << 53;

fn xlsx_error(e: XlsxError) -> StrataError {
    StrataError::Write(format!("Failed to write spreadsheet: {}", e))
}

/// Replace characters a sheet name cannot contain and cut it to length
fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            other => other,
        })
        .take(MAX_SHEET_NAME)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

/// Writes rows to a single worksheet
pub struct XlsxWriter {
    path: PathBuf,
    workbook: Option<Workbook>,
    header_format: Format,
    include_header: bool,
    null_text: String,
    next_row: u32,
}

impl XlsxWriter {
    pub fn create(path: &Path, output: &OutputOptions, table: &TableOrView) -> Result<Self> {
        validate_path(path)?;
        let mut workbook = Workbook::new();
        let name = sheet_name(output.sheet_name.as_deref().unwrap_or(&table.name));
        workbook
            .add_worksheet_with_constant_memory()
            .set_name(&name)
            .map_err(xlsx_error)?;
        tracing::debug!(path = %path.display(), sheet = %name, "created XLSX writer");

        Ok(Self {
            path: path.to_path_buf(),
            workbook: Some(workbook),
            header_format: Format::new().set_bold(),
            include_header: output.include_header,
            null_text: output.null_text.clone(),
            next_row: 0,
        })
    }

    fn sheet(&mut self) -> Result<&mut Worksheet> {
        self.workbook
            .as_mut()
            .ok_or_else(|| StrataError::Write("spreadsheet was already saved".into()))?
            .worksheet_from_index(0)
            .map_err(xlsx_error)
    }

    fn claim_row(&mut self) -> Result<u32> {
        if self.next_row >= MAX_ROWS {
            return Err(StrataError::Write(format!(
                "spreadsheets hold at most {} rows",
                MAX_ROWS
            )));
        }
        let row = self.next_row;
        self.next_row += 1;
        Ok(row)
    }
}

fn write_cell(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &Value,
    null_text: &str,
) -> std::result::Result<(), XlsxError> {
    match value {
        Value::Null if null_text.is_empty() => {}
        Value::Null => {
            sheet.write_string(row, col, null_text)?;
        }
        Value::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Value::Int32(i) => {
            sheet.write_number(row, col, *i as f64)?;
        }
        Value::Int64(i) if i.unsigned_abs() <= MAX_EXACT_INTEGER => {
            sheet.write_number(row, col, *i as f64)?;
        }
        Value::Float64(f) if f.is_finite() => {
            sheet.write_number(row, col, *f)?;
        }
        other => {
            sheet.write_string(row, col, other.to_text().unwrap_or_default())?;
        }
    }
    Ok(())
}

impl FormatWriter for XlsxWriter {
    fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        if columns.len() > MAX_COLUMNS {
            return Err(StrataError::Write(format!(
                "spreadsheets hold at most {} columns, got {}",
                MAX_COLUMNS,
                columns.len()
            )));
        }
        if !self.include_header {
            return Ok(());
        }
        let row = self.claim_row()?;
        let format = self.header_format.clone();
        let sheet = self.sheet()?;
        for (col, column) in columns.iter().enumerate() {
            sheet
                .write_string_with_format(row, col as u16, &column.name, &format)
                .map_err(xlsx_error)?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()> {
        let null_text = self.null_text.clone();
        for values in rows {
            let row = self.claim_row()?;
            let sheet = self.sheet()?;
            for (col, value) in values.iter().take(MAX_COLUMNS).enumerate() {
                write_cell(sheet, row, col as u16, value, &null_text).map_err(xlsx_error)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut workbook = self
            .workbook
            .take()
            .ok_or_else(|| StrataError::Write("spreadsheet was already saved".into()))?;
        workbook.save(&self.path).map_err(xlsx_error)?;
        tracing::debug!(path = %self.path.display(), rows = self.next_row, "saved XLSX workbook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sheet_xml(path: &Path) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut xml = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn sheet_names_are_sanitized() {
        assert_eq!(sheet_name("sales/2024"), "sales_2024");
        assert_eq!(sheet_name(""), "Sheet1");
        assert_eq!(sheet_name(&"x".repeat(40)).len(), MAX_SHEET_NAME);
    }

    #[test]
    fn workbook_is_saved_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        let mut writer = XlsxWriter::create(
            &path,
            &OutputOptions::default(),
            &TableOrView::table("orders"),
        )
        .unwrap();

        writer
            .begin(&[ColumnMeta::new("id", "INTEGER", 0), ColumnMeta::new("paid", "BOOLEAN", 1)])
            .unwrap();
        writer
            .write_chunk(&[
                vec![Value::Int64(1), Value::Bool(true)],
                vec![Value::Int64(i64::MAX), Value::Null],
            ])
            .unwrap();
        assert!(!path.exists());

        writer.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        // xlsx files are zip archives
        assert_eq!(&bytes[..2], b"PK");
        assert_eq!(writer.next_row, 3);
        assert!(writer.finish().is_err());
    }

    #[test]
    fn rows_from_every_chunk_reach_the_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.xlsx");
        let mut writer = XlsxWriter::create(
            &path,
            &OutputOptions::default(),
            &TableOrView::table("events"),
        )
        .unwrap();

        writer
            .begin(&[ColumnMeta::new("id", "INTEGER", 0), ColumnMeta::new("label", "TEXT", 1)])
            .unwrap();
        for chunk in 0..4_i64 {
            let rows: Vec<Vec<Value>> = (0..250_i64)
                .map(|i| {
                    let id = chunk * 250 + i;
                    vec![Value::Int64(id), Value::String(format!("event-{id}"))]
                })
                .collect();
            writer.write_chunk(&rows).unwrap();
        }
        writer.finish().unwrap();

        let xml = sheet_xml(&path);
        // header plus 1000 data rows
        assert_eq!(xml.matches("<row ").count(), 1001);
        assert!(xml.contains("event-999"));
    }
}

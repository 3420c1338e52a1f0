//! Export configuration and progress snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strata_core::{DEFAULT_CHUNK_SIZE, FilterJoiner, StrataError};
use strata_query::OrderBy;

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Jsonl,
    Sql,
    Xlsx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Csv,
        ExportFormat::Json,
        ExportFormat::Jsonl,
        ExportFormat::Sql,
        ExportFormat::Xlsx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Sql => "sql",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == lowered)
            .ok_or_else(|| {
                StrataError::Configuration(format!(
                    "Unknown export format '{}'. Expected one of: csv, json, jsonl, sql, xlsx",
                    s
                ))
            })
    }
}

/// What to read from the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    /// Rows per cursor read
    pub chunk_size: usize,
    /// Only these columns, in table order (empty = all)
    pub included_columns: Vec<String>,
    /// Columns to leave out
    pub excluded_columns: Vec<String>,
    /// Stop after this many rows
    pub row_limit: Option<u64>,
    pub order_by: Vec<OrderBy>,
    /// Joiner for filters that do not name their own
    pub filter_joiner: FilterJoiner,
    /// Run a count query first so progress can report a percentage
    pub count_rows: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            included_columns: Vec::new(),
            excluded_columns: Vec::new(),
            row_limit: None,
            order_by: Vec::new(),
            filter_joiner: FilterJoiner::And,
            count_rows: true,
        }
    }
}

/// Per-format output knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputOptions {
    /// CSV field delimiter, a single byte
    pub delimiter: String,
    /// CSV and XLSX header row
    pub include_header: bool,
    /// Text written for NULL in CSV and XLSX
    pub null_text: String,
    /// Indented JSON
    pub pretty: bool,
    /// Table name used in SQL output (defaults to the exported table)
    pub sql_table_name: Option<String>,
    /// XLSX worksheet name (defaults to the exported table)
    pub sheet_name: Option<String>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            include_header: true,
            null_text: String::new(),
            pretty: false,
            sql_table_name: None,
            sheet_name: None,
        }
    }
}

/// Immutable progress snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub rows_exported: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    pub completed: bool,
}

impl ExportProgress {
    pub fn new(rows_exported: u64, total_rows: Option<u64>, completed: bool) -> Self {
        let percent_complete = if completed {
            Some(100.0)
        } else {
            total_rows
                .filter(|total| *total > 0)
                .map(|total| (rows_exported as f64 / total as f64 * 100.0).min(100.0))
        };
        Self {
            rows_exported,
            total_rows,
            percent_complete,
            completed,
        }
    }
}

//! Hrana-over-HTTP message types
//!
//! Only the subset used by this driver is modelled: one-shot pipelines for
//! `execute`/`query`, the streaming cursor endpoint, and stream close.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use serde::{Deserialize, Serialize};
use strata_core::{ColumnMeta, Result, StrataError, Value};

/// A value as it travels over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HranaValue {
    Null,
    /// 64-bit integers are sent as strings to survive JSON number precision
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl From<&Value> for HranaValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => HranaValue::Null,
            Value::Bool(b) => HranaValue::Integer {
                value: if *b { "1" } else { "0" }.to_string(),
            },
            Value::Int32(i) => HranaValue::Integer {
                value: i.to_string(),
            },
            Value::Int64(i) => HranaValue::Integer {
                value: i.to_string(),
            },
            Value::Float64(f) => HranaValue::Float { value: *f },
            Value::Bytes(b) => HranaValue::Blob {
                base64: STANDARD.encode(b),
            },
            other => match other.to_text() {
                Some(value) => HranaValue::Text { value },
                None => HranaValue::Null,
            },
        }
    }
}

impl HranaValue {
    pub fn into_value(self) -> Result<Value> {
        Ok(match self {
            HranaValue::Null => Value::Null,
            HranaValue::Integer { value } => Value::Int64(value.parse().map_err(|_| {
                StrataError::Driver(format!("libSQL sent an invalid integer: {}", value))
            })?),
            HranaValue::Float { value } => Value::Float64(value),
            HranaValue::Text { value } => Value::String(value),
            HranaValue::Blob { base64 } => Value::Bytes(
                // servers may or may not pad
                STANDARD_NO_PAD
                    .decode(base64.trim_end_matches('='))
                    .map_err(|e| StrataError::Driver(format!("libSQL sent an invalid blob: {}", e)))?,
            ),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stmt {
    pub sql: String,
    pub args: Vec<HranaValue>,
    pub want_rows: bool,
}

impl Stmt {
    pub fn new(sql: &str, params: &[Value], want_rows: bool) -> Self {
        Self {
            sql: sql.to_string(),
            args: params.iter().map(HranaValue::from).collect(),
            want_rows,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineRequest {
    pub baton: Option<String>,
    pub requests: Vec<StreamRequest>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRequest {
    Execute { stmt: Stmt },
    Close,
}

#[derive(Debug, Deserialize)]
pub struct PipelineResponse {
    #[serde(default)]
    pub baton: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub results: Vec<StreamResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: HranaError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamResponse {
    Execute { result: StmtResult },
    Close,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Col {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decltype: Option<String>,
}

pub fn column_meta(cols: &[Col]) -> Vec<ColumnMeta> {
    cols.iter()
        .enumerate()
        .map(|(ordinal, col)| {
            ColumnMeta::new(
                col.name.clone().unwrap_or_default(),
                col.decltype.clone().unwrap_or_else(|| "DYNAMIC".to_string()),
                ordinal,
            )
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StmtResult {
    pub cols: Vec<Col>,
    pub rows: Vec<Vec<HranaValue>>,
    pub affected_row_count: u64,
    pub last_insert_rowid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HranaError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl From<HranaError> for StrataError {
    fn from(error: HranaError) -> Self {
        match error.code {
            Some(code) => StrataError::Query(format!("{} ({})", error.message, code)),
            None => StrataError::Query(error.message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CursorRequest {
    pub baton: Option<String>,
    pub batch: Batch,
}

#[derive(Debug, Serialize)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
}

#[derive(Debug, Serialize)]
pub struct BatchStep {
    pub stmt: Stmt,
}

/// First line of a cursor response body
#[derive(Debug, Deserialize)]
pub struct CursorResponse {
    #[serde(default)]
    pub baton: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Every following line of a cursor response body
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorEntry {
    StepBegin {
        #[serde(default)]
        cols: Vec<Col>,
    },
    StepEnd,
    StepError {
        error: HranaError,
    },
    Row {
        row: Vec<HranaValue>,
    },
    Error {
        error: HranaError,
    },
}

//! Chunked cursors over running queries
//!
//! A cursor walks one compiled query in bounded chunks so that callers never
//! materialize a whole result set. Every engine family provides its own
//! implementation of [`Cursor`]; they share the state machine below:
//!
//! ```text
//! Created --start--> Open --read--> Reading --short/empty chunk--> Exhausted
//!    \                 \               \                              |
//!     +----------------+---------------+---------close---------> Closed
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ColumnMeta, Result, StrataError, Value};

/// Default number of rows fetched per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Lifecycle of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorState {
    Created,
    Open,
    Reading,
    Exhausted,
    Closed,
}

impl CursorState {
    /// Whether `read` may be called in this state
    pub fn can_read(&self) -> bool {
        matches!(
            self,
            CursorState::Open | CursorState::Reading | CursorState::Exhausted
        )
    }

    /// Error for an operation attempted in the wrong state
    pub fn invalid(&self, operation: &str) -> StrataError {
        StrataError::Query(format!("cannot {operation} a cursor in state {self:?}"))
    }
}

/// Shape in which a driver hands rows to the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowMode {
    /// Positional value arrays
    #[default]
    Raw,
    /// Column-name keyed records
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CursorOptions {
    pub chunk_size: usize,
    pub row_mode: RowMode,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            row_mode: RowMode::Raw,
        }
    }
}

impl CursorOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_row_mode(mut self, row_mode: RowMode) -> Self {
        self.row_mode = row_mode;
        self
    }
}

/// A row as produced by a driver, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl RawRow {
    /// Normalize to an ordered value array matching `columns`.
    ///
    /// Named rows are matched by column name in column order; a repeated name
    /// consumes the next unused entry with that name, so `SELECT a.id, b.id`
    /// keeps both values. Missing entries become NULL.
    pub fn normalize(self, columns: &[ColumnMeta]) -> Vec<Value> {
        match self {
            RawRow::Positional(values) => values,
            RawRow::Named(pairs) => {
                let mut slots: Vec<Option<(String, Value)>> = pairs.into_iter().map(Some).collect();
                columns
                    .iter()
                    .map(|column| {
                        slots
                            .iter_mut()
                            .find(|slot| matches!(slot, Some((name, _)) if *name == column.name))
                            .and_then(Option::take)
                            .map(|(_, value)| value)
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            }
        }
    }
}

/// A stateful, resumable handle over one running query
#[async_trait]
pub trait Cursor: Send {
    /// Current lifecycle state
    fn state(&self) -> CursorState;

    /// Column metadata, available once the cursor has started
    fn columns(&self) -> &[ColumnMeta];

    /// Bind the statement and begin iteration (`Created -> Open`)
    async fn start(&mut self) -> Result<()>;

    /// Read up to one chunk of rows, each normalized to column order.
    ///
    /// A chunk shorter than the chunk size, including an empty one, moves the
    /// cursor to `Exhausted`; further reads return empty chunks.
    async fn read(&mut self) -> Result<Vec<Vec<Value>>>;

    /// Release the statement or stream. Idempotent and valid from any state.
    async fn close(&mut self) -> Result<()>;
}

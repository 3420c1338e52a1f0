//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strata_core::{
    ColumnMeta, Connection, Cursor, CursorOptions, DialectInfo, QueryResult, Result, Row,
    StatementResult, StrataError, Value,
};

use crate::SqliteCursor;

/// The rusqlite handle shared between a connection and its cursor worker.
/// `None` once the connection has been closed.
pub(crate) type SharedConnection = Arc<Mutex<Option<RusqliteConnection>>>;

/// Options applied when opening a database file
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Driver name reported by the connection
    pub driver_name: &'static str,
    /// Dialect reported by the connection
    pub dialect: DialectInfo,
    /// How long to wait on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            driver_name: "sqlite",
            dialect: crate::sqlite_dialect(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: SharedConnection,
    cursor_active: Arc<AtomicBool>,
    closed: AtomicBool,
    options: SqliteOptions,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with(path, SqliteOptions::default())
    }

    /// Open a SQLite database on behalf of another driver of the same family
    pub fn open_with(path: &str, options: SqliteOptions) -> Result<Self> {
        tracing::info!(path = %path, driver = options.driver_name, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let in_memory = path == ":memory:";
        let conn = if in_memory {
            RusqliteConnection::open_in_memory().map_err(|e| {
                StrataError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(StrataError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                StrataError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.busy_timeout(options.busy_timeout).map_err(|e| {
            StrataError::Connection(format!("Failed to set busy timeout: {}", e))
        })?;

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            StrataError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        if !in_memory {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| StrataError::Connection(format!("Failed to set journal mode: {}", e)))?;
        }

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            cursor_active: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            options,
        })
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                let home_path = std::path::PathBuf::from(home);
                home_path.join(rest).to_string_lossy().to_string()
            } else {
                return Err(StrataError::Configuration(
                    "Unable to determine HOME directory".into(),
                ));
            }
        } else if path.starts_with('~') {
            return Err(StrataError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        let result = if path_buf.is_relative() {
            std::env::current_dir()
                .map_err(StrataError::Io)?
                .join(path_buf)
                .to_string_lossy()
                .to_string()
        } else {
            expanded
        };

        Ok(result)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::Connection("connection is closed".into()));
        }
        if self.cursor_active.load(Ordering::Acquire) {
            return Err(StrataError::Query(
                "connection is busy: a cursor is still open on it".into(),
            ));
        }
        Ok(())
    }

    /// Run `f` against the live rusqlite connection
    fn with_conn<T>(&self, f: impl FnOnce(&RusqliteConnection) -> Result<T>) -> Result<T> {
        self.ensure_usable()?;
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| StrataError::Connection("connection is closed".into()))?;
        f(conn)
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        self.options.driver_name
    }

    fn dialect(&self) -> DialectInfo {
        self.options.dialect.clone()
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let rusqlite_params = values_to_rusqlite(params);
        self.with_conn(|conn| {
            let rows_affected = conn
                .execute(sql, params_from_iter(rusqlite_params.iter()))
                .map_err(|e| StrataError::Query(format!("Failed to execute statement: {}", e)))?;

            tracing::debug!(affected_rows = rows_affected, "statement executed");
            Ok(StatementResult {
                affected_rows: rows_affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()),
            })
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let rusqlite_params = values_to_rusqlite(params);

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| StrataError::Query(format!("Failed to prepare query: {}", e)))?;

            let columns = column_meta(&stmt);
            let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

            let mut rows = Vec::new();
            let mut query_rows = stmt
                .query(params_from_iter(rusqlite_params.iter()))
                .map_err(|e| StrataError::Query(format!("Failed to execute query: {}", e)))?;

            while let Some(row) = query_rows
                .next()
                .map_err(|e| StrataError::Query(format!("Failed to fetch row: {}", e)))?
            {
                rows.push(Row::new(column_names.clone(), row_values(row, columns.len())?));
            }

            let execution_time_ms = start_time.elapsed().as_millis() as u64;
            tracing::debug!(
                row_count = rows.len(),
                execution_time_ms = execution_time_ms,
                "query executed successfully"
            );
            Ok(QueryResult {
                id: uuid::Uuid::new_v4(),
                columns,
                rows,
                execution_time_ms,
            })
        })
    }

    async fn open_cursor(
        &self,
        sql: &str,
        params: &[Value],
        options: CursorOptions,
    ) -> Result<Box<dyn Cursor>> {
        self.ensure_usable()?;
        tracing::debug!(chunk_size = options.chunk_size, row_mode = ?options.row_mode, "creating SQLite cursor");
        Ok(Box::new(SqliteCursor::new(
            Arc::clone(&self.conn),
            Arc::clone(&self.cursor_active),
            sql.to_string(),
            values_to_rusqlite(params),
            options,
        )))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::trace!("SQLite connection already closed");
            return Ok(());
        }
        tracing::info!(driver = self.options.driver_name, "closing SQLite connection");
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| {
                StrataError::Connection(format!("Failed to close SQLite connection: {}", e))
            })?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Column metadata including declared types from the prepared statement
pub(crate) fn column_meta(stmt: &rusqlite::Statement<'_>) -> Vec<ColumnMeta> {
    stmt.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            // sqlite3_column_decltype: the type from CREATE TABLE, if any
            let data_type = col.decl_type().unwrap_or("DYNAMIC");
            ColumnMeta::new(col.name(), data_type, idx)
        })
        .collect()
}

/// Convert our Value types to rusqlite-compatible types
pub(crate) fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(if *b { 1 } else { 0 }),
        Value::Int32(i) => Sql::Integer(*i as i64),
        Value::Int64(i) => Sql::Integer(*i),
        Value::Float64(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.clone()),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::Time(t) => Sql::Text(t.to_string()),
        Value::DateTime(dt) => Sql::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => Sql::Text(dt.to_rfc3339()),
        Value::Uuid(u) => Sql::Text(u.to_string()),
        Value::Json(_) | Value::Array(_) => Sql::Text(value.to_text().unwrap_or_default()),
    }
}

/// Read every column of `row` into our Value type
pub(crate) fn row_values(row: &rusqlite::Row<'_>, column_count: usize) -> Result<Vec<Value>> {
    (0..column_count)
        .map(|idx| {
            row.get_ref(idx)
                .map(rusqlite_to_value)
                .map_err(|e| StrataError::Query(e.to_string()))
        })
        .collect()
}

fn rusqlite_to_value(value_ref: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;

    match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

//! Chunked cursor over a SQLite statement
//!
//! A rusqlite `Rows` iterator borrows its statement, which borrows the
//! connection, so the live iterator cannot be stored in an async struct. The
//! cursor instead runs a blocking worker that owns the connection lock and the
//! iterator for the cursor's lifetime and answers fetch requests over
//! channels. Only one cursor may be active per connection at a time.

use async_trait::async_trait;
use rusqlite::params_from_iter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_core::{
    ColumnMeta, Cursor, CursorOptions, CursorState, RawRow, Result, RowMode, StrataError, Value,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{SharedConnection, column_meta, row_values};

struct FetchRequest {
    max_rows: usize,
    reply: oneshot::Sender<Result<Chunk>>,
}

struct Chunk {
    rows: Vec<RawRow>,
    exhausted: bool,
}

struct Worker {
    requests: mpsc::Sender<FetchRequest>,
    handle: JoinHandle<()>,
}

/// Clears the connection's active-cursor flag when the worker exits
struct ActiveCursorGuard(Arc<AtomicBool>);

impl Drop for ActiveCursorGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cursor over one SQLite query
pub struct SqliteCursor {
    conn: SharedConnection,
    cursor_active: Arc<AtomicBool>,
    sql: String,
    params: Vec<rusqlite::types::Value>,
    options: CursorOptions,
    state: CursorState,
    columns: Vec<ColumnMeta>,
    worker: Option<Worker>,
}

impl SqliteCursor {
    pub(crate) fn new(
        conn: SharedConnection,
        cursor_active: Arc<AtomicBool>,
        sql: String,
        params: Vec<rusqlite::types::Value>,
        options: CursorOptions,
    ) -> Self {
        Self {
            conn,
            cursor_active,
            sql,
            params,
            options,
            state: CursorState::Created,
            columns: Vec::new(),
            worker: None,
        }
    }

    async fn shutdown_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.requests);
            if let Err(e) = worker.handle.await {
                tracing::warn!(error = %e, "SQLite cursor worker ended abnormally");
            }
            tracing::debug!("SQLite cursor released its statement");
        }
    }
}

#[async_trait]
impl Cursor for SqliteCursor {
    fn state(&self) -> CursorState {
        self.state
    }

    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    #[tracing::instrument(skip(self), fields(sql_preview = %self.sql.chars().take(100).collect::<String>()))]
    async fn start(&mut self) -> Result<()> {
        if self.state != CursorState::Created {
            return Err(self.state.invalid("start"));
        }
        if self
            .cursor_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StrataError::Query(
                "another cursor is already open on this connection".into(),
            ));
        }

        let guard = ActiveCursorGuard(Arc::clone(&self.cursor_active));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (requests, request_rx) = mpsc::channel(1);
        let conn = Arc::clone(&self.conn);
        let sql = self.sql.clone();
        let params = std::mem::take(&mut self.params);
        let row_mode = self.options.row_mode;

        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_worker(conn, sql, params, row_mode, ready_tx, request_rx);
        });
        self.worker = Some(Worker { requests, handle });

        match ready_rx.await {
            Ok(Ok(columns)) => {
                tracing::debug!(columns = columns.len(), "SQLite cursor opened");
                self.columns = columns;
                self.state = CursorState::Open;
                Ok(())
            }
            Ok(Err(e)) => {
                self.shutdown_worker().await;
                self.state = CursorState::Closed;
                Err(e)
            }
            Err(_) => {
                self.shutdown_worker().await;
                self.state = CursorState::Closed;
                Err(StrataError::Driver(
                    "SQLite cursor worker stopped before opening".into(),
                ))
            }
        }
    }

    async fn read(&mut self) -> Result<Vec<Vec<Value>>> {
        match self.state {
            CursorState::Exhausted => return Ok(Vec::new()),
            state if !state.can_read() => return Err(state.invalid("read")),
            _ => {}
        }

        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| StrataError::Driver("SQLite cursor has no worker".into()))?;
        let (reply, response) = oneshot::channel();
        worker
            .requests
            .send(FetchRequest {
                max_rows: self.options.chunk_size.max(1),
                reply,
            })
            .await
            .map_err(|_| StrataError::Driver("SQLite cursor worker is gone".into()))?;
        let chunk = response
            .await
            .map_err(|_| StrataError::Driver("SQLite cursor worker dropped a fetch".into()))??;

        let rows: Vec<Vec<Value>> = chunk
            .rows
            .into_iter()
            .map(|row| row.normalize(&self.columns))
            .collect();

        if chunk.exhausted {
            self.state = CursorState::Exhausted;
            self.shutdown_worker().await;
        } else {
            self.state = CursorState::Reading;
        }
        tracing::debug!(rows = rows.len(), state = ?self.state, "SQLite cursor chunk read");
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.shutdown_worker().await;
        self.state = CursorState::Closed;
        Ok(())
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if self.worker.is_some() {
            tracing::debug!("SQLite cursor dropped without close; worker will stop on its own");
        }
    }
}

fn run_worker(
    conn: SharedConnection,
    sql: String,
    params: Vec<rusqlite::types::Value>,
    row_mode: RowMode,
    ready: oneshot::Sender<Result<Vec<ColumnMeta>>>,
    mut requests: mpsc::Receiver<FetchRequest>,
) {
    let guard = conn.lock();
    let Some(connection) = guard.as_ref() else {
        let _ = ready.send(Err(StrataError::Connection("connection is closed".into())));
        return;
    };

    let mut stmt = match connection.prepare(&sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = ready.send(Err(StrataError::Query(format!(
                "Failed to prepare query: {}",
                e
            ))));
            return;
        }
    };
    let columns = column_meta(&stmt);
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    let mut rows = match stmt.query(params_from_iter(params.iter())) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = ready.send(Err(StrataError::Query(format!(
                "Failed to execute query: {}",
                e
            ))));
            return;
        }
    };

    if ready.send(Ok(columns)).is_err() {
        return;
    }

    let mut lookahead: Option<RawRow> = None;
    let mut done = false;
    while let Some(request) = requests.blocking_recv() {
        let chunk = fetch_chunk(
            &mut rows,
            &names,
            row_mode,
            request.max_rows,
            &mut lookahead,
            &mut done,
        );
        let failed = chunk.is_err();
        if request.reply.send(chunk).is_err() || failed {
            break;
        }
    }
}

/// Fill one chunk, then peek one row further so that the end of the result is
/// reported on the chunk that reaches it rather than on an extra empty read.
fn fetch_chunk(
    rows: &mut rusqlite::Rows<'_>,
    names: &[String],
    row_mode: RowMode,
    max_rows: usize,
    lookahead: &mut Option<RawRow>,
    done: &mut bool,
) -> Result<Chunk> {
    let mut out = Vec::with_capacity(max_rows);
    if let Some(row) = lookahead.take() {
        out.push(row);
    }

    while out.len() < max_rows && !*done {
        match next_row(rows, names, row_mode)? {
            Some(row) => out.push(row),
            None => *done = true,
        }
    }

    if !*done {
        match next_row(rows, names, row_mode)? {
            Some(row) => *lookahead = Some(row),
            None => *done = true,
        }
    }

    Ok(Chunk {
        rows: out,
        exhausted: *done,
    })
}

fn next_row(
    rows: &mut rusqlite::Rows<'_>,
    names: &[String],
    row_mode: RowMode,
) -> Result<Option<RawRow>> {
    let Some(row) = rows
        .next()
        .map_err(|e| StrataError::Query(format!("Failed to fetch row: {}", e)))?
    else {
        return Ok(None);
    };
    let values = row_values(row, names.len())?;
    Ok(Some(match row_mode {
        RowMode::Raw => RawRow::Positional(values),
        RowMode::Object => RawRow::Named(names.iter().cloned().zip(values).collect()),
    }))
}

#[cfg(test)]
mod tests {
    use crate::SqliteConnection;
    use pretty_assertions::assert_eq;
    use strata_core::{Connection, CursorOptions, CursorState, RowMode, StrataError, Value};

    async fn seeded(rows: i64) -> SqliteConnection {
        let conn = SqliteConnection::open(":memory:").expect("Failed to open in-memory db");
        conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)", &[])
            .await
            .expect("Failed to create table");
        for id in 1..=rows {
            conn.execute(
                "INSERT INTO items (id, label) VALUES (?, ?)",
                &[Value::Int64(id), Value::String(format!("item-{id}"))],
            )
            .await
            .expect("Failed to insert");
        }
        conn
    }

    #[tokio::test]
    async fn reads_in_chunks_until_exhausted() {
        let conn = seeded(12).await;
        let mut cursor = conn
            .open_cursor(
                "SELECT id, label FROM items ORDER BY id",
                &[],
                CursorOptions::default().with_chunk_size(5),
            )
            .await
            .expect("Failed to open cursor");
        assert_eq!(cursor.state(), CursorState::Created);

        cursor.start().await.expect("Failed to start cursor");
        assert_eq!(cursor.state(), CursorState::Open);
        assert_eq!(cursor.columns().len(), 2);

        let mut sizes = Vec::new();
        while cursor.state() != CursorState::Exhausted {
            sizes.push(cursor.read().await.expect("Failed to read").len());
        }
        assert_eq!(sizes, vec![5, 5, 2]);
        assert!(cursor.read().await.expect("read after exhaustion").is_empty());

        cursor.close().await.expect("Failed to close");
        cursor.close().await.expect("second close is a no-op");
        assert_eq!(cursor.state(), CursorState::Closed);
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk_size_needs_no_extra_read() {
        let conn = seeded(10).await;
        let mut cursor = conn
            .open_cursor("SELECT * FROM items", &[], CursorOptions::default().with_chunk_size(5))
            .await
            .unwrap();
        cursor.start().await.unwrap();

        let mut reads = 0;
        while cursor.state() != CursorState::Exhausted {
            cursor.read().await.unwrap();
            reads += 1;
        }
        assert_eq!(reads, 2);
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn object_rows_are_normalized_to_column_order() {
        let conn = seeded(2).await;
        let mut cursor = conn
            .open_cursor(
                "SELECT label, id FROM items WHERE id > ? ORDER BY id",
                &[Value::Int64(1)],
                CursorOptions::default().with_row_mode(RowMode::Object),
            )
            .await
            .unwrap();
        cursor.start().await.unwrap();
        let rows = cursor.read().await.unwrap();
        assert_eq!(rows, vec![vec![Value::from("item-2"), Value::Int64(2)]]);
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn connection_is_usable_again_after_cursor_closes() {
        let conn = seeded(3).await;
        let mut cursor = conn
            .open_cursor("SELECT * FROM items", &[], CursorOptions::default())
            .await
            .unwrap();
        cursor.start().await.unwrap();

        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, StrataError::Query(_)));

        cursor.close().await.unwrap();
        let result = conn.query("SELECT count(*) FROM items", &[]).await.unwrap();
        assert_eq!(result.scalar(), Some(&Value::Int64(3)));
    }

    #[tokio::test]
    async fn reading_before_start_or_after_close_fails() {
        let conn = seeded(1).await;
        let mut cursor = conn
            .open_cursor("SELECT * FROM items", &[], CursorOptions::default())
            .await
            .unwrap();
        assert!(cursor.read().await.is_err());

        cursor.close().await.unwrap();
        assert!(cursor.read().await.is_err());
        assert!(cursor.start().await.is_err());
    }

    #[tokio::test]
    async fn bad_sql_fails_on_start() {
        let conn = seeded(0).await;
        let mut cursor = conn
            .open_cursor("SELECT * FROM nowhere", &[], CursorOptions::default())
            .await
            .unwrap();
        let err = cursor.start().await.unwrap_err();
        assert!(matches!(err, StrataError::Query(_)));
        assert_eq!(cursor.state(), CursorState::Closed);

        // the failed cursor released the connection
        conn.query("SELECT 1", &[]).await.unwrap();
    }
}

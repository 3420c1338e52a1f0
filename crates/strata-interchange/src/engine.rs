//! Export engine
//!
//! One [`Export`] drives one cursor over one table to exhaustion:
//!
//! 1. resolve the table's columns and apply the include/exclude lists
//! 2. build the select (and optional count) query
//! 3. open and start a cursor, then read chunk after chunk into the writer
//! 4. finish the writer and publish a final snapshot
//!
//! Cancellation is cooperative and observed once per chunk. Whatever happens,
//! the cursor and the connection are closed exactly once before `run` returns.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    ColumnMeta, Connection, Cursor, CursorOptions, CursorState, FilterInput, Result, StrataError,
    TableOrView,
};
use strata_query::{SelectTop, SelectTopQuery};
use tokio_util::sync::CancellationToken;

use crate::options::{ExportOptions, ExportProgress};
use crate::writers::FormatWriter;

/// Progress callback for export operations
pub type ExportProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Counters for a finished or cancelled export
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub rows_exported: u64,
    pub chunks_read: u64,
    pub total_rows: Option<u64>,
    pub elapsed_ms: u64,
}

/// How an export ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed(ExportSummary),
    Cancelled(ExportSummary),
}

impl ExportOutcome {
    pub fn summary(&self) -> &ExportSummary {
        match self {
            ExportOutcome::Completed(summary) | ExportOutcome::Cancelled(summary) => summary,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportOutcome::Cancelled(_))
    }
}

enum LoopEnd {
    Exhausted,
    Cancelled,
}

/// A single table export. Consumed by [`Export::run`].
pub struct Export {
    connection: Arc<dyn Connection>,
    table: TableOrView,
    filters: FilterInput,
    options: ExportOptions,
    writer: Box<dyn FormatWriter>,
    cancel: CancellationToken,
    progress_callback: Option<ExportProgressCallback>,
    summary: ExportSummary,
}

impl Export {
    pub fn new(
        connection: Arc<dyn Connection>,
        table: TableOrView,
        filters: FilterInput,
        options: ExportOptions,
        writer: Box<dyn FormatWriter>,
    ) -> Self {
        Self {
            connection,
            table,
            filters,
            options,
            writer,
            cancel: CancellationToken::new(),
            progress_callback: None,
            summary: ExportSummary::default(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress_callback(mut self, callback: ExportProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Token that stops this export at the next chunk boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn report_progress(&self, completed: bool) {
        let progress = ExportProgress::new(
            self.summary.rows_exported,
            self.summary.total_rows,
            completed,
        );
        tracing::debug!(
            rows = progress.rows_exported,
            total = ?progress.total_rows,
            completed,
            "export progress"
        );
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    /// Run the export to completion, cancellation or failure
    #[tracing::instrument(skip(self), fields(table = %self.table.name))]
    pub async fn run(mut self) -> Result<ExportOutcome> {
        let started = Instant::now();
        tracing::info!("export started");

        let mut cursor: Option<Box<dyn Cursor>> = None;
        let result = self.drive(&mut cursor).await;

        if let Some(mut cursor) = cursor
            && let Err(e) = cursor.close().await
        {
            tracing::warn!(error = %e, "failed to close export cursor");
        }
        if let Err(e) = self.connection.close().await {
            tracing::warn!(error = %e, "failed to close export connection");
        }

        self.summary.elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = self.summary.clone();
        match result {
            Ok(LoopEnd::Exhausted) => {
                tracing::info!(
                    rows = summary.rows_exported,
                    elapsed_ms = summary.elapsed_ms,
                    "export finished"
                );
                Ok(ExportOutcome::Completed(summary))
            }
            Ok(LoopEnd::Cancelled) => {
                tracing::info!(rows = summary.rows_exported, "export cancelled");
                Ok(ExportOutcome::Cancelled(summary))
            }
            Err(e) => {
                tracing::error!(error = %e, rows = summary.rows_exported, "export failed");
                Err(e)
            }
        }
    }

    async fn drive(&mut self, slot: &mut Option<Box<dyn Cursor>>) -> Result<LoopEnd> {
        let table_columns = self.connection.table_columns(&self.table).await?;
        let selects = self.resolve_selects(&table_columns)?;
        let query = self.build_query(table_columns, selects)?;

        if self.options.count_rows {
            let total =
                count_rows(self.connection.as_ref(), &query, self.options.row_limit).await?;
            self.summary.total_rows = Some(total);
        }

        let options = CursorOptions::default().with_chunk_size(self.options.chunk_size);
        let cursor = slot.insert(
            self.connection
                .open_cursor(&query.query, &query.params, options)
                .await?,
        );
        cursor.start().await?;
        self.writer.begin(cursor.columns())?;

        loop {
            let rows = cursor.read().await?;
            self.summary.chunks_read += 1;
            if self.cancel.is_cancelled() {
                return Ok(LoopEnd::Cancelled);
            }

            if !rows.is_empty() {
                self.writer.write_chunk(&rows)?;
                self.summary.rows_exported += rows.len() as u64;
                self.report_progress(false);
            }

            if rows.is_empty() || cursor.state() == CursorState::Exhausted {
                break;
            }
        }

        self.writer.finish()?;
        self.report_progress(true);
        Ok(LoopEnd::Exhausted)
    }

    /// Column names to select, or empty for `*`
    fn resolve_selects(&self, columns: &[ColumnMeta]) -> Result<Vec<String>> {
        let included = &self.options.included_columns;
        let excluded = &self.options.excluded_columns;
        if included.is_empty() && excluded.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(missing) = included
            .iter()
            .find(|name| !columns.iter().any(|c| &c.name == *name))
        {
            return Err(StrataError::Configuration(format!(
                "Column '{}' does not exist in {}",
                missing, self.table.name
            )));
        }

        let selects: Vec<String> = columns
            .iter()
            .filter(|c| included.is_empty() || included.contains(&c.name))
            .filter(|c| !excluded.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();
        if selects.is_empty() {
            return Err(StrataError::Configuration(format!(
                "No columns of {} are left to export",
                self.table.name
            )));
        }
        Ok(selects)
    }

    fn build_query(&self, columns: Vec<ColumnMeta>, selects: Vec<String>) -> Result<SelectTopQuery> {
        SelectTop::new(self.table.clone())
            .dialect(self.connection.dialect())
            .columns(columns)
            .selects(selects)
            .filters(self.filters.clone())
            .joiner(self.options.filter_joiner)
            .order_by(self.options.order_by.clone())
            .limit(self.options.row_limit)
            .build()
    }
}

async fn count_rows(
    connection: &dyn Connection,
    query: &SelectTopQuery,
    row_limit: Option<u64>,
) -> Result<u64> {
    let result = connection.query(&query.count_query, &query.params).await?;
    let count = result
        .scalar()
        .and_then(|v| v.as_i64())
        .map(|n| n.max(0) as u64)
        .unwrap_or(0);
    Ok(match row_limit {
        Some(limit) => count.min(limit),
        None => count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_core::{
        DialectInfo, FilterOperator, QueryResult, StatementResult, TableFilter, Value,
    };
    use strata_drivers::sqlite::SqliteConnection;

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicUsize>);

    impl Counter {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Default)]
    struct Tracker {
        reads: Counter,
        cursor_closes: Counter,
        connection_closes: Counter,
    }

    struct TrackingCursor {
        inner: Box<dyn Cursor>,
        tracker: Tracker,
    }

    #[async_trait]
    impl Cursor for TrackingCursor {
        fn state(&self) -> CursorState {
            self.inner.state()
        }

        fn columns(&self) -> &[ColumnMeta] {
            self.inner.columns()
        }

        async fn start(&mut self) -> Result<()> {
            self.inner.start().await
        }

        async fn read(&mut self) -> Result<Vec<Vec<Value>>> {
            self.tracker.reads.bump();
            self.inner.read().await
        }

        async fn close(&mut self) -> Result<()> {
            self.tracker.cursor_closes.bump();
            self.inner.close().await
        }
    }

    struct TrackingConnection {
        inner: SqliteConnection,
        tracker: Tracker,
    }

    #[async_trait]
    impl Connection for TrackingConnection {
        fn driver_name(&self) -> &str {
            self.inner.driver_name()
        }

        fn dialect(&self) -> DialectInfo {
            self.inner.dialect()
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
            self.inner.execute(sql, params).await
        }

        async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
            self.inner.query(sql, params).await
        }

        async fn open_cursor(
            &self,
            sql: &str,
            params: &[Value],
            options: CursorOptions,
        ) -> Result<Box<dyn Cursor>> {
            let inner = self.inner.open_cursor(sql, params, options).await?;
            Ok(Box::new(TrackingCursor {
                inner,
                tracker: self.tracker.clone(),
            }))
        }

        async fn close(&self) -> Result<()> {
            self.tracker.connection_closes.bump();
            self.inner.close().await
        }

        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }
    }

    /// Writer that keeps chunks in memory and can fail on a given chunk
    #[derive(Clone, Default)]
    struct MemoryWriter {
        chunks: Arc<Mutex<Vec<Vec<Vec<Value>>>>>,
        columns: Arc<Mutex<Vec<String>>>,
        finished: Counter,
        fail_on_chunk: Option<usize>,
    }

    impl FormatWriter for MemoryWriter {
        fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()> {
            *self.columns.lock().unwrap() = columns.iter().map(|c| c.name.clone()).collect();
            Ok(())
        }

        fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()> {
            let mut chunks = self.chunks.lock().unwrap();
            if self.fail_on_chunk == Some(chunks.len()) {
                return Err(StrataError::Write("disk full".into()));
            }
            chunks.push(rows.to_vec());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished.bump();
            Ok(())
        }
    }

    async fn seeded(rows: i64) -> (Arc<dyn Connection>, Tracker) {
        let inner = SqliteConnection::open(":memory:").unwrap();
        inner
            .execute(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, secret TEXT)",
                &[],
            )
            .await
            .unwrap();
        for id in 1..=rows {
            inner
                .execute(
                    "INSERT INTO items (id, label, secret) VALUES (?, ?, ?)",
                    &[
                        Value::Int64(id),
                        Value::String(format!("item-{id}")),
                        Value::from("hidden"),
                    ],
                )
                .await
                .unwrap();
        }
        let tracker = Tracker::default();
        let conn = Arc::new(TrackingConnection {
            inner,
            tracker: tracker.clone(),
        });
        (conn, tracker)
    }

    fn options(chunk_size: usize) -> ExportOptions {
        ExportOptions {
            chunk_size,
            ..ExportOptions::default()
        }
    }

    fn collect_progress() -> (ExportProgressCallback, Arc<Mutex<Vec<ExportProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ExportProgressCallback =
            Box::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    #[tokio::test]
    async fn exports_every_row_in_ceil_n_over_c_reads() {
        let (conn, tracker) = seeded(23).await;
        let writer = MemoryWriter::default();
        let (callback, progress) = collect_progress();

        let outcome = Export::new(
            conn,
            TableOrView::table("items"),
            FilterInput::default(),
            options(5),
            Box::new(writer.clone()),
        )
        .with_progress_callback(callback)
        .run()
        .await
        .unwrap();

        let summary = outcome.summary();
        assert!(!outcome.is_cancelled());
        assert_eq!(summary.rows_exported, 23);
        assert_eq!(summary.chunks_read, 5);
        assert_eq!(summary.total_rows, Some(23));
        assert_eq!(tracker.reads.get(), 5);
        assert_eq!(writer.finished.get(), 1);

        let progress = progress.lock().unwrap();
        let last = progress.last().unwrap();
        assert_eq!(last.rows_exported, 23);
        assert!(last.completed);
        assert_eq!(progress.iter().filter(|p| p.completed).count(), 1);

        assert_eq!(tracker.cursor_closes.get(), 1);
        assert_eq!(tracker.connection_closes.get(), 1);
    }

    #[tokio::test]
    async fn exact_multiple_needs_no_trailing_read() {
        let (conn, tracker) = seeded(10).await;
        let writer = MemoryWriter::default();
        Export::new(
            conn,
            TableOrView::table("items"),
            FilterInput::default(),
            options(5),
            Box::new(writer.clone()),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(tracker.reads.get(), 2);
        assert_eq!(writer.chunks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelling_stops_at_the_next_chunk_boundary() {
        let (conn, tracker) = seeded(50).await;
        let writer = MemoryWriter::default();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let callback: ExportProgressCallback = Box::new(move |p| {
            if p.rows_exported >= 10 {
                trigger.cancel();
            }
        });

        let outcome = Export::new(
            conn,
            TableOrView::table("items"),
            FilterInput::default(),
            options(10),
            Box::new(writer.clone()),
        )
        .with_cancellation(token)
        .with_progress_callback(callback)
        .run()
        .await
        .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.summary().rows_exported, 10);
        assert_eq!(writer.chunks.lock().unwrap().len(), 1);
        assert_eq!(writer.finished.get(), 0);
        assert_eq!(tracker.cursor_closes.get(), 1);
        assert_eq!(tracker.connection_closes.get(), 1);
    }

    #[tokio::test]
    async fn write_failure_still_closes_everything() {
        let (conn, tracker) = seeded(30).await;
        let writer = MemoryWriter {
            fail_on_chunk: Some(1),
            ..MemoryWriter::default()
        };

        let err = Export::new(
            conn,
            TableOrView::table("items"),
            FilterInput::default(),
            options(10),
            Box::new(writer),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, StrataError::Write(ref m) if m == "disk full"));
        assert_eq!(tracker.cursor_closes.get(), 1);
        assert_eq!(tracker.connection_closes.get(), 1);
    }

    #[tokio::test]
    async fn query_failure_closes_the_connection() {
        let (conn, tracker) = seeded(1).await;
        let err = Export::new(
            conn,
            TableOrView::table("missing"),
            FilterInput::default(),
            options(10),
            Box::new(MemoryWriter::default()),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, StrataError::Query(_)));
        assert_eq!(tracker.cursor_closes.get(), 0);
        assert_eq!(tracker.connection_closes.get(), 1);
    }

    #[tokio::test]
    async fn filters_columns_and_limits_apply() {
        let (conn, _) = seeded(20).await;
        let writer = MemoryWriter::default();
        let filters = FilterInput::Structured(vec![TableFilter::new(
            "id",
            FilterOperator::Gt,
            Value::Int64(5),
        )]);

        let outcome = Export::new(
            conn,
            TableOrView::table("items"),
            filters,
            ExportOptions {
                chunk_size: 4,
                excluded_columns: vec!["secret".into()],
                row_limit: Some(6),
                order_by: vec![strata_query::OrderBy::desc("id")],
                ..ExportOptions::default()
            },
            Box::new(writer.clone()),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.summary().total_rows, Some(6));
        assert_eq!(*writer.columns.lock().unwrap(), vec!["id", "label"]);
        let rows: Vec<Vec<Value>> = writer.chunks.lock().unwrap().concat();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], vec![Value::Int64(20), Value::from("item-20")]);
    }

    #[tokio::test]
    async fn unknown_included_column_is_a_configuration_error() {
        let (conn, tracker) = seeded(1).await;
        let err = Export::new(
            conn,
            TableOrView::table("items"),
            FilterInput::default(),
            ExportOptions {
                included_columns: vec!["nope".into()],
                ..ExportOptions::default()
            },
            Box::new(MemoryWriter::default()),
        )
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, StrataError::Configuration(_)));
        assert_eq!(tracker.connection_closes.get(), 1);
    }
}

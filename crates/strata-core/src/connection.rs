//! Connection trait

use crate::{
    ColumnMeta, Cursor, CursorOptions, DialectInfo, QueryResult, Result, StatementResult,
    TableOrView, Value,
};
use async_trait::async_trait;

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "libsql")
    fn driver_name(&self) -> &str;

    /// SQL dialect spoken by this connection
    fn dialect(&self) -> DialectInfo;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query and collect every row. Meant for small results; use
    /// [`Connection::open_cursor`] for anything unbounded.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Create a cursor over `sql`. The cursor is returned in the `Created`
    /// state; nothing runs until [`Cursor::start`].
    async fn open_cursor(
        &self,
        sql: &str,
        params: &[Value],
        options: CursorOptions,
    ) -> Result<Box<dyn Cursor>>;

    /// Declared columns of a table or view.
    ///
    /// The default runs a zero-row select and reads the statement's column
    /// metadata.
    async fn table_columns(&self, table: &TableOrView) -> Result<Vec<ColumnMeta>> {
        let escaper = self.dialect().escaper();
        let sql = format!(
            "SELECT * FROM {} LIMIT 0",
            escaper.quote_qualified([table.schema.as_deref(), Some(table.name.as_str())])
        );
        tracing::debug!(table = %table.name, "resolving table columns");
        Ok(self.query(&sql, &[]).await?.columns)
    }

    /// Close the connection. Calling it again is a no-op; any other call after
    /// closing fails with a connection error.
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

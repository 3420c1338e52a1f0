//! libSQL server connection over Hrana-over-HTTP

use async_trait::async_trait;
use futures::StreamExt;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use strata_core::{
    Connection, Cursor, CursorOptions, DialectInfo, QueryResult, Result, Row, StatementResult,
    StrataError, Value,
};

use crate::cursor::{EntryStream, LibsqlRemoteCursor};
use crate::hrana::{
    Batch, BatchStep, CursorRequest, PipelineRequest, PipelineResponse, Stmt, StmtResult,
    StreamRequest, StreamResponse, StreamResult, column_meta,
};

/// Default timeout for one pipeline request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Rewrite a `libsql://` location to the HTTPS endpoint that serves it
pub fn http_base_url(location: &str) -> String {
    let url = match location.strip_prefix("libsql://") {
        Some(rest) => format!("https://{}", rest),
        None => location.to_string(),
    };
    url.trim_end_matches('/').to_string()
}

/// Whether a location names a server rather than a local file
pub fn is_remote_location(location: &str) -> bool {
    ["libsql://", "http://", "https://"]
        .iter()
        .any(|scheme| location.starts_with(scheme))
}

/// HTTP plumbing shared by a remote connection and its cursors
#[derive(Clone)]
pub(crate) struct RemoteSession {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl RemoteSession {
    pub(crate) fn new(location: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        // No whole-request timeout on the client: cursor bodies stream for
        // as long as the export runs. Pipelines set one per request.
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StrataError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: http_base_url(location),
            auth_token,
            timeout,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize>(&self, url: &str, body: &B, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, url = %url, "libSQL request failed");
            StrataError::Connection(format!("Failed to reach libSQL server: {}", e))
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StrataError::Connection(
                "libSQL server rejected the auth token".into(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrataError::Connection(format!(
                "libSQL server returned status {}: {}",
                status, body
            )));
        }
        Ok(response)
    }

    /// Run one statement on a fresh stream and close the stream again
    pub(crate) async fn execute_once(&self, stmt: Stmt) -> Result<StmtResult> {
        let body = PipelineRequest {
            baton: None,
            requests: vec![StreamRequest::Execute { stmt }, StreamRequest::Close],
        };
        let url = format!("{}/v3/pipeline", self.base_url);
        let response: PipelineResponse = self
            .post(&url, &body, Some(self.timeout))
            .await?
            .json()
            .await
            .map_err(|e| StrataError::Driver(format!("Invalid libSQL response: {}", e)))?;

        match response.results.into_iter().next() {
            Some(StreamResult::Ok {
                response: StreamResponse::Execute { result },
            }) => Ok(result),
            Some(StreamResult::Error { error }) => Err(error.into()),
            _ => Err(StrataError::Driver(
                "libSQL response is missing the execute result".into(),
            )),
        }
    }

    /// Open a cursor stream and hand back its newline-delimited body
    pub(crate) async fn open_cursor_stream(&self, stmt: Stmt) -> Result<EntryStream> {
        let body = CursorRequest {
            baton: None,
            batch: Batch {
                steps: vec![BatchStep { stmt }],
            },
        };
        let url = format!("{}/v3/cursor", self.base_url);
        let response = self.post(&url, &body, None).await?;
        Ok(response.bytes_stream().map_err(|e| e.to_string()).boxed())
    }

    /// Close a server-side stream
    pub(crate) async fn close_stream(&self, baton: String, base_url: Option<&str>) -> Result<()> {
        let body = PipelineRequest {
            baton: Some(baton),
            requests: vec![StreamRequest::Close],
        };
        let url = format!("{}/v3/pipeline", base_url.unwrap_or(&self.base_url));
        self.post(&url, &body, Some(self.timeout)).await?;
        Ok(())
    }
}

/// Connection to a libSQL server
pub struct LibsqlRemoteConnection {
    session: RemoteSession,
    closed: AtomicBool,
}

impl LibsqlRemoteConnection {
    pub fn new(location: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let session = RemoteSession::new(location, auth_token, timeout)?;
        tracing::info!(url = %session.base_url(), "libSQL remote connection created");
        Ok(Self {
            session,
            closed: AtomicBool::new(false),
        })
    }

    /// Create a connection and make one round-trip, so an unreachable server
    /// or a rejected token fails here instead of at the first query.
    pub async fn connect(
        location: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let conn = Self::new(location, auth_token, timeout)?;
        conn.session
            .execute_once(Stmt::new("SELECT 1", &[], false))
            .await
            .map_err(|e| match e {
                StrataError::Connection(_) => e,
                other => StrataError::Connection(format!(
                    "libSQL server failed the connection check: {}",
                    other
                )),
            })?;
        tracing::debug!(url = %conn.session.base_url(), "libSQL server reachable");
        Ok(conn)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StrataError::Connection("connection is closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for LibsqlRemoteConnection {
    fn driver_name(&self) -> &str {
        "libsql"
    }

    fn dialect(&self) -> DialectInfo {
        crate::libsql_dialect()
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let result = self.session.execute_once(Stmt::new(sql, params, false)).await?;
        tracing::debug!(affected_rows = result.affected_row_count, "statement executed");
        Ok(StatementResult {
            affected_rows: result.affected_row_count,
            last_insert_id: result.last_insert_rowid.and_then(|id| id.parse().ok()),
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let start_time = Instant::now();
        let result = self.session.execute_once(Stmt::new(sql, params, true)).await?;

        let columns = column_meta(&result.cols);
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                let values = row
                    .into_iter()
                    .map(|v| v.into_value())
                    .collect::<Result<Vec<_>>>()?;
                Ok(Row::new(names.clone(), values))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(row_count = rows.len(), "query executed");
        Ok(QueryResult {
            id: uuid::Uuid::new_v4(),
            columns,
            rows,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    async fn open_cursor(
        &self,
        sql: &str,
        params: &[Value],
        options: CursorOptions,
    ) -> Result<Box<dyn Cursor>> {
        self.ensure_open()?;
        Ok(Box::new(LibsqlRemoteCursor::new(
            self.session.clone(),
            Stmt::new(sql, params, true),
            options,
        )))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(url = %self.session.base_url(), "libSQL remote connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libsql_scheme_maps_to_https() {
        assert_eq!(
            http_base_url("libsql://db-org.turso.io/"),
            "https://db-org.turso.io"
        );
        assert_eq!(http_base_url("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn remote_locations_are_detected_by_scheme() {
        assert!(is_remote_location("libsql://db.example"));
        assert!(is_remote_location("https://db.example"));
        assert!(!is_remote_location("/var/data/app.db"));
        assert!(!is_remote_location(":memory:"));
    }

    #[tokio::test]
    async fn closed_connection_rejects_work_without_network() {
        let conn = LibsqlRemoteConnection::new("http://127.0.0.1:9", None, DEFAULT_TIMEOUT)
            .expect("client should build");
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());

        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, StrataError::Connection(_)));
        assert!(conn.open_cursor("SELECT 1", &[], CursorOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn connect_checks_the_server_before_returning() {
        let err = LibsqlRemoteConnection::connect(
            "http://127.0.0.1:9",
            Some("token".into()),
            Duration::from_secs(2),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), strata_core::ErrorKind::Connection);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        let conn = LibsqlRemoteConnection::new(
            "http://127.0.0.1:9",
            Some("token".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, StrataError::Connection(_)));
    }
}

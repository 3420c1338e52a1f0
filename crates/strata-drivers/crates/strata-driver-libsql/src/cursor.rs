//! Streaming cursor over the libSQL `/v3/cursor` endpoint
//!
//! The response body is newline-delimited JSON: one header line carrying the
//! stream baton, then `step_begin`, one `row` entry per row, and `step_end`.
//! Rows always arrive named and are normalized to column order.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use strata_core::{
    ColumnMeta, Cursor, CursorOptions, CursorState, RawRow, Result, StrataError, Value,
};

use crate::hrana::{CursorEntry, CursorResponse, Stmt, column_meta};
use crate::remote::RemoteSession;

/// Body of a cursor response
pub type EntryStream = BoxStream<'static, std::result::Result<Bytes, String>>;

/// Splits a byte stream into JSON lines
pub struct EntryReader {
    stream: EntryStream,
    buffer: Vec<u8>,
    finished: bool,
}

impl EntryReader {
    pub fn new(stream: EntryStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
        }
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.finished {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    self.buffer.clear();
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(StrataError::Connection(format!(
                        "libSQL cursor stream failed: {}",
                        e
                    )));
                }
                None => self.finished = true,
            }
        }
    }

    /// Next JSON entry, or `None` at end of body
    pub async fn next_entry<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.next_line().await? {
            Some(line) => serde_json::from_slice(&line)
                .map(Some)
                .map_err(|e| StrataError::Driver(format!("Invalid libSQL cursor entry: {}", e))),
            None => Ok(None),
        }
    }
}

/// Row-level view of a cursor body with one row of lookahead
pub struct RowStream {
    reader: EntryReader,
    names: Vec<String>,
    lookahead: Option<RawRow>,
    done: bool,
}

impl RowStream {
    /// Read up to the `step_begin` entry and return the result columns
    pub async fn begin(mut reader: EntryReader) -> Result<(Self, Vec<ColumnMeta>)> {
        loop {
            match reader.next_entry::<CursorEntry>().await? {
                Some(CursorEntry::StepBegin { cols }) => {
                    let columns = column_meta(&cols);
                    let names = columns.iter().map(|c| c.name.clone()).collect();
                    let stream = Self {
                        reader,
                        names,
                        lookahead: None,
                        done: false,
                    };
                    return Ok((stream, columns));
                }
                Some(CursorEntry::StepError { error }) | Some(CursorEntry::Error { error }) => {
                    return Err(error.into());
                }
                Some(other) => {
                    tracing::trace!(entry = ?other, "skipping cursor entry before step_begin");
                }
                None => {
                    return Err(StrataError::Driver(
                        "libSQL cursor ended before the statement started".into(),
                    ));
                }
            }
        }
    }

    async fn next_row(&mut self) -> Result<Option<RawRow>> {
        if self.done {
            return Ok(None);
        }
        match self.reader.next_entry::<CursorEntry>().await? {
            Some(CursorEntry::Row { row }) => {
                let values = row
                    .into_iter()
                    .map(|v| v.into_value())
                    .collect::<Result<Vec<Value>>>()?;
                Ok(Some(RawRow::Named(
                    self.names.iter().cloned().zip(values).collect(),
                )))
            }
            Some(CursorEntry::StepEnd) | None => {
                self.done = true;
                Ok(None)
            }
            Some(CursorEntry::StepError { error }) | Some(CursorEntry::Error { error }) => {
                self.done = true;
                Err(error.into())
            }
            Some(CursorEntry::StepBegin { .. }) => {
                self.done = true;
                Err(StrataError::Driver(
                    "libSQL cursor started a second statement".into(),
                ))
            }
        }
    }

    /// Up to `max_rows` rows, and whether the result is now exhausted
    pub async fn fetch(&mut self, max_rows: usize) -> Result<(Vec<RawRow>, bool)> {
        let mut rows = Vec::with_capacity(max_rows);
        if let Some(row) = self.lookahead.take() {
            rows.push(row);
        }
        while rows.len() < max_rows {
            match self.next_row().await? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        if !self.done {
            self.lookahead = self.next_row().await?;
        }
        Ok((rows, self.done && self.lookahead.is_none()))
    }
}

/// Cursor over a libSQL server query
pub struct LibsqlRemoteCursor {
    session: RemoteSession,
    stmt: Option<Stmt>,
    options: CursorOptions,
    state: CursorState,
    columns: Vec<ColumnMeta>,
    rows: Option<RowStream>,
    baton: Option<String>,
    stream_url: Option<String>,
}

impl LibsqlRemoteCursor {
    pub(crate) fn new(session: RemoteSession, stmt: Stmt, options: CursorOptions) -> Self {
        Self {
            session,
            stmt: Some(stmt),
            options,
            state: CursorState::Created,
            columns: Vec::new(),
            rows: None,
            baton: None,
            stream_url: None,
        }
    }

    async fn release(&mut self) {
        self.rows = None;
        if let Some(baton) = self.baton.take() {
            if let Err(e) = self
                .session
                .close_stream(baton, self.stream_url.as_deref())
                .await
            {
                // the server expires idle streams on its own
                tracing::warn!(error = %e, "failed to close libSQL cursor stream");
            }
        }
    }
}

#[async_trait]
impl Cursor for LibsqlRemoteCursor {
    fn state(&self) -> CursorState {
        self.state
    }

    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != CursorState::Created {
            return Err(self.state.invalid("start"));
        }
        let stmt = self
            .stmt
            .take()
            .ok_or_else(|| StrataError::Driver("libSQL cursor has no statement".into()))?;

        let opened = async {
            let mut reader = EntryReader::new(self.session.open_cursor_stream(stmt).await?);
            let header: CursorResponse = reader.next_entry().await?.ok_or_else(|| {
                StrataError::Driver("libSQL cursor response has no header".into())
            })?;
            self.baton = header.baton;
            self.stream_url = header.base_url;
            RowStream::begin(reader).await
        }
        .await;

        match opened {
            Ok((rows, columns)) => {
                tracing::debug!(columns = columns.len(), "libSQL cursor opened");
                self.rows = Some(rows);
                self.columns = columns;
                self.state = CursorState::Open;
                Ok(())
            }
            Err(e) => {
                self.release().await;
                self.state = CursorState::Closed;
                Err(e)
            }
        }
    }

    async fn read(&mut self) -> Result<Vec<Vec<Value>>> {
        match self.state {
            CursorState::Exhausted => return Ok(Vec::new()),
            state if !state.can_read() => return Err(state.invalid("read")),
            _ => {}
        }
        let stream = self
            .rows
            .as_mut()
            .ok_or_else(|| StrataError::Driver("libSQL cursor has no open stream".into()))?;

        let (raw, exhausted) = stream.fetch(self.options.chunk_size.max(1)).await?;
        let rows = raw
            .into_iter()
            .map(|row| row.normalize(&self.columns))
            .collect::<Vec<_>>();

        self.state = if exhausted {
            CursorState::Exhausted
        } else {
            CursorState::Reading
        };
        tracing::debug!(rows = rows.len(), state = ?self.state, "libSQL cursor chunk read");
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.release().await;
        self.state = CursorState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn body(chunks: &[&str]) -> EntryReader {
        let chunks: Vec<std::result::Result<Bytes, String>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        EntryReader::new(stream::iter(chunks).boxed())
    }

    fn row(id: i64, name: &str) -> String {
        format!(
            r#"{{"type":"row","row":[{{"type":"integer","value":"{}"}},{{"type":"text","value":"{}"}}]}}"#,
            id, name
        )
    }

    fn cursor_body(rows: usize) -> Vec<String> {
        let mut lines = vec![
            r#"{"type":"step_begin","step":0,"cols":[{"name":"id","decltype":"INTEGER"},{"name":"name","decltype":"TEXT"}]}"#
                .to_string(),
        ];
        for i in 0..rows {
            lines.push(row(i as i64, &format!("n{}", i)));
        }
        lines.push(r#"{"type":"step_end","affected_row_count":0}"#.to_string());
        lines
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let mut reader = body(&["{\"baton\":\"b", "1\",\"base_url\":null}\n\n{\"type\":", "\"step_end\"}"]);
        let header: CursorResponse = reader.next_entry().await.unwrap().unwrap();
        assert_eq!(header.baton.as_deref(), Some("b1"));
        let end: CursorEntry = reader.next_entry().await.unwrap().unwrap();
        assert!(matches!(end, CursorEntry::StepEnd));
        assert!(reader.next_entry::<CursorEntry>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_failure_is_a_connection_error() {
        let chunks: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"baton\":null}\n")),
            Err("reset by peer".to_string()),
        ];
        let mut reader = EntryReader::new(stream::iter(chunks).boxed());
        reader.next_entry::<CursorResponse>().await.unwrap();
        let err = reader.next_entry::<CursorEntry>().await.unwrap_err();
        assert!(matches!(err, StrataError::Connection(_)));
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk_size_is_exhausted_on_last_chunk() {
        let lines = cursor_body(4).join("\n");
        let (mut stream, columns) = RowStream::begin(body(&[lines.as_str()])).await.unwrap();
        assert_eq!(columns[1].data_type, "TEXT");

        let (first, exhausted) = stream.fetch(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(!exhausted);

        let (second, exhausted) = stream.fetch(2).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(exhausted);
    }

    #[tokio::test]
    async fn named_rows_normalize_to_column_order() {
        let lines = cursor_body(3).join("\n") + "\n";
        let (mut stream, columns) = RowStream::begin(body(&[lines.as_str()])).await.unwrap();
        let (rows, exhausted) = stream.fetch(10).await.unwrap();
        assert!(exhausted);

        let values: Vec<Vec<Value>> = rows.into_iter().map(|r| r.normalize(&columns)).collect();
        assert_eq!(values[2], vec![Value::Int64(2), Value::from("n2")]);
    }

    #[tokio::test]
    async fn step_error_surfaces_as_query_error() {
        let lines = [
            r#"{"type":"step_begin","step":0,"cols":[{"name":"id"}]}"#,
            r#"{"type":"step_error","step":0,"error":{"message":"interrupted"}}"#,
        ]
        .join("\n");
        let (mut stream, _) = RowStream::begin(body(&[lines.as_str()])).await.unwrap();
        let err = stream.fetch(5).await.unwrap_err();
        assert!(matches!(err, StrataError::Query(ref m) if m == "interrupted"));
    }

    #[tokio::test]
    async fn error_before_step_begin_fails_the_start() {
        let line = r#"{"type":"error","error":{"message":"no such table: t","code":"SQLITE_ERROR"}}"#;
        let err = RowStream::begin(body(&[line])).await.err().unwrap();
        assert!(err.to_string().contains("no such table: t"));
    }
}

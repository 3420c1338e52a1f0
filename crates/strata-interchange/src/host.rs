//! Export host
//!
//! Owns at most one in-flight export. Callers submit an [`ExportRequest`],
//! get back an [`ExportHandle`] streaming progress events, and may cancel the
//! running export at any time.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::{ConnectionConfig, ErrorKind, FilterInput, Result, StrataError, TableOrView};
use strata_drivers::DriverRegistry;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::engine::{Export, ExportOutcome, ExportSummary};
use crate::options::{ExportFormat, ExportOptions, ExportProgress, OutputOptions};
use crate::runtime::export_runtime;
use crate::writers::create_writer;

/// Everything needed to run one export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub connection_config: ConnectionConfig,
    /// Overrides `connection_config.database` when set
    #[serde(default)]
    pub database: Option<String>,
    pub export_format: ExportFormat,
    pub file_path: PathBuf,
    pub table: TableOrView,
    #[serde(default)]
    pub filters: FilterInput,
    #[serde(default)]
    pub options: ExportOptions,
    #[serde(default)]
    pub output_options: OutputOptions,
}

/// Message sent from a running export to its caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExportEvent {
    Progress(ExportProgress),
    Failed { kind: ErrorKind, message: String },
}

/// Final state of an export
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ExportStatus {
    Completed(ExportSummary),
    Cancelled(ExportSummary),
    Failed { kind: ErrorKind, message: String },
}

impl ExportStatus {
    fn failed(error: &StrataError) -> Self {
        ExportStatus::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Caller's side of a running export
pub struct ExportHandle {
    id: u64,
    events: mpsc::UnboundedReceiver<ExportEvent>,
    completion: oneshot::Receiver<ExportStatus>,
}

impl ExportHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the export has ended
    pub async fn next_event(&mut self) -> Option<ExportEvent> {
        self.events.recv().await
    }

    /// Wait for the export to end, discarding any unread events
    pub async fn wait(self) -> ExportStatus {
        match self.completion.await {
            Ok(status) => status,
            Err(_) => ExportStatus::Failed {
                kind: ErrorKind::Internal,
                message: "export task ended without reporting a status".into(),
            },
        }
    }
}

struct ActiveExport {
    id: u64,
    cancel: CancellationToken,
}

/// Runs exports one at a time on the dedicated export runtime
pub struct ExportHost {
    registry: Arc<DriverRegistry>,
    active: Arc<Mutex<Option<ActiveExport>>>,
    next_id: AtomicU64,
}

impl ExportHost {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether an export is currently in flight
    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Start an export. Fails if another export is still running.
    pub fn start(&self, request: ExportRequest) -> Result<ExportHandle> {
        let runtime = export_runtime()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(StrataError::Configuration(
                    "an export is already running".into(),
                ));
            }
            *active = Some(ActiveExport {
                id,
                cancel: cancel.clone(),
            });
        }

        tracing::info!(
            export_id = id,
            table = %request.table.name,
            format = %request.export_format,
            path = %request.file_path.display(),
            "export submitted"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let registry = Arc::clone(&self.registry);
        let active = Arc::clone(&self.active);

        runtime.spawn(async move {
            let task = tokio::spawn(run_request(registry, request, cancel, events_tx.clone()));
            let status = match task.await {
                Ok(status) => status,
                Err(e) if e.is_panic() => {
                    tracing::error!(export_id = id, "export task panicked");
                    ExportStatus::Failed {
                        kind: ErrorKind::Internal,
                        message: "export task panicked".into(),
                    }
                }
                Err(_) => ExportStatus::Failed {
                    kind: ErrorKind::Internal,
                    message: "export task was aborted".into(),
                },
            };

            if let ExportStatus::Failed { kind, message } = &status {
                let _ = events_tx.send(ExportEvent::Failed {
                    kind: *kind,
                    message: message.clone(),
                });
            }
            drop(events_tx);

            {
                let mut slot = active.lock();
                if slot.as_ref().is_some_and(|current| current.id == id) {
                    *slot = None;
                }
            }
            let _ = done_tx.send(status);
        });

        Ok(ExportHandle {
            id,
            events: events_rx,
            completion: done_rx,
        })
    }

    /// Cancel the running export, if any. The export stops at its next
    /// chunk boundary.
    pub fn cancel(&self) {
        match self.active.lock().as_ref() {
            Some(current) => {
                tracing::info!(export_id = current.id, "export cancellation requested");
                current.cancel.cancel();
            }
            None => tracing::debug!("cancel requested with no export running"),
        }
    }
}

impl Default for ExportHost {
    fn default() -> Self {
        Self::new(Arc::new(DriverRegistry::with_defaults()))
    }
}

async fn run_request(
    registry: Arc<DriverRegistry>,
    request: ExportRequest,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ExportEvent>,
) -> ExportStatus {
    match execute(&registry, request, cancel, events).await {
        Ok(ExportOutcome::Completed(summary)) => ExportStatus::Completed(summary),
        Ok(ExportOutcome::Cancelled(summary)) => ExportStatus::Cancelled(summary),
        Err(e) if e.is_cancelled() => ExportStatus::Cancelled(ExportSummary::default()),
        Err(e) => {
            tracing::error!(error = %e, "export failed");
            ExportStatus::failed(&e)
        }
    }
}

async fn execute(
    registry: &DriverRegistry,
    request: ExportRequest,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ExportEvent>,
) -> Result<ExportOutcome> {
    let ExportRequest {
        mut connection_config,
        database,
        export_format,
        file_path,
        table,
        filters,
        options,
        output_options,
    } = request;

    if database.is_some() {
        connection_config.database = database;
    }

    let connection = registry.connect(&connection_config).await?;
    let dialect = connection.dialect();
    let writer = match create_writer(export_format, &file_path, &output_options, &table, &dialect) {
        Ok(writer) => writer,
        Err(e) => {
            if let Err(close_err) = connection.close().await {
                tracing::warn!(error = %close_err, "failed to close connection");
            }
            return Err(e);
        }
    };

    Export::new(connection, table, filters, options, writer)
        .with_cancellation(cancel)
        .with_progress_callback(Box::new(move |progress| {
            let _ = events.send(ExportEvent::Progress(progress));
        }))
        .run()
        .await
}

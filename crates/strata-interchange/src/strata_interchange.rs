//! strata interchange - streaming table export
//!
//! An [`Export`] drives a cursor over one table to exhaustion and feeds each
//! chunk to a [`FormatWriter`]. The [`ExportHost`] runs one export at a time
//! on its own runtime and relays progress, failure and cancellation.

pub mod engine;
pub mod host;
pub mod options;
mod runtime;
pub mod writers;

pub use engine::{Export, ExportOutcome, ExportProgressCallback, ExportSummary};
pub use host::{ExportEvent, ExportHandle, ExportHost, ExportRequest, ExportStatus};
pub use options::{ExportFormat, ExportOptions, ExportProgress, OutputOptions};
pub use writers::{FormatWriter, create_writer};

pub use tokio_util::sync::CancellationToken;

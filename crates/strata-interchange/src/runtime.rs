//! Tokio runtime dedicated to exports
//!
//! Exports run on their own multi-thread runtime so a long export never
//! competes with the caller's executor.

use std::sync::OnceLock;
use strata_core::{Result, StrataError};
use tokio::runtime::Runtime;

static EXPORT_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get or create the shared export runtime
pub(crate) fn export_runtime() -> Result<&'static Runtime> {
    if let Some(runtime) = EXPORT_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("strata-export")
        .build()
        .map_err(|e| StrataError::Configuration(format!("Failed to create export runtime: {}", e)))?;

    // lost a race with another initializer
    if let Err(spare) = EXPORT_RUNTIME.set(runtime) {
        spare.shutdown_background();
    }
    EXPORT_RUNTIME
        .get()
        .ok_or_else(|| StrataError::Configuration("export runtime is unavailable".into()))
}

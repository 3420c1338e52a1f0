//! SQLite driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    Connection, ConnectionConfig, DatabaseDriver, DialectInfo, DriverCapabilities, Result,
    StrataError,
};

use crate::{SqliteConnection, SqliteOptions};

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Options derived from a connection config's `busyTimeoutMs` parameter
pub fn options_from_config(config: &ConnectionConfig, base: SqliteOptions) -> SqliteOptions {
    match config.get_u64("busyTimeoutMs") {
        Some(ms) => SqliteOptions {
            busy_timeout: Duration::from_millis(ms),
            ..base
        },
        None => base,
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn id(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_upsert: true,
            supports_streaming: true,
            supports_schemas: false,
            is_remote: false,
            max_parameters: Some(999),
        }
    }

    fn dialect_info(&self) -> DialectInfo {
        crate::sqlite_dialect()
    }

    #[tracing::instrument(skip(self, config), fields(path = config.get_string("path").as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = config.get_string("path").ok_or_else(|| {
            StrataError::Configuration(
                "SQLite requires a 'path' or 'database' parameter. Example: { \"database\": \"/path/to/database.db\" }".into(),
            )
        })?;

        let options = options_from_config(config, SqliteOptions::default());
        let conn = SqliteConnection::open_with(&path, options).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            e
        })?;

        tracing::info!(path = %path, "SQLite connection created");
        Ok(Arc::new(conn))
    }
}

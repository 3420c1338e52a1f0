//! libSQL driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    Connection, ConnectionConfig, DatabaseDriver, DialectInfo, DriverCapabilities, Result,
    StrataError,
};
use strata_driver_sqlite::{SqliteConnection, SqliteOptions, options_from_config};

use crate::remote::{DEFAULT_TIMEOUT, LibsqlRemoteConnection, is_remote_location};

/// libSQL database driver.
///
/// A `libsql://`, `http://` or `https://` location connects to a server; any
/// other location is opened as an embedded database file.
pub struct LibsqlDriver;

impl LibsqlDriver {
    pub fn new() -> Self {
        tracing::debug!("libSQL driver initialized");
        Self
    }
}

impl Default for LibsqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn location(config: &ConnectionConfig) -> Option<String> {
    config
        .get_string("url")
        .or_else(|| config.get_string("database"))
        .or_else(|| config.get_string("host"))
        .filter(|l| !l.is_empty())
}

#[async_trait]
impl DatabaseDriver for LibsqlDriver {
    fn id(&self) -> &'static str {
        "libsql"
    }

    fn display_name(&self) -> &'static str {
        "libSQL"
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
        crate::libsql_dialect()
    }

    #[tracing::instrument(skip(self, config))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let location = location(config).ok_or_else(|| {
            StrataError::Configuration(
                "libSQL requires a 'url' or 'database' parameter (a file path or libsql:// URL)"
                    .into(),
            )
        })?;

        if is_remote_location(&location) {
            let auth_token = config
                .get_string("authToken")
                .or_else(|| config.get_string("password"));
            let timeout = config
                .get_u64("timeoutSecs")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT);
            let conn = LibsqlRemoteConnection::connect(&location, auth_token, timeout)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to connect to libSQL server");
                    e
                })?;
            return Ok(Arc::new(conn));
        }

        let base = SqliteOptions {
            driver_name: "libsql",
            dialect: crate::libsql_dialect(),
            ..SqliteOptions::default()
        };
        let conn = SqliteConnection::open_with(&location, options_from_config(config, base))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to open libSQL database file");
                e
            })?;
        tracing::info!(path = %location, "libSQL local connection created");
        Ok(Arc::new(conn))
    }
}

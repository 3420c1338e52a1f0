//! Driver contract and connection configuration

use crate::{Connection, DialectInfo, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Feature flags a driver reports about its engine
#[derive(Debug, Clone, Default)]
pub struct DriverCapabilities {
    /// Supports UPSERT/ON CONFLICT
    pub supports_upsert: bool,
    /// Supports streaming results through cursors
    pub supports_streaming: bool,
    /// Supports schemas (namespaces)
    pub supports_schemas: bool,
    /// Talks to the database over the network
    pub is_remote: bool,
    /// Maximum parameters per query (None = no limit)
    pub max_parameters: Option<usize>,
}

/// A database engine: metadata plus a way to open connections
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "sqlite", "libsql")
    fn id(&self) -> &'static str;

    /// Display name for UI
    fn display_name(&self) -> &'static str {
        self.id()
    }

    /// What this driver supports
    fn capabilities(&self) -> DriverCapabilities;

    /// Get SQL dialect information
    fn dialect_info(&self) -> DialectInfo {
        DialectInfo::default()
    }

    /// Open a connection described by `config`
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Connect, run a trivial query, and close again
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        let conn = self.connect(config).await?;
        let check = conn.query("SELECT 1", &[]).await.map(|_| ());
        conn.close().await?;
        check
    }
}

/// Where and how to connect. Deserialized from camelCase request JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Driver ID (e.g., "sqlite", "libsql")
    pub driver: String,
    /// Host address or URL (empty for file-based databases)
    pub host: String,
    /// Port number (0 for default or file-based)
    pub port: u16,
    /// Database name or file path
    pub database: Option<String>,
    /// Username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Additional connection parameters
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Create a new configuration with default values
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            ..Default::default()
        }
    }

    /// Create a SQLite configuration
    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new("sqlite");
        config.database = Some(database_path.to_string());
        config
    }

    /// Create a libSQL configuration for a local file or a remote URL
    pub fn new_libsql(location: &str) -> Self {
        let mut config = Self::new("libsql");
        config.database = Some(location.to_string());
        config
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let val = value.into();
        let str_val = match val {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.insert(key.to_string(), str_val);
        self
    }

    /// Get a string parameter
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        match key {
            "host" if !self.host.is_empty() => Some(self.host.clone()),
            "database" | "path" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }

    /// Get a numeric parameter
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_string(key).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_take_precedence_over_fields() {
        let config = ConnectionConfig::new_sqlite("/tmp/a.db").with_param("path", "/tmp/b.db");
        assert_eq!(config.get_string("path").as_deref(), Some("/tmp/b.db"));
        assert_eq!(config.get_string("database").as_deref(), Some("/tmp/a.db"));
        assert_eq!(config.get_string("host"), None);
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"driver": "libsql", "host": "libsql://db.example.io", "params": {"authToken": "t"}}"#,
        )
        .unwrap();
        assert_eq!(config.driver, "libsql");
        assert_eq!(config.get_string("authToken").as_deref(), Some("t"));
        assert_eq!(config.database, None);
    }

    #[test]
    fn numeric_params() {
        let config = ConnectionConfig::new("libsql").with_param("timeoutSecs", 15);
        assert_eq!(config.get_u64("timeoutSecs"), Some(15));
    }
}

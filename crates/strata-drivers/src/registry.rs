//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{
    Connection, ConnectionConfig, DatabaseDriver, DialectInfo, Result, StrataError,
};

/// Registry of available database drivers
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "libsql")]
        registry.register(Arc::new(crate::libsql::LibsqlDriver::new()));

        registry
    }

    /// Register a new driver, replacing any driver with the same id
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let id = driver.id().to_string();
        tracing::info!(driver = %id, "registering database driver");
        self.drivers.insert(id, driver);
    }

    /// Get a driver by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(id).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %id, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver ids, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a driver is registered
    pub fn has(&self, id: &str) -> bool {
        self.drivers.contains_key(id)
    }

    /// Get dialect info for a driver by id
    pub fn dialect_info(&self, id: &str) -> Option<DialectInfo> {
        self.drivers.get(id).map(|driver| driver.dialect_info())
    }

    /// Connect with the driver named by `config.driver`
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let driver = self.get(&config.driver).ok_or_else(|| {
            StrataError::Configuration(format!(
                "Unknown database driver '{}'. Available: {}",
                config.driver,
                self.list().join(", ")
            ))
        })?;
        driver.connect(config).await
    }
}

/// Dialect info for a driver id without a registry instance
pub fn get_dialect_info(driver_id: &str) -> DialectInfo {
    match driver_id.to_lowercase().as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => crate::sqlite::sqlite_dialect(),
        #[cfg(feature = "libsql")]
        "libsql" => crate::libsql::libsql_dialect(),
        _ => DialectInfo::default(),
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_sqlite_family() {
        let registry = DriverRegistry::with_defaults();
        #[cfg(all(feature = "sqlite", feature = "libsql"))]
        assert_eq!(registry.list(), vec!["libsql", "sqlite"]);
        assert!(!registry.has("postgres"));
        assert!(registry.get("postgres").is_none());
    }

    #[test]
    fn unknown_dialect_falls_back_to_generic() {
        let dialect = get_dialect_info("nosuchdb");
        assert_eq!(dialect.identifier_quote, '"');
    }

    #[tokio::test]
    async fn connect_with_unknown_driver_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let err = registry
            .connect(&ConnectionConfig::new("oracle"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StrataError::Configuration(_)));
    }
}

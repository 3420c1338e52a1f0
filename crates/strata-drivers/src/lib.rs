//! strata drivers - database driver implementations
//!
//! Concrete implementations of the driver traits defined in `strata-core`,
//! gathered behind a registry keyed by driver id.

#[cfg(feature = "libsql")]
pub use strata_driver_libsql as libsql;
#[cfg(feature = "sqlite")]
pub use strata_driver_sqlite as sqlite;

mod registry;

pub use registry::{DriverRegistry, get_dialect_info};

/// Re-export commonly used types from strata-core
pub use strata_core::{
    ColumnMeta, Connection, ConnectionConfig, Cursor, CursorOptions, CursorState,
    DatabaseDriver, DialectInfo, DriverCapabilities, QueryResult, Result, Row, StatementResult,
    StrataError, Value,
};

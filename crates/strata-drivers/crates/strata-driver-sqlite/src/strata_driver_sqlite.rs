//! SQLite database driver implementation

mod connection;
mod cursor;
mod dialect;
mod driver;

pub use connection::{SqliteConnection, SqliteOptions};
pub use cursor::SqliteCursor;
pub use dialect::sqlite_dialect;
pub use driver::{SqliteDriver, options_from_config};

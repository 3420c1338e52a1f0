//! libSQL database driver implementation
//!
//! Local databases go through the SQLite driver; remote servers are reached
//! over Hrana-over-HTTP.

mod cursor;
mod dialect;
mod driver;
mod hrana;
mod remote;

pub use cursor::{EntryReader, EntryStream, LibsqlRemoteCursor, RowStream};
pub use dialect::libsql_dialect;
pub use driver::LibsqlDriver;
pub use remote::{LibsqlRemoteConnection, http_base_url, is_remote_location};

//! libSQL dialect information

use std::borrow::Cow;
use strata_core::DialectInfo;

/// libSQL speaks SQLite's dialect
pub fn libsql_dialect() -> DialectInfo {
    DialectInfo {
        id: Cow::Borrowed("libsql"),
        display_name: Cow::Borrowed("libSQL"),
        ..strata_driver_sqlite::sqlite_dialect()
    }
}

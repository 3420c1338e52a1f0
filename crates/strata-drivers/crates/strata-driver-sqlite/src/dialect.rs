//! SQLite dialect information

use std::borrow::Cow;
use strata_core::DialectInfo;

/// SQLite dialect. Identifiers are quoted with backticks, which SQLite accepts
/// alongside double quotes.
pub fn sqlite_dialect() -> DialectInfo {
    DialectInfo {
        id: Cow::Borrowed("sqlite"),
        display_name: Cow::Borrowed("SQLite"),
        identifier_quote: '`',
        string_quote: '\'',
        statement_terminator: ';',
        hex_function: Cow::Borrowed("HEX"),
        supports_upsert: true,
    }
}

//! SQL dialect metadata
//!
//! Drivers describe the quoting and syntax rules of their engine through
//! [`DialectInfo`]; the query builders read these instead of hardcoding
//! per-driver behaviour.

use std::borrow::Cow;

use crate::Escaper;

/// SQL dialect information for a driver
#[derive(Debug, Clone)]
pub struct DialectInfo {
    /// Dialect identifier (e.g., "sqlite", "libsql")
    pub id: Cow<'static, str>,
    /// Display name
    pub display_name: Cow<'static, str>,
    /// Identifier quote character (e.g., '"' for SQL standard, '`' for MySQL)
    pub identifier_quote: char,
    /// String literal quote (usually '\'')
    pub string_quote: char,
    /// Statement terminator (usually ';')
    pub statement_terminator: char,
    /// Function that renders a binary value as comparable hex text
    pub hex_function: Cow<'static, str>,
    /// Whether `INSERT ... ON CONFLICT ... DO UPDATE` is available
    pub supports_upsert: bool,
}

impl DialectInfo {
    /// Escaper configured for this dialect's quoting rules
    pub fn escaper(&self) -> Escaper {
        Escaper::new(self.identifier_quote)
    }
}

impl Default for DialectInfo {
    fn default() -> Self {
        Self {
            id: Cow::Borrowed("generic"),
            display_name: Cow::Borrowed("SQL"),
            identifier_quote: '"',
            string_quote: '\'',
            statement_terminator: ';',
            hex_function: Cow::Borrowed("HEX"),
            supports_upsert: false,
        }
    }
}

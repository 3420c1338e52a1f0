//! strata core - shared abstractions for the database client and export pipeline
//!
//! This crate provides the traits and types every other strata crate depends
//! on:
//!
//! - `DatabaseDriver` / `Connection` - the client contract drivers implement
//! - `Cursor` - chunked, resumable reads over a running query
//! - `Escaper` / `DialectInfo` - identifier and literal quoting rules
//! - `TableFilter`, `TableChanges` and friends - the request data model
//! - `StrataError` - the error taxonomy shared across crates

mod connection;
mod cursor;
mod dialect;
mod driver;
mod error;
mod escape;
mod table;
mod types;

pub use connection::*;
pub use cursor::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use escape::*;
pub use table::*;
pub use types::*;

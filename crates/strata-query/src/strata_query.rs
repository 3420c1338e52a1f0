//! strata query - SQL text generation
//!
//! Pure builders with no I/O: filter compilation, paginated select/count
//! queries, row-mutation statements and the read-only gate.

pub mod filter;
pub mod mutation;
pub mod read_only;
pub mod select;

pub use filter::{
    CompiledFilter, DEFAULT_SCHEMA_FIELD, FilterCompiler, NamespaceFilter, build_database_filter,
    build_filter_string, build_schema_filter,
};
pub use mutation::{
    BitConversion, ChangeBuilder, InsertOptions, Statement, default_bit_conversion,
    escape_placeholder_marks, join_queries, normalize_insert_rows,
};
pub use read_only::{
    ExecutionType, IdentifiedStatement, ensure_read_only_allowed, is_allowed_read_only_query,
};
pub use select::{OrderBy, SelectTop, SelectTopQuery, SortDirection};

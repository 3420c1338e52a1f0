//! Compiles structured table filters into a parameterized WHERE clause
//!
//! Also builds the schema/database scoping clauses used when listing
//! entities.

use serde::{Deserialize, Serialize};
use strata_core::{
    ColumnMeta, DialectInfo, Escaper, FilterJoiner, FilterOperator, Result, StrataError,
    TableFilter, Value,
};

/// A compiled WHERE clause and its positional parameters.
///
/// `clause` is empty when there were no filters; otherwise it starts with
/// `WHERE`. `params` holds exactly one entry per `?` in `clause`, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFilter {
    pub clause: String,
    pub params: Vec<Value>,
}

impl CompiledFilter {
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }
}

/// Narrows an entity listing to some schemas or databases.
///
/// `name` selects exactly one and wins over the lists. It is read from
/// `schema` or `database` in request JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceFilter {
    #[serde(alias = "schema", alias = "database")]
    pub name: Option<String>,
    pub only: Vec<String>,
    pub ignore: Vec<String>,
}

impl NamespaceFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Filter compiler bound to a dialect and, optionally, the table's columns
#[derive(Debug, Clone)]
pub struct FilterCompiler<'a> {
    escaper: Escaper,
    hex_function: String,
    columns: &'a [ColumnMeta],
    joiner: FilterJoiner,
}

impl Default for FilterCompiler<'_> {
    fn default() -> Self {
        Self {
            escaper: Escaper::default(),
            hex_function: "HEX".to_string(),
            columns: &[],
            joiner: FilterJoiner::And,
        }
    }
}

impl<'a> FilterCompiler<'a> {
    pub fn for_dialect(dialect: &DialectInfo) -> Self {
        Self {
            escaper: dialect.escaper(),
            hex_function: dialect.hex_function.to_string(),
            ..Self::default()
        }
    }

    /// Column metadata used to detect binary columns
    pub fn with_columns(mut self, columns: &'a [ColumnMeta]) -> Self {
        self.columns = columns;
        self
    }

    /// Joiner used where a filter does not name its own
    pub fn with_joiner(mut self, joiner: FilterJoiner) -> Self {
        self.joiner = joiner;
        self
    }

    pub fn compile(&self, filters: &[TableFilter]) -> Result<CompiledFilter> {
        if filters.is_empty() {
            return Ok(CompiledFilter::default());
        }

        let mut clause = String::from("WHERE ");
        let mut params = Vec::new();

        for (idx, filter) in filters.iter().enumerate() {
            if idx > 0 {
                let joiner = filter.joiner.unwrap_or(self.joiner);
                clause.push(' ');
                clause.push_str(joiner.as_sql());
                clause.push(' ');
            }
            clause.push_str(&self.compile_one(filter, &mut params)?);
        }

        tracing::trace!(clause = %clause, params = params.len(), "compiled filters");
        Ok(CompiledFilter { clause, params })
    }

    /// Scope `field` (a column, possibly `table.column`) to the namespaces in
    /// `filter`. Names are bound as parameters, never spliced.
    pub fn compile_namespace(&self, field: &str, filter: &NamespaceFilter) -> Result<CompiledFilter> {
        if field.is_empty() {
            return Err(StrataError::FilterValidation(
                "namespace filter is missing a field name".into(),
            ));
        }
        let field = self
            .escaper
            .quote_qualified(field.split('.').map(Some));
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(name) = filter.name.as_deref().filter(|n| !n.is_empty()) {
            conditions.push(format!("{field} = ?"));
            params.push(Value::from(name));
        } else {
            for (names, op) in [(&filter.only, "IN"), (&filter.ignore, "NOT IN")] {
                if names.is_empty() {
                    continue;
                }
                let marks = vec!["?"; names.len()].join(",");
                conditions.push(format!("{field} {op} ({marks})"));
                params.extend(names.iter().map(|n| Value::from(n.as_str())));
            }
        }

        if conditions.is_empty() {
            return Ok(CompiledFilter::default());
        }
        Ok(CompiledFilter {
            clause: format!("WHERE {}", conditions.join(" AND ")),
            params,
        })
    }

    fn field_expr(&self, field: &str) -> String {
        let quoted = self.escaper.quote_identifier(field);
        let binary = self
            .columns
            .iter()
            .any(|column| column.name == field && column.is_binary());
        if binary {
            format!("{}({})", self.hex_function, quoted)
        } else {
            quoted
        }
    }

    fn compile_one(&self, filter: &TableFilter, params: &mut Vec<Value>) -> Result<String> {
        if filter.field.is_empty() {
            return Err(StrataError::FilterValidation(
                "filter is missing a field name".into(),
            ));
        }
        let field = self.field_expr(&filter.field);
        let op = filter.operator.as_sql();

        match (filter.operator, &filter.value) {
            (FilterOperator::In, None) => Err(StrataError::FilterValidation(format!(
                "'in' filter on {} requires a value",
                filter.field
            ))),
            (FilterOperator::In, Some(Value::Array(items))) => {
                if items.is_empty() {
                    return Err(StrataError::FilterValidation(format!(
                        "'in' filter on {} requires at least one value",
                        filter.field
                    )));
                }
                params.extend(items.iter().cloned());
                let marks = vec!["?"; items.len()].join(",");
                Ok(format!("{field} {op} ({marks})"))
            }
            (FilterOperator::In, Some(scalar)) => {
                params.push(scalar.clone());
                Ok(format!("{field} {op} (?)"))
            }
            (operator, value) if operator.is_null_check() => match value {
                None | Some(Value::Null) => Ok(format!("{field} {op} NULL")),
                Some(Value::String(s)) if s.is_empty() => Ok(format!("{field} {op} NULL")),
                Some(_) => Err(StrataError::FilterValidation(format!(
                    "'{}' filter on {} does not take a value",
                    operator.as_sql().to_lowercase(),
                    filter.field
                ))),
            },
            (operator, None) => Err(StrataError::FilterValidation(format!(
                "'{}' filter on {} requires a value",
                operator.as_sql().to_lowercase(),
                filter.field
            ))),
            (operator, Some(Value::Array(_))) => Err(StrataError::FilterValidation(format!(
                "'{}' filter on {} takes a single value, not a list",
                operator.as_sql().to_lowercase(),
                filter.field
            ))),
            (_, Some(value)) => {
                params.push(value.clone());
                Ok(format!("{field} {op} ?"))
            }
        }
    }
}

/// Compile `filters` with the default (backtick) dialect.
pub fn build_filter_string(
    filters: &[TableFilter],
    columns: &[ColumnMeta],
    joiner: FilterJoiner,
) -> Result<CompiledFilter> {
    FilterCompiler::default()
        .with_columns(columns)
        .with_joiner(joiner)
        .compile(filters)
}

/// Column a schema filter applies to when the caller names none
pub const DEFAULT_SCHEMA_FIELD: &str = "schema_name";

/// Schema scoping clause; `None` when there is no filter at all.
pub fn build_schema_filter(
    filter: Option<&NamespaceFilter>,
    schema_field: Option<&str>,
) -> Result<Option<CompiledFilter>> {
    filter
        .map(|f| FilterCompiler::default().compile_namespace(schema_field.unwrap_or(DEFAULT_SCHEMA_FIELD), f))
        .transpose()
}

/// Database scoping clause; `None` when there is no filter at all.
pub fn build_database_filter(
    filter: Option<&NamespaceFilter>,
    database_field: &str,
) -> Result<Option<CompiledFilter>> {
    filter
        .map(|f| FilterCompiler::default().compile_namespace(database_field, f))
        .transpose()
}

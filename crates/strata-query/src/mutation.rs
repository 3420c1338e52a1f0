//! INSERT / UPDATE / DELETE statement builders for pending table changes
//!
//! Statements carry positional `?` placeholders. A literal `?` inside an identifier
//! is written as `\?` so it can never be mistaken for a placeholder; use
//! [`Statement::executable_sql`] before sending to a driver, or
//! [`Statement::to_literal_sql`] to embed the parameters for file output.

use strata_core::{
    ColumnMeta, DialectInfo, Escaper, PrimaryKeyValue, Result, RowData, StrataError,
    TableChanges, TableDelete, TableInsert, TableUpdate, Value,
};

/// A generated SQL statement and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }

    /// SQL ready for parameter binding, with escaped identifier marks restored
    pub fn executable_sql(&self) -> String {
        self.sql.replace("\\?", "?")
    }

    /// SQL with every parameter rendered inline as a literal.
    pub fn to_literal_sql(&self, escaper: &Escaper) -> Result<String> {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut params = self.params.iter();
        let mut chars = self.sql.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' if chars.peek() == Some(&'?') => {
                    chars.next();
                    out.push('?');
                }
                '?' => {
                    let value = params.next().ok_or_else(|| {
                        StrataError::Query("statement has more placeholders than parameters".into())
                    })?;
                    out.push_str(&escaper.render_literal(value));
                }
                other => out.push(other),
            }
        }

        if params.next().is_some() {
            return Err(StrataError::Query(
                "statement has more parameters than placeholders".into(),
            ));
        }
        Ok(out)
    }
}

/// Conversion applied to values headed for `bit(1)` columns
pub type BitConversion = dyn Fn(&Value) -> Value + Send + Sync;

/// Default `bit(1)` conversion: booleans and numeric strings become integers
pub fn default_bit_conversion(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int64(*b as i64),
        Value::String(s) => match s.trim() {
            "true" => Value::Int64(1),
            "false" => Value::Int64(0),
            other => other
                .parse::<i64>()
                .map(Value::Int64)
                .unwrap_or_else(|_| value.clone()),
        },
        other => other.clone(),
    }
}

/// Options for [`ChangeBuilder::insert`]
#[derive(Default)]
pub struct InsertOptions<'a> {
    /// Column metadata of the target table, used for bit normalization
    pub columns: &'a [ColumnMeta],
    /// Conversion for `bit(1)` values; [`default_bit_conversion`] when absent
    pub bit_conversion: Option<&'a BitConversion>,
    /// Emit an upsert keyed on `primary_keys`
    pub as_upsert: bool,
    /// Conflict keys for an upsert
    pub primary_keys: &'a [String],
    /// The table's declared primary key; when given, upsert keys must match it
    pub declared_primary_keys: Option<&'a [String]>,
}

/// Escape `?` in an identifier so it is not read as a placeholder
pub fn escape_placeholder_marks(identifier: &str) -> String {
    identifier.replace('?', "\\?")
}

/// Normalize insert rows for bit columns and escape `?` in column names.
///
/// Pure: returns new rows and leaves the input untouched.
/// - `bit(1)` values go through `bit_conversion`
/// - wider `bit(n)` values written as `b'0101'` are parsed base 2; any
///   other text is left as a string for the server to judge
/// - booleans bound for any other bit column become 0/1
pub fn normalize_insert_rows(
    rows: &[RowData],
    columns: &[ColumnMeta],
    bit_conversion: &BitConversion,
) -> Vec<RowData> {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|(key, value)| {
                    let data_type = columns
                        .iter()
                        .find(|c| c.name == *key)
                        .map(|c| c.data_type.to_lowercase())
                        .unwrap_or_default();
                    let value = normalize_bit_value(&data_type, value, bit_conversion);
                    (escape_placeholder_marks(key), value)
                })
                .collect()
        })
        .collect()
}

fn normalize_bit_value(data_type: &str, value: &Value, bit_conversion: &BitConversion) -> Value {
    if data_type.starts_with("bit(") && !value.is_null() {
        if data_type == "bit(1)" {
            return bit_conversion(value);
        }
        return match value {
            Value::String(s) => parse_bit_literal(s).map_or_else(|| value.clone(), Value::Int64),
            Value::Bool(b) => Value::Int64(*b as i64),
            other => other.clone(),
        };
    }
    if data_type.starts_with("bit")
        && let Value::Bool(b) = value
    {
        return Value::Int64(*b as i64);
    }
    value.clone()
}

fn parse_bit_literal(literal: &str) -> Option<i64> {
    let digits = literal.split('\'').nth(1)?;
    i64::from_str_radix(digits, 2).ok()
}

/// Builds row-mutation statements for one dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeBuilder {
    escaper: Escaper,
}

impl ChangeBuilder {
    pub fn new(escaper: Escaper) -> Self {
        Self { escaper }
    }

    pub fn for_dialect(dialect: &DialectInfo) -> Self {
        Self::new(dialect.escaper())
    }

    pub fn escaper(&self) -> &Escaper {
        &self.escaper
    }

    fn table_name(&self, schema: Option<&str>, dataset: Option<&str>, table: &str) -> String {
        let schema = schema.map(escape_placeholder_marks);
        let dataset = dataset.map(escape_placeholder_marks);
        let table = escape_placeholder_marks(table);
        self.escaper.quote_qualified([
            schema.as_deref(),
            dataset.as_deref(),
            Some(table.as_str()),
        ])
    }

    fn quote_column(&self, column: &str) -> String {
        self.escaper.quote_identifier(&escape_placeholder_marks(column))
    }

    /// One multi-row INSERT (or upsert) for `insert`
    pub fn insert(&self, insert: &TableInsert, options: &InsertOptions<'_>) -> Result<Statement> {
        if insert.data.is_empty() {
            return Err(StrataError::InvalidChange(format!(
                "insert into {} has no rows",
                insert.table
            )));
        }

        let conversion: &BitConversion = options.bit_conversion.unwrap_or(&default_bit_conversion);
        let rows = normalize_insert_rows(&insert.data, options.columns, conversion);
        let table = self.table_name(
            insert.schema.as_deref(),
            insert.dataset.as_deref(),
            &insert.table,
        );

        let mut columns: Vec<&str> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }

        if columns.is_empty() {
            if rows.len() > 1 {
                return Err(StrataError::InvalidChange(format!(
                    "insert into {} has several rows without columns",
                    insert.table
                )));
            }
            return Ok(Statement::new(
                format!("INSERT INTO {table} DEFAULT VALUES"),
                Vec::new(),
            ));
        }

        let mut params = Vec::new();
        let tuples = rows
            .iter()
            .map(|row| {
                let slots = columns
                    .iter()
                    .map(|column| match row.get(*column) {
                        Some(value) => {
                            params.push(value.clone());
                            "?"
                        }
                        None => "NULL",
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({slots})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        let column_list = columns
            .iter()
            .map(|c| self.escaper.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("INSERT INTO {table} ({column_list}) VALUES {tuples}");

        if options.as_upsert {
            sql.push(' ');
            sql.push_str(&self.upsert_clause(insert, &columns, &rows, options)?);
        }

        Ok(Statement::new(sql, params))
    }

    fn upsert_clause(
        &self,
        insert: &TableInsert,
        columns: &[&str],
        rows: &[RowData],
        options: &InsertOptions<'_>,
    ) -> Result<String> {
        if options.primary_keys.is_empty() {
            return Err(StrataError::InvalidChange(format!(
                "upsert into {} needs at least one primary key column",
                insert.table
            )));
        }

        if let Some(declared) = options.declared_primary_keys {
            let matches_declared = declared.len() == options.primary_keys.len()
                && declared.iter().all(|pk| options.primary_keys.contains(pk));
            if !matches_declared {
                return Err(StrataError::InvalidChange(format!(
                    "upsert keys ({}) do not match the primary key of {} ({})",
                    options.primary_keys.join(", "),
                    insert.table,
                    declared.join(", ")
                )));
            }
        }

        let keys: Vec<String> = options
            .primary_keys
            .iter()
            .map(|pk| escape_placeholder_marks(pk))
            .collect();
        for key in &keys {
            if rows.iter().any(|row| !row.contains_key(key)) {
                return Err(StrataError::InvalidChange(format!(
                    "every upserted row must carry primary key column {key}"
                )));
            }
        }

        let conflict = keys
            .iter()
            .map(|k| self.escaper.quote_identifier(k))
            .collect::<Vec<_>>()
            .join(", ");
        let assignments = columns
            .iter()
            .filter(|c| !keys.iter().any(|k| k == *c))
            .map(|c| {
                let quoted = self.escaper.quote_identifier(c);
                format!("{quoted} = excluded.{quoted}")
            })
            .collect::<Vec<_>>();

        if assignments.is_empty() {
            Ok(format!("ON CONFLICT ({conflict}) DO NOTHING"))
        } else {
            Ok(format!(
                "ON CONFLICT ({conflict}) DO UPDATE SET {}",
                assignments.join(", ")
            ))
        }
    }

    pub fn inserts(
        &self,
        inserts: &[TableInsert],
        options: &InsertOptions<'_>,
    ) -> Result<Vec<Statement>> {
        inserts.iter().map(|i| self.insert(i, options)).collect()
    }

    fn where_primary_keys(
        &self,
        table: &str,
        primary_keys: &[PrimaryKeyValue],
        params: &mut Vec<Value>,
    ) -> Result<String> {
        if primary_keys.is_empty() {
            return Err(StrataError::InvalidChange(format!(
                "change to {table} does not identify a row: no primary key values"
            )));
        }
        let conditions = primary_keys
            .iter()
            .map(|pk| {
                let column = self.quote_column(&pk.column);
                if pk.value.is_null() {
                    format!("{column} IS NULL")
                } else {
                    params.push(pk.value.clone());
                    format!("{column} = ?")
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        Ok(format!("WHERE {conditions}"))
    }

    pub fn update(&self, update: &TableUpdate) -> Result<Statement> {
        let table = self.table_name(
            update.schema.as_deref(),
            update.dataset.as_deref(),
            &update.table,
        );
        let mut params = vec![update.value.clone()];
        let filter = self.where_primary_keys(&update.table, &update.primary_keys, &mut params)?;
        let sql = format!(
            "UPDATE {table} SET {} = ? {filter}",
            self.quote_column(&update.column)
        );
        Ok(Statement::new(sql, params))
    }

    pub fn updates(&self, updates: &[TableUpdate]) -> Result<Vec<Statement>> {
        updates.iter().map(|u| self.update(u)).collect()
    }

    pub fn delete(&self, delete: &TableDelete) -> Result<Statement> {
        let table = self.table_name(
            delete.schema.as_deref(),
            delete.dataset.as_deref(),
            &delete.table,
        );
        let mut params = Vec::new();
        let filter = self.where_primary_keys(&delete.table, &delete.primary_keys, &mut params)?;
        Ok(Statement::new(format!("DELETE FROM {table} {filter}"), params))
    }

    pub fn deletes(&self, deletes: &[TableDelete]) -> Result<Vec<Statement>> {
        deletes.iter().map(|d| self.delete(d)).collect()
    }

    /// `SELECT *` statements that re-read the rows touched by `updates`
    pub fn selects_from_updates(&self, updates: &[TableUpdate]) -> Result<Vec<Statement>> {
        updates
            .iter()
            .map(|update| {
                let table = self.table_name(
                    update.schema.as_deref(),
                    update.dataset.as_deref(),
                    &update.table,
                );
                let mut params = Vec::new();
                let filter =
                    self.where_primary_keys(&update.table, &update.primary_keys, &mut params)?;
                Ok(Statement::new(
                    format!("SELECT * FROM {table} {filter}"),
                    params,
                ))
            })
            .collect()
    }

    /// Render every change as literal SQL: inserts, then updates, then
    /// deletes, `;`-separated with a trailing terminator. `None` when there is
    /// nothing to apply.
    pub fn apply_changes_sql(&self, changes: &TableChanges) -> Result<Option<String>> {
        let mut statements = self.inserts(&changes.inserts, &InsertOptions::default())?;
        statements.extend(self.updates(&changes.updates)?);
        statements.extend(self.deletes(&changes.deletes)?);

        let rendered = statements
            .iter()
            .map(|s| s.to_literal_sql(&self.escaper))
            .collect::<Result<Vec<_>>>()?;
        let joined = rendered
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(";");

        if joined.is_empty() {
            Ok(None)
        } else if joined.ends_with(';') {
            Ok(Some(joined))
        } else {
            Ok(Some(format!("{joined};")))
        }
    }
}

/// Terminate each statement with `;` (unless it already ends with one) and
/// concatenate.
pub fn join_queries<S: AsRef<str>>(queries: &[S]) -> String {
    queries
        .iter()
        .map(|q| {
            let q = q.as_ref();
            if q.trim_end().ends_with(';') {
                q.to_string()
            } else {
                format!("{q};")
            }
        })
        .collect()
}

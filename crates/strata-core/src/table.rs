//! Table references, filters and row changes

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::Value;

/// Whether a relation is a base table or a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[default]
    Table,
    View,
}

/// A table or view addressed by an export or a select
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOrView {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub entity_type: EntityType,
}

impl TableOrView {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            entity_type: EntityType::Table,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// Comparison applied by a [`TableFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=", alias = "<>")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "like", alias = "LIKE")]
    Like,
    #[serde(rename = "not like", alias = "NOT LIKE")]
    NotLike,
    #[serde(rename = "in", alias = "IN")]
    In,
    #[serde(rename = "is", alias = "IS")]
    Is,
    #[serde(rename = "is not", alias = "IS NOT")]
    IsNot,
}

impl FilterOperator {
    /// SQL spelling of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Lt => "<",
            FilterOperator::LtEq => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::GtEq => ">=",
            FilterOperator::Like => "LIKE",
            FilterOperator::NotLike => "NOT LIKE",
            FilterOperator::In => "IN",
            FilterOperator::Is => "IS",
            FilterOperator::IsNot => "IS NOT",
        }
    }

    /// `is` and `is not` compare against NULL and take no value
    pub fn is_null_check(&self) -> bool {
        matches!(self, FilterOperator::Is | FilterOperator::IsNot)
    }
}

/// How consecutive filter clauses combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterJoiner {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl FilterJoiner {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterJoiner::And => "AND",
            FilterJoiner::Or => "OR",
        }
    }
}

/// One predicate on a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFilter {
    pub field: String,
    #[serde(rename = "type")]
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Joiner linking this filter to the previous one
    #[serde(rename = "op", default, skip_serializing_if = "Option::is_none")]
    pub joiner: Option<FilterJoiner>,
}

impl TableFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            joiner: None,
        }
    }

    /// `field IS NULL` / `field IS NOT NULL`
    pub fn null_check(field: impl Into<String>, negated: bool) -> Self {
        Self {
            field: field.into(),
            operator: if negated {
                FilterOperator::IsNot
            } else {
                FilterOperator::Is
            },
            value: None,
            joiner: None,
        }
    }

    pub fn joined_by(mut self, joiner: FilterJoiner) -> Self {
        self.joiner = Some(joiner);
        self
    }
}

/// Filters given either as structured predicates or as a raw SQL condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterInput {
    Raw(String),
    Structured(Vec<TableFilter>),
}

impl Default for FilterInput {
    fn default() -> Self {
        FilterInput::Structured(Vec::new())
    }
}

/// A row keyed by column name, in insertion order
pub type RowData = IndexMap<String, Value>;

/// One column of a row's primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyValue {
    pub column: String,
    pub value: Value,
}

impl PrimaryKeyValue {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInsert {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    pub data: Vec<RowData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUpdate {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub primary_keys: Vec<PrimaryKeyValue>,
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDelete {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub primary_keys: Vec<PrimaryKeyValue>,
}

/// A batch of pending edits against one or more tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TableChanges {
    pub inserts: Vec<TableInsert>,
    pub updates: Vec<TableUpdate>,
    pub deletes: Vec<TableDelete>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filters_deserialize_from_wire_shape() {
        let filters: Vec<TableFilter> = serde_json::from_str(
            r#"[
                {"field": "amount", "type": "in", "value": [1, 2, 3], "op": "OR"},
                {"field": "name", "type": "is"},
                {"field": "title", "type": "not like", "value": "%draft%"}
            ]"#,
        )
        .unwrap();

        assert_eq!(filters[0].operator, FilterOperator::In);
        assert_eq!(filters[0].joiner, Some(FilterJoiner::Or));
        assert_eq!(filters[1].value, None);
        assert!(filters[1].operator.is_null_check());
        assert_eq!(filters[2].operator.as_sql(), "NOT LIKE");
    }

    #[test]
    fn filter_input_accepts_raw_strings() {
        let raw: FilterInput = serde_json::from_str(r#""id > 10""#).unwrap();
        assert_eq!(raw, FilterInput::Raw("id > 10".into()));

        let structured: FilterInput =
            serde_json::from_str(r#"[{"field": "id", "type": ">", "value": 10}]"#).unwrap();
        assert!(matches!(structured, FilterInput::Structured(f) if f.len() == 1));
    }

    #[test]
    fn changes_keep_row_key_order() {
        let changes: TableChanges = serde_json::from_str(
            r#"{"inserts": [{"table": "t", "data": [{"z": 1, "a": 2}]}]}"#,
        )
        .unwrap();
        let keys: Vec<&str> = changes.inserts[0].data[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert!(changes.updates.is_empty());
        assert!(!changes.is_empty());
    }
}

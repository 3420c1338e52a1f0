//! Paginated "select top" queries with a matching count query

use serde::{Deserialize, Serialize};
use strata_core::{
    ColumnMeta, DialectInfo, Escaper, FilterInput, FilterJoiner, Result, TableOrView, Value,
};

use crate::filter::{CompiledFilter, FilterCompiler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "asc", alias = "ASC")]
    Asc,
    #[serde(rename = "desc", alias = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A sort key: either a bare field name (ascending) or `{ field, dir }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderBy {
    Field(String),
    Directed {
        field: String,
        #[serde(default)]
        dir: SortDirection,
    },
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy::Directed {
            field: field.into(),
            dir: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy::Directed {
            field: field.into(),
            dir: SortDirection::Desc,
        }
    }

    fn parts(&self) -> (&str, SortDirection) {
        match self {
            OrderBy::Field(field) => (field, SortDirection::Asc),
            OrderBy::Directed { field, dir } => (field, *dir),
        }
    }
}

/// Output of [`SelectTop::build`]
#[derive(Debug, Clone, PartialEq)]
pub struct SelectTopQuery {
    pub query: String,
    pub count_query: String,
    pub params: Vec<Value>,
}

/// Builder for a paginated select over one table.
///
/// ```ignore
/// let q = SelectTop::new(TableOrView::table("orders"))
///     .filters(FilterInput::Structured(filters))
///     .order_by(vec![OrderBy::asc("id")])
///     .limit(5)
///     .offset(10)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct SelectTop {
    table: TableOrView,
    filters: FilterInput,
    joiner: FilterJoiner,
    columns: Vec<ColumnMeta>,
    selects: Vec<String>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    count_title: String,
    dialect: DialectInfo,
}

impl SelectTop {
    pub fn new(table: TableOrView) -> Self {
        Self {
            table,
            filters: FilterInput::default(),
            joiner: FilterJoiner::And,
            columns: Vec::new(),
            selects: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            count_title: "total".to_string(),
            dialect: DialectInfo {
                identifier_quote: Escaper::default().identifier_quote(),
                ..DialectInfo::default()
            },
        }
    }

    pub fn dialect(mut self, dialect: DialectInfo) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn filters(mut self, filters: FilterInput) -> Self {
        self.filters = filters;
        self
    }

    pub fn joiner(mut self, joiner: FilterJoiner) -> Self {
        self.joiner = joiner;
        self
    }

    /// Column metadata, used to compare binary columns through hex
    pub fn columns(mut self, columns: Vec<ColumnMeta>) -> Self {
        self.columns = columns;
        self
    }

    /// Columns to select; empty selects `*`
    pub fn selects(mut self, selects: Vec<String>) -> Self {
        self.selects = selects;
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, limit: impl Into<Option<u64>>) -> Self {
        self.limit = limit.into();
        self
    }

    pub fn offset(mut self, offset: impl Into<Option<u64>>) -> Self {
        self.offset = offset.into();
        self
    }

    pub fn count_title(mut self, title: impl Into<String>) -> Self {
        self.count_title = title.into();
        self
    }

    pub fn build(&self) -> Result<SelectTopQuery> {
        let escaper = self.dialect.escaper();
        let filter = self.compile_filter(&escaper)?;

        let selects = if self.selects.is_empty() {
            "*".to_string()
        } else {
            self.selects
                .iter()
                .map(|s| escaper.quote_identifier(s))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let from = format!(
            "FROM {}",
            escaper.quote_qualified([self.table.schema.as_deref(), Some(self.table.name.as_str())])
        );

        let order = if self.order_by.is_empty() {
            String::new()
        } else {
            let keys = self
                .order_by
                .iter()
                .map(|item| {
                    let (field, dir) = item.parts();
                    format!("{} {}", escaper.quote_identifier(field), dir.as_sql())
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("ORDER BY {keys}")
        };

        let limit = self.limit.map(|l| format!("LIMIT {l}")).unwrap_or_default();
        let offset = self.offset.map(|o| format!("OFFSET {o}")).unwrap_or_default();

        let query = join_clauses([
            format!("SELECT {selects}"),
            from.clone(),
            filter.clause.clone(),
            order,
            limit,
            offset,
        ]);
        let count_query = join_clauses([
            format!(
                "SELECT count(*) AS {}",
                escaper.quote_identifier(&self.count_title)
            ),
            from,
            filter.clause,
        ]);

        tracing::debug!(table = %self.table.name, query = %query, "built select-top query");
        Ok(SelectTopQuery {
            query,
            count_query,
            params: filter.params,
        })
    }

    fn compile_filter(&self, escaper: &Escaper) -> Result<CompiledFilter> {
        match &self.filters {
            FilterInput::Raw(raw) => {
                let condition = escaper.escape_literal(Some(raw.trim())).unwrap_or_default();
                if condition.is_empty() {
                    Ok(CompiledFilter::default())
                } else {
                    Ok(CompiledFilter {
                        clause: format!("WHERE {condition}"),
                        params: Vec::new(),
                    })
                }
            }
            FilterInput::Structured(filters) => FilterCompiler::for_dialect(&self.dialect)
                .with_columns(&self.columns)
                .with_joiner(self.joiner)
                .compile(filters),
        }
    }
}

fn join_clauses<const N: usize>(clauses: [String; N]) -> String {
    clauses
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_core::{FilterOperator, TableFilter};

    #[test]
    fn paginated_select_with_count() {
        let filters = vec![TableFilter::new("status", FilterOperator::Eq, "open")];
        let q = SelectTop::new(TableOrView::table("orders"))
            .filters(FilterInput::Structured(filters))
            .order_by(vec![OrderBy::Field("id".into())])
            .limit(5)
            .offset(10)
            .build()
            .unwrap();

        assert_eq!(
            q.query,
            "SELECT * FROM `orders` WHERE `status` = ? ORDER BY `id` ASC LIMIT 5 OFFSET 10"
        );
        assert_eq!(
            q.count_query,
            "SELECT count(*) AS `total` FROM `orders` WHERE `status` = ?"
        );
        assert_eq!(q.params, vec![Value::from("open")]);
    }

    #[test]
    fn limit_and_offset_only_when_given() {
        let q = SelectTop::new(TableOrView::table("t")).build().unwrap();
        assert_eq!(q.query, "SELECT * FROM `t`");
        assert!(!q.query.contains("LIMIT"));
        assert!(!q.count_query.contains("OFFSET"));
    }

    #[test]
    fn selected_columns_are_quoted_and_schema_qualified() {
        let q = SelectTop::new(TableOrView::table("users").with_schema("main"))
            .selects(vec!["id".into(), "e?mail".into()])
            .order_by(vec![OrderBy::desc("id"), OrderBy::asc("e?mail")])
            .build()
            .unwrap();
        assert_eq!(
            q.query,
            "SELECT `id`, `e?mail` FROM `main`.`users` ORDER BY `id` DESC, `e?mail` ASC"
        );
    }

    #[test]
    fn raw_filters_are_spliced_without_terminators() {
        let q = SelectTop::new(TableOrView::table("t"))
            .filters(FilterInput::Raw("id > 3; DROP TABLE t".into()))
            .build()
            .unwrap();
        assert_eq!(q.query, "SELECT * FROM `t` WHERE id > 3 DROP TABLE t");
        assert!(q.params.is_empty());

        let q = SelectTop::new(TableOrView::table("t"))
            .filters(FilterInput::Raw("   ".into()))
            .build()
            .unwrap();
        assert_eq!(q.count_query, "SELECT count(*) AS `total` FROM `t`");
    }

    #[test]
    fn order_by_deserializes_from_both_shapes() {
        let order: Vec<OrderBy> =
            serde_json::from_str(r#"["id", {"field": "name", "dir": "DESC"}, {"field": "age"}]"#)
                .unwrap();
        assert_eq!(
            order,
            vec![
                OrderBy::Field("id".into()),
                OrderBy::desc("name"),
                OrderBy::asc("age"),
            ]
        );
    }
}

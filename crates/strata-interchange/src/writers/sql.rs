//! SQL `INSERT` statement output

use indexmap::IndexMap;
use std::path::Path;
use strata_core::{ColumnMeta, DialectInfo, Result, TableInsert, TableOrView, Value};
use strata_query::{ChangeBuilder, InsertOptions};

use super::{ChunkFile, FormatWriter};
use crate::options::OutputOptions;

/// Writes one literal `INSERT` statement per row
pub struct SqlWriter {
    file: ChunkFile,
    builder: ChangeBuilder,
    table: String,
    schema: Option<String>,
    columns: Vec<ColumnMeta>,
}

impl SqlWriter {
    pub fn create(
        path: &Path,
        output: &OutputOptions,
        table: &TableOrView,
        dialect: &DialectInfo,
    ) -> Result<Self> {
        let file = ChunkFile::create(path)?;
        // a renamed target drops the source schema
        let (table_name, schema) = match &output.sql_table_name {
            Some(name) => (name.clone(), None),
            None => (table.name.clone(), table.schema.clone()),
        };
        tracing::debug!(path = %path.display(), table = %table_name, "created SQL writer");
        Ok(Self {
            file,
            builder: ChangeBuilder::for_dialect(dialect),
            table: table_name,
            schema,
            columns: Vec::new(),
        })
    }

    fn statement(&self, row: &[Value]) -> Result<String> {
        let data: IndexMap<String, Value> = self
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect();
        let insert = TableInsert {
            table: self.table.clone(),
            schema: self.schema.clone(),
            dataset: None,
            data: vec![data],
        };
        let options = InsertOptions {
            columns: &self.columns,
            ..InsertOptions::default()
        };
        self.builder
            .insert(&insert, &options)?
            .to_literal_sql(self.builder.escaper())
    }
}

impl FormatWriter for SqlWriter {
    fn begin(&mut self, columns: &[ColumnMeta]) -> Result<()> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn write_chunk(&mut self, rows: &[Vec<Value>]) -> Result<()> {
        let mut buf = String::new();
        for row in rows {
            buf.push_str(&self.statement(row)?);
            buf.push_str(";\n");
        }
        self.file.write_all(buf.as_bytes())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()
    }
}

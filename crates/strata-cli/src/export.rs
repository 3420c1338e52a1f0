//! `strata export`

use anyhow::{Context, bail};
use clap::Args;
use std::io::Write;
use std::path::PathBuf;
use strata_core::{DEFAULT_CHUNK_SIZE, FilterInput, TableOrView};
use strata_interchange::{
    ExportEvent, ExportFormat, ExportHost, ExportOptions, ExportRequest, ExportStatus,
    OutputOptions,
};
use strata_query::OrderBy;

use crate::ConnectionArgs;

#[derive(Debug, Args)]
pub(crate) struct ExportArgs {
    /// Read the whole request from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["table", "output"])]
    request: Option<PathBuf>,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Table or view to export
    #[arg(long, short)]
    table: Option<String>,

    /// Schema the table lives in
    #[arg(long)]
    schema: Option<String>,

    /// csv, json, jsonl, sql or xlsx
    #[arg(long, short, default_value = "csv")]
    format: ExportFormat,

    /// Output file (defaults to <table>.<extension>)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Rows per cursor read
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Stop after this many rows
    #[arg(long)]
    limit: Option<u64>,

    /// Raw SQL condition, without the WHERE keyword
    #[arg(long = "where")]
    condition: Option<String>,

    /// Sort key, `column` or `column:desc`; repeatable
    #[arg(long = "order-by", value_parser = parse_order_by)]
    order_by: Vec<OrderBy>,

    /// Only these columns (comma separated)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Leave these columns out (comma separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Skip the count query (progress then has no percentage)
    #[arg(long)]
    no_count: bool,

    /// CSV delimiter
    #[arg(long, default_value = ",")]
    delimiter: String,

    /// Omit the CSV/XLSX header row
    #[arg(long)]
    no_header: bool,

    /// Text written for NULL in CSV and XLSX
    #[arg(long, default_value = "")]
    null_text: String,

    /// Indent JSON output
    #[arg(long)]
    pretty: bool,

    /// Table name used in SQL output
    #[arg(long)]
    sql_table_name: Option<String>,
}

fn parse_order_by(value: &str) -> Result<OrderBy, String> {
    match value.rsplit_once(':') {
        None => Ok(OrderBy::asc(value)),
        Some((field, dir)) => match dir.to_ascii_lowercase().as_str() {
            "asc" => Ok(OrderBy::asc(field)),
            "desc" => Ok(OrderBy::desc(field)),
            other => Err(format!("unknown sort direction '{}', expected asc or desc", other)),
        },
    }
}

impl ExportArgs {
    fn into_request(self) -> anyhow::Result<ExportRequest> {
        if let Some(path) = &self.request {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading export request {}", path.display()))?;
            return serde_json::from_str(&text)
                .with_context(|| format!("parsing export request {}", path.display()));
        }

        let Some(name) = self.table else {
            bail!("--table is required unless --request is given");
        };
        let file_path = self
            .output
            .unwrap_or_else(|| PathBuf::from(format!("{}.{}", name, self.format.extension())));
        let filters = match self.condition {
            Some(condition) => FilterInput::Raw(condition),
            None => FilterInput::default(),
        };

        Ok(ExportRequest {
            connection_config: self.connection.to_config(),
            database: None,
            export_format: self.format,
            file_path,
            table: TableOrView {
                schema: self.schema,
                ..TableOrView::table(name)
            },
            filters,
            options: ExportOptions {
                chunk_size: self.chunk_size,
                included_columns: self.columns,
                excluded_columns: self.exclude,
                row_limit: self.limit,
                order_by: self.order_by,
                count_rows: !self.no_count,
                ..ExportOptions::default()
            },
            output_options: OutputOptions {
                delimiter: self.delimiter,
                include_header: !self.no_header,
                null_text: self.null_text,
                pretty: self.pretty,
                sql_table_name: self.sql_table_name,
                sheet_name: None,
            },
        })
    }
}

pub(crate) async fn run(args: ExportArgs) -> anyhow::Result<()> {
    let request = args.into_request()?;
    let file_path = request.file_path.clone();

    let host = std::sync::Arc::new(ExportHost::default());
    let mut handle = host.start(request)?;

    // Ctrl-C stops the export at the next chunk boundary
    let cancel_host = std::sync::Arc::clone(&host);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_host.cancel();
        }
    });

    let mut stderr = std::io::stderr();
    while let Some(event) = handle.next_event().await {
        if let ExportEvent::Progress(progress) = event {
            match progress.percent_complete {
                Some(percent) => {
                    let _ = write!(stderr, "\r{} rows ({:.0}%)", progress.rows_exported, percent);
                }
                None => {
                    let _ = write!(stderr, "\r{} rows", progress.rows_exported);
                }
            }
            let _ = stderr.flush();
        }
    }
    let _ = writeln!(stderr);

    match handle.wait().await {
        ExportStatus::Completed(summary) => {
            println!(
                "exported {} rows to {} in {} ms",
                summary.rows_exported,
                file_path.display(),
                summary.elapsed_ms
            );
            Ok(())
        }
        ExportStatus::Cancelled(summary) => {
            println!("export cancelled after {} rows", summary.rows_exported);
            Ok(())
        }
        ExportStatus::Failed { kind, message } => bail!("export failed ({:?}): {}", kind, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use strata_query::SortDirection;

    fn export_args(argv: &[&str]) -> ExportArgs {
        let mut full = vec!["strata", "export", "--driver", "sqlite"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            crate::Command::Export(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn order_by_accepts_direction_suffix() {
        assert_eq!(parse_order_by("id").unwrap(), OrderBy::asc("id"));
        assert_eq!(parse_order_by("created:DESC").unwrap(), OrderBy::desc("created"));
        assert!(parse_order_by("id:sideways").is_err());
    }

    #[test]
    fn flags_build_a_request() {
        let request = export_args(&[
            "--database",
            "app.db",
            "--table",
            "users",
            "--format",
            "jsonl",
            "--chunk-size",
            "100",
            "--where",
            "age > 30",
            "--order-by",
            "id:desc",
            "--exclude",
            "password,salt",
        ])
        .into_request()
        .unwrap();

        assert_eq!(request.export_format, ExportFormat::Jsonl);
        assert_eq!(request.file_path, PathBuf::from("users.jsonl"));
        assert_eq!(request.connection_config.database.as_deref(), Some("app.db"));
        assert_eq!(request.filters, FilterInput::Raw("age > 30".into()));
        assert_eq!(request.options.chunk_size, 100);
        assert_eq!(request.options.excluded_columns, vec!["password", "salt"]);
        assert_eq!(
            request.options.order_by,
            vec![OrderBy::Directed {
                field: "id".into(),
                dir: SortDirection::Desc
            }]
        );
    }

    #[test]
    fn request_file_is_read_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{
                "connectionConfig": {"driver": "sqlite", "database": "app.db"},
                "exportFormat": "xlsx",
                "filePath": "out.xlsx",
                "table": {"name": "orders", "schema": "main"}
            }"#,
        )
        .unwrap();

        let request = export_args(&["--request", path.to_str().unwrap()])
            .into_request()
            .unwrap();
        assert_eq!(request.export_format, ExportFormat::Xlsx);
        assert_eq!(request.table.schema.as_deref(), Some("main"));
    }

    #[test]
    fn table_is_required_without_request() {
        assert!(export_args(&["--database", "app.db"]).into_request().is_err());
    }

    #[test]
    fn unknown_format_is_rejected_by_the_parser() {
        let argv = ["strata", "export", "--table", "t", "--format", "parquet"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}

//! `strata changes`

use anyhow::{Context, bail};
use clap::Args;
use std::path::{Path, PathBuf};
use strata_core::TableChanges;
use strata_drivers::DriverRegistry;
use strata_query::{ChangeBuilder, ExecutionType, IdentifiedStatement, ensure_read_only_allowed};

use crate::ConnectionArgs;

#[derive(Debug, Args)]
pub(crate) struct ChangesArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// JSON file with `inserts`, `updates` and `deletes`
    #[arg(long)]
    changes: PathBuf,

    /// Execute the statements instead of printing them
    #[arg(long)]
    apply: bool,

    /// Refuse to execute anything that writes
    #[arg(long, env = "STRATA_READ_ONLY")]
    read_only: bool,
}

fn load_changes(path: &Path) -> anyhow::Result<TableChanges> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading changes {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing changes {}", path.display()))
}

pub(crate) async fn run(args: ChangesArgs) -> anyhow::Result<()> {
    let changes = load_changes(&args.changes)?;
    let registry = DriverRegistry::with_defaults();
    let Some(dialect) = registry.dialect_info(&args.connection.driver) else {
        bail!("unknown database driver '{}'", args.connection.driver);
    };
    let builder = ChangeBuilder::for_dialect(&dialect);

    if !args.apply {
        match builder.apply_changes_sql(&changes)? {
            Some(sql) => println!("{}", sql),
            None => tracing::info!("no changes to render"),
        }
        return Ok(());
    }

    let mut statements = builder.inserts(&changes.inserts, &Default::default())?;
    statements.extend(builder.updates(&changes.updates)?);
    statements.extend(builder.deletes(&changes.deletes)?);

    let identified: Vec<IdentifiedStatement> = statements
        .iter()
        .map(|s| IdentifiedStatement {
            text: s.sql.clone(),
            execution_type: ExecutionType::Modification,
        })
        .collect();
    ensure_read_only_allowed(&identified, args.read_only)?;

    let connection = registry.connect(&args.connection.to_config()).await?;
    let mut affected = 0;
    let mut outcome = Ok(());
    for statement in &statements {
        match connection
            .execute(&statement.executable_sql(), &statement.params)
            .await
        {
            Ok(result) => affected += result.affected_rows,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    if let Err(e) = connection.close().await {
        tracing::warn!(error = %e, "failed to close connection");
    }
    outcome?;

    println!("{} statements applied, {} rows affected", statements.len(), affected);
    Ok(())
}

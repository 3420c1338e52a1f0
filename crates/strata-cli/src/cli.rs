//! strata - export tables and render change scripts from the command line
//!
//! Examples:
//!   strata export --database app.db --table users --format csv -o users.csv
//!   strata export --request export.json
//!   strata changes --database app.db --changes edits.json
//!   strata changes --database app.db --changes edits.json --apply
//!   strata drivers

mod changes;
mod export;
mod logging;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use strata_core::ConnectionConfig;

#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Stream table exports and render change scripts")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv). RUST_LOG overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write JSON logs to the strata log directory
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Export one table or view to a file
    Export(export::ExportArgs),
    /// Render (and optionally apply) inserts, updates and deletes from a JSON file
    Changes(changes::ChangesArgs),
    /// List the registered database drivers
    Drivers,
}

/// Where to connect
#[derive(Debug, Clone, Args)]
pub(crate) struct ConnectionArgs {
    /// Driver id
    #[arg(long, env = "STRATA_DRIVER", default_value = "sqlite")]
    pub driver: String,

    /// Database file, or a libsql:// / https:// URL for libSQL servers
    #[arg(long, env = "STRATA_DATABASE")]
    pub database: Option<String>,

    /// Auth token for remote libSQL
    #[arg(long, env = "STRATA_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,
}

impl ConnectionArgs {
    pub fn to_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.driver);
        config.database = self.database.clone();
        if let Some(token) = &self.auth_token {
            config = config.with_param("authToken", token.as_str());
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = logging::LoggingConfig::default().with_verbosity(cli.verbose);
    log_config.enable_json_logs = cli.log_json;
    let _log_guard = logging::init(log_config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Command::Export(args) => export::run(args).await,
            Command::Changes(args) => changes::run(args).await,
            Command::Drivers => {
                list_drivers();
                Ok(())
            }
        }
    })
}

fn list_drivers() {
    let registry = strata_drivers::DriverRegistry::with_defaults();
    for id in registry.list() {
        let Some(driver) = registry.get(id) else {
            continue;
        };
        let caps = driver.capabilities();
        println!(
            "{:<8} {:<10} upsert={} streaming={} remote={}",
            id,
            driver.display_name(),
            caps.supports_upsert,
            caps.supports_streaming,
            caps.is_remote
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn connection_args_carry_the_auth_token() {
        let args = ConnectionArgs {
            driver: "libsql".into(),
            database: Some("libsql://db.example.io".into()),
            auth_token: Some("secret".into()),
        };
        let config = args.to_config();
        assert_eq!(config.driver, "libsql");
        assert_eq!(config.database.as_deref(), Some("libsql://db.example.io"));
        assert_eq!(config.get_string("authToken").as_deref(), Some("secret"));
    }
}

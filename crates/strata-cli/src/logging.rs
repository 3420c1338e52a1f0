//! Logging setup for the strata CLI
//!
//! Console output goes to stderr so exported data and generated SQL on
//! stdout stay clean. A JSON file layer can be switched on for bug reports.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files
    pub log_dir: PathBuf,

    /// Write JSON logs to a daily rolling file in `log_dir`
    pub enable_json_logs: bool,

    /// Include file/line information in console logs
    pub include_location: bool,

    /// Log span open/close (for timing async operations)
    pub enable_spans: bool,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: false,
            include_location: cfg!(debug_assertions),
            enable_spans: false,
            default_filter: "warn,strata_cli=info,strata_interchange=info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Raise the default filter by `-v` count
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.default_filter = match verbose {
            0 => return self,
            1 => "info,strata_cli=debug,strata_interchange=debug".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        self.enable_spans = verbose >= 2;
        self
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the JSON file writer and must be kept alive
/// until the program exits.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the configured default
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(span_events.clone())
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "strata.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).init();

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        "logging initialized"
    );

    Ok(guard)
}

/// Default directory for JSON log files
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("strata")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_default_filter() {
        let quiet = LoggingConfig::default().with_verbosity(0);
        assert_eq!(quiet.default_filter, LoggingConfig::default().default_filter);

        let loud = LoggingConfig::default().with_verbosity(2);
        assert_eq!(loud.default_filter, "debug");
        assert!(loud.enable_spans);
    }

    #[test]
    fn log_directory_ends_with_strata_logs() {
        assert!(log_directory().ends_with("strata/logs"));
    }
}

// gabble_log — process-wide logging setup for the gabble chat binaries.
//
// Thin wrapper over the `tracing` ecosystem: the rest of the workspace logs
// through the `debug!` / `info!` / `warn!` / `error!` macros and never touches
// subscriber construction. This crate owns the one-time global setup:
// filter parsing (via `GABBLE_LOG`), output selection, and the append-mode
// log file the server daemon writes to.
//
// Initialization is idempotent. The global subscriber can only be installed
// once per process; a second `init_logging` call (another library consumer,
// a test harness, a re-entrant main) is a no-op rather than an error.

use std::path::{Path, PathBuf};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted for the default filter (e.g. `debug`,
/// `gabble_chat=debug,info`).
pub const LOG_ENV_VAR: &str = "GABBLE_LOG";

/// Default append-mode log file for the server daemon.
pub const DEFAULT_LOG_FILE: &str = "gabble-chat.log";

/// Errors from logging setup.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log filter {filter:?}: {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("failed to open log file {path}: {source}")]
    OpenLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr (for the CLI client).
    Stderr,
    /// Log to an append-mode file (for the server daemon).
    File,
    /// Log to both stderr and file.
    Both,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination.
    pub output: LogOutput,
    /// Filter directive (e.g. "info", "gabble_chat=debug,warn").
    pub filter: String,
    /// Log file path, used when `output` involves a file.
    pub file: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            file: DEFAULT_LOG_FILE.into(),
        }
    }
}

impl LogConfig {
    /// Config for the CLI client: stderr only, quiet by default so log lines
    /// do not interleave with the chat display.
    pub fn client() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "warn".into()),
            ..Self::default()
        }
    }

    /// Config for the server daemon: stderr plus the append-mode log file.
    pub fn server() -> Self {
        Self {
            output: LogOutput::Both,
            filter: std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".into()),
            ..Self::default()
        }
    }
}

/// Initialize logging with the default configuration.
pub fn init_logging() -> Result<(), LogError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with a custom configuration. Repeated calls after the
/// first are no-ops.
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| LogError::InvalidFilter {
        filter: config.filter.clone(),
        message: e.to_string(),
    })?;

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    match config.output {
        LogOutput::Stderr => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init();
        }
        LogOutput::File => {
            let file = open_log_file(&config.file)?;
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_writer(file).with_ansi(false))
                .try_init();
        }
        LogOutput::Both => {
            let file = open_log_file(&config.file)?;
            let file_layer = fmt::layer()
                .with_target(true)
                .with_writer(file)
                .with_ansi(false);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
        }
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LogError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::OpenLogFile {
            path: path.to_path_buf(),
            source,
        })
}

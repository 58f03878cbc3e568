//! Log output for the catshopper binary
//!
//! One file per day under `$XDG_STATE_HOME/catshopper/`, pruned to
//! `[logging] max_files`. API keys are only ever logged through
//! [`crate::api::redact`].

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

/// Flushes buffered log lines when dropped; hold it for the life of `main`
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Install the global subscriber. `RUST_LOG` overrides `config.level`.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let dir = Config::state_dir();
    let (writer, worker) = daily_writer(&dir, config.max_files)?;

    tracing_subscriber::registry()
        .with(level_filter(&config.level))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(dir = %dir.display(), level = %config.level, "catshopper logging ready");
    Ok(LoggingGuard { _worker: worker })
}

/// Route log lines through the test harness's captured output
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(level_filter("catshopper_core=debug"))
        .with_test_writer()
        .try_init();
}

/// Base path of the log file; the appender inserts the date before the
/// suffix (`catshopper.2025-03-01.log`)
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

fn level_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn daily_writer(dir: &Path, max_files: usize) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("catshopper")
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot write logs to {}: {}", dir.display(), e)))?;
    Ok(tracing_appender::non_blocking(appender))
}

//! tracing bootstrap: env filter, console output and optional rolling files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LogRotation, LoggingConfig};

/// Log file name prefix inside the configured directory
const LOG_FILE_PREFIX: &str = "fuelwatch.log";

/// Build the filter: `RUST_LOG` wins, then the configured level, then `info`
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Create the log directory if it is missing
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    Ok(())
}

fn file_appender(dir: &Path, rotation: LogRotation) -> rolling::RollingFileAppender {
    match rotation {
        LogRotation::Daily => rolling::daily(dir, LOG_FILE_PREFIX),
        LogRotation::Hourly => rolling::hourly(dir, LOG_FILE_PREFIX),
        LogRotation::Never => rolling::never(dir, LOG_FILE_PREFIX),
    }
}

/// Install the global subscriber.
///
/// Console output always goes to stderr; when `config.dir` is set a rolling
/// file is written as well and the returned guard must be kept alive to flush
/// it. Calling this twice fails instead of panicking.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = match config.format {
        LogFormat::Plain => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .boxed(),
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            ensure_log_dir(dir)?;
            let (writer, guard) = non_blocking(file_appender(dir, config.rotation));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console)
        .with(file)
        .try_init()
        .context("logging is already initialised")?;

    tracing::debug!(
        "Logging initialised: level={}, format={:?}, dir={:?}, rotation={:?}",
        config.level,
        config.format,
        config.dir,
        config.rotation
    );
    Ok(guard)
}

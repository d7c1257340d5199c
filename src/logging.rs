//! Tracing subscriber setup
//!
//! `RUST_LOG` overrides the configured level. With a log directory, a daily
//! rolling file receives the same events; keep the returned guard alive or
//! buffered lines are lost on exit.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "deckhub.log";

pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let (file_writer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match (config.json, file_writer) {
        (true, Some(file)) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout.and(file)))
            .try_init(),
        (true, None) => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        (false, Some(file)) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::io::stdout.and(file)),
            )
            .try_init(),
        (false, None) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

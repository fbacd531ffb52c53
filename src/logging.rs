//! Log output: human-readable lines on stderr and in a rotating file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::error::ConfigError;

pub const LOG_FILE_PREFIX: &str = "mail_processor";

/// Rotated files kept on disk.
pub const MAX_LOG_FILES: usize = 5;

/// Daily-rotating appender in `dir`, created if missing.
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender, ConfigError> {
    std::fs::create_dir_all(dir)?;
    Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(|e| ConfigError::InvalidValue {
            key: "MAIL_LOG_DIR".to_string(),
            message: e.to_string(),
        })
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the life of the process.
pub fn init(log_dir: &Path) -> Result<WorkerGuard, ConfigError> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

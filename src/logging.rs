use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LEVEL_ENV: &str = "TRACING_LEVEL";
pub const LOG_FILE_ENV: &str = "LOG_FILE_PATH";
pub const DEFAULT_FILTER: &str = "info";
pub const DEFAULT_LOG_FILE: &str = "./logs/blob-mirror.log";

/// Filter directive and log file, from the environment or the defaults.
fn resolve(level: Option<String>, log_file: Option<String>) -> (String, PathBuf) {
    let level = level
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let log_file = log_file
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    (level, PathBuf::from(log_file))
}

/// Install stdout and file logging. Keep the returned guard alive until exit,
/// dropping it flushes the file writer.
pub fn init_logger() -> impl Drop {
    let (level, log_file) = resolve(env::var(LEVEL_ENV).ok(), env::var(LOG_FILE_ENV).ok());

    let file_appender = tracing_appender::rolling::never("./", &log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .with_thread_names(true)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .with(EnvFilter::new(&level))
        .init();

    info!(
        "Logging at level {} to stdout and {}",
        level,
        log_file.display()
    );

    guard
}

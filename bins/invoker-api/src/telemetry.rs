// Structured log sink setup
// JSON lines to stdout, or to a dated file when LOG_WRITE_MODE=file

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use invoker_common::config::{LogConfig, LogWriteMode};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub fn init(log: &LogConfig) -> Result<()> {
    // RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.filter_directive()));

    let builder = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true);

    match log.write_mode {
        LogWriteMode::Console => builder.try_init().map_err(|e| anyhow!(e))?,
        LogWriteMode::File => {
            let path = log_file_path(&log.path, Utc::now().date_naive());
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            builder
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow!(e))?
        }
    }

    Ok(())
}

/// `<prefix>invoker-YYYY-MM-DD.log`; the prefix is used verbatim
pub fn log_file_path(prefix: &str, date: NaiveDate) -> PathBuf {
    PathBuf::from(format!("{}invoker-{}.log", prefix, date.format("%Y-%m-%d")))
}

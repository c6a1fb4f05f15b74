//! Log sinks: the console and a daily file in the plan's log directory.
//!
//! Library crates log through the `log` facade; the subscriber installed
//! here bridges those records into both sinks.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Name of the log file for one day
pub fn log_file_name(day: NaiveDate) -> String {
    format!("MigrationLog-{}.log", day.format("%Y%m%d"))
}

/// Install the global subscriber. Returns the path of today's log file.
pub fn init(log_dir: &Path, verbose: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name(Local::now().date_naive()));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let daily = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false);

    Registry::default()
        .with(console)
        .with(daily)
        .with(filter)
        .try_init()
        .context("failed to install logger")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(log_file_name(day), "MigrationLog-20240307.log");
    }
}

//! CLI argument definitions using clap derive API

use clap::Parser;
use mig_core::DEFAULT_PLAN_FILE;
use std::path::PathBuf;

/// mig - ordered, failure-isolated database migrations
#[derive(Parser, Debug)]
#[command(name = "mig")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the migration plan
    #[arg(default_value = DEFAULT_PLAN_FILE)]
    pub plan: PathBuf,

    /// Skip steps that already succeeded for this plan
    #[arg(long)]
    pub resume: bool,

    /// Log debug detail (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

//! mig - runs pre-scripts, schema package deployments and post-scripts
//! against a set of databases

use clap::Parser;
use std::process;

mod cli;
mod commands;
mod logging;

use cli::Cli;
use commands::common::ExitCode;
use commands::run;

#[tokio::main]
async fn main() -> process::ExitCode {
    let cli = Cli::parse();

    match run::execute(&cli).await {
        Ok(()) => process::ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<ExitCode>() {
            Some(code) => process::ExitCode::from(code.0),
            None => {
                eprintln!("Error: {:#}", err);
                process::ExitCode::FAILURE
            }
        },
    }
}

//! Run command implementation

use anyhow::Result;
use mig_core::{ExecutionLedger, MigrationPlan};
use mig_db::DuckDbBackend;
use mig_deploy::DuckDbDeployer;
use mig_run::{
    Orchestrator, PackageDeployStepExecutor, RunError, RunOptions, RunReport, ScriptStepExecutor,
    StepDispatcher, StepExecutor,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::commands::common::{ExitCode, EXIT_CONFIG, EXIT_OK, EXIT_RUN_FAILED};
use crate::logging;

/// Execute a migration plan end to end
pub async fn execute(cli: &Cli) -> Result<()> {
    // logging needs the plan's log directory, so plan errors go to stderr
    let plan = MigrationPlan::load(&cli.plan).map_err(|e| {
        eprintln!("{}", e);
        ExitCode(EXIT_CONFIG)
    })?;

    let log_path = logging::init(&plan.settings.log_dir, cli.verbose).map_err(|e| {
        eprintln!("{:#}", e);
        ExitCode(EXIT_CONFIG)
    })?;
    log::debug!("Writing log to {}", log_path.display());

    let ledger = ExecutionLedger::open(&plan.settings.ledger_path).map_err(|e| {
        log::error!("{}", e);
        ExitCode(EXIT_CONFIG)
    })?;

    let plan = Arc::new(plan);
    let executor = duckdb_executor(&plan);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let mut orchestrator = Orchestrator::new(plan, executor, Arc::new(ledger), cancel);
    let options = RunOptions { resume: cli.resume };
    let code = match orchestrator.run(options).await {
        Ok(report) => report_exit_code(&report),
        Err(e) => {
            log::error!("Run {} stopped: {}", orchestrator.run_id(), e);
            error_exit_code(&e)
        }
    };

    if code != EXIT_OK {
        return Err(ExitCode(code).into());
    }
    Ok(())
}

fn duckdb_executor(plan: &MigrationPlan) -> Arc<dyn StepExecutor> {
    Arc::new(StepDispatcher::new(
        ScriptStepExecutor::new(Arc::new(DuckDbBackend::new()), plan.settings.script_timeout),
        PackageDeployStepExecutor::new(
            Arc::new(DuckDbDeployer::new()),
            plan.settings.deploy_timeout,
        ),
    ))
}

/// Ctrl-C cancels the run; in-flight steps are interrupted and the rest skipped
fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });
}

fn report_exit_code(report: &RunReport) -> u8 {
    if report.is_success() {
        EXIT_OK
    } else {
        EXIT_RUN_FAILED
    }
}

fn error_exit_code(err: &RunError) -> u8 {
    match err {
        RunError::Config(_) | RunError::LedgerWrite(_) | RunError::LedgerRead(_) => EXIT_CONFIG,
        RunError::Internal(_) => EXIT_RUN_FAILED,
    }
}

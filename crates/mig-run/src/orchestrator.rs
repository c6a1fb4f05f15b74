//! The migration orchestrator.
//!
//! Phases run strictly one after another. Inside a phase, steps are grouped
//! into one lane per target database: a lane runs its steps in declared
//! order, lanes for different databases run concurrently, and a semaphore
//! bounds how many steps execute at once. With a concurrency of one the
//! whole phase is a single lane, so steps run exactly in declared order.
//! Every outcome is appended to the ledger before the lane moves on.

use crate::error::{RunError, RunResult};
use crate::executor::StepExecutor;
use crate::summary::RunSummary;
use chrono::{DateTime, Utc};
use mig_core::{
    new_run_id, phase_targets, ExecutionLedger, FailurePolicy, LedgerEntry, MigrationPlan,
    PhaseKind, Step, StepId, StepResult, StepSource, TargetDatabase,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const ABORTED: &str = "aborted after earlier failure";
const CANCELLED: &str = "cancelled";

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    RunningPreScripts,
    RunningDeployments,
    RunningPostScripts,
    Complete,
    /// Stopped by abort-on-first-failure
    Failed,
    Cancelled,
}

impl RunState {
    fn running(phase: PhaseKind) -> Self {
        match phase {
            PhaseKind::PreScripts => RunState::RunningPreScripts,
            PhaseKind::PackageDeployments => RunState::RunningDeployments,
            PhaseKind::PostScripts => RunState::RunningPostScripts,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::RunningPreScripts => "running pre-scripts",
            RunState::RunningDeployments => "running deployments",
            RunState::RunningPostScripts => "running post-scripts",
            RunState::Complete => "complete",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip steps that already succeeded under the same plan hash
    pub resume: bool,
}

/// Final state of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub summary: RunSummary,
}

impl RunReport {
    /// Reached Complete with no failed step
    pub fn is_success(&self) -> bool {
        self.state == RunState::Complete && !self.summary.has_failures()
    }
}

/// State shared by all lanes of one run
struct LaneContext {
    run_id: String,
    plan: Arc<MigrationPlan>,
    executor: Arc<dyn StepExecutor>,
    ledger: Arc<ExecutionLedger>,
    permits: Semaphore,
    abort_on_failure: bool,
    aborted: AtomicBool,
    /// Fires on user cancellation
    cancel: CancellationToken,
    /// Child of `cancel`; also fired when the run cannot continue
    halt: CancellationToken,
    /// Steps that succeeded in an earlier run, with that run's id
    completed: HashMap<StepId, String>,
}

impl LaneContext {
    fn skip_reason(&self, step: &Step) -> Option<String> {
        if self.halt.is_cancelled() {
            return Some(CANCELLED.to_string());
        }
        if self.aborted.load(Ordering::SeqCst) {
            return Some(ABORTED.to_string());
        }
        self.completed
            .get(step.id())
            .map(|run| format!("already succeeded in run {}", run))
    }

    async fn dispatch(&self, step: &Step, artifact: &str) -> StepResult {
        let database = &step.target().database;
        log::info!("[{}] Running {} {}", database, step.kind_label(), artifact);

        let result = self.executor.execute(step, &self.halt).await;
        match &result {
            StepResult::Succeeded => log::info!("[{}] {} succeeded", database, artifact),
            StepResult::Failed(reason) => {
                log::error!("[{}] {} failed: {}", database, artifact, reason);
                if self.abort_on_failure {
                    self.aborted.store(true, Ordering::SeqCst);
                }
            }
            StepResult::Skipped(_) => {}
        }
        result
    }

    fn record(
        &self,
        step: &Step,
        artifact: String,
        result: &StepResult,
        started_at: DateTime<Utc>,
    ) -> RunResult<()> {
        let entry = LedgerEntry {
            run_id: self.run_id.clone(),
            plan_hash: self.plan.plan_hash.clone(),
            step_id: step.id().clone(),
            phase: step.phase(),
            database: step.target().database.clone(),
            artifact,
            outcome: result.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        self.ledger.append(&entry).map_err(RunError::LedgerWrite)
    }
}

/// Walks a migration plan phase by phase
pub struct Orchestrator {
    plan: Arc<MigrationPlan>,
    executor: Arc<dyn StepExecutor>,
    ledger: Arc<ExecutionLedger>,
    cancel: CancellationToken,
    run_id: String,
    state: RunState,
}

impl Orchestrator {
    pub fn new(
        plan: Arc<MigrationPlan>,
        executor: Arc<dyn StepExecutor>,
        ledger: Arc<ExecutionLedger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plan,
            executor,
            ledger,
            cancel,
            run_id: new_run_id(),
            state: RunState::Idle,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run every phase.
    ///
    /// Step failures never surface as `Err`; they are in the report. `Err`
    /// means the run could not continue: an artifact could not be
    /// materialized or an outcome could not be recorded.
    pub async fn run(&mut self, options: RunOptions) -> RunResult<RunReport> {
        if self.state != RunState::Idle {
            return Err(RunError::Internal(format!(
                "run {} was already started",
                self.run_id
            )));
        }

        let plan = Arc::clone(&self.plan);
        log::info!(
            "Starting {} {} (run {}, {}, concurrency {})",
            plan.app.name,
            plan.app.version,
            self.run_id,
            plan.settings.failure_policy,
            plan.settings.concurrency
        );
        if !plan.policy.block_on_possible_data_loss
            && !plan.phase(PhaseKind::PackageDeployments).is_empty()
        {
            log::warn!(
                "block_on_possible_data_loss is off: deployments may drop or alter populated objects"
            );
        }

        let completed = if options.resume {
            let done = self
                .ledger
                .succeeded_steps(&plan.plan_hash)
                .map_err(RunError::LedgerRead)?;
            log::info!(
                "Resuming: {} step(s) already succeeded for this plan",
                done.len()
            );
            done
        } else {
            HashMap::new()
        };

        let ctx = Arc::new(LaneContext {
            run_id: self.run_id.clone(),
            plan: Arc::clone(&plan),
            executor: Arc::clone(&self.executor),
            ledger: Arc::clone(&self.ledger),
            permits: Semaphore::new(plan.settings.concurrency.max(1)),
            abort_on_failure: plan.settings.failure_policy == FailurePolicy::AbortOnFirstFailure,
            aborted: AtomicBool::new(false),
            cancel: self.cancel.clone(),
            halt: self.cancel.child_token(),
            completed,
        });

        let mut summary = RunSummary::new();
        for phase in PhaseKind::ALL {
            if ctx.cancel.is_cancelled() {
                skip_phase(&ctx, phase, &mut summary)?;
                continue;
            }

            self.state = RunState::running(phase);
            log::info!("Phase {} started", phase);
            for (step, result) in run_phase(&ctx, phase).await? {
                summary.record(&step, &plan.relative_artifact(step.artifact()), &result);
            }
            let counts = summary.phase(phase);
            log::info!(
                "Phase {} finished: {} succeeded, {} failed, {} skipped",
                phase,
                counts.succeeded,
                counts.failed,
                counts.skipped
            );

            if ctx.aborted.load(Ordering::SeqCst) && !ctx.cancel.is_cancelled() {
                log::error!("Stopping after a failure in {} (abort-on-first-failure)", phase);
                self.state = RunState::Failed;
                return Ok(self.finish(summary));
            }
        }

        self.state = if ctx.cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Complete
        };
        Ok(self.finish(summary))
    }

    fn finish(&self, summary: RunSummary) -> RunReport {
        log::info!("Run {} {}", self.run_id, self.state);
        for line in summary.to_string().lines() {
            log::info!("{}", line);
        }
        RunReport {
            run_id: self.run_id.clone(),
            state: self.state,
            summary,
        }
    }
}

/// Record every step of a phase that will not start
fn skip_phase(ctx: &LaneContext, phase: PhaseKind, summary: &mut RunSummary) -> RunResult<()> {
    let result = StepResult::skipped(CANCELLED);
    for step in StepSource::new(&ctx.plan, phase) {
        let step = step.map_err(RunError::Config)?;
        let artifact = ctx.plan.relative_artifact(step.artifact());
        ctx.record(&step, artifact.clone(), &result, Utc::now())?;
        summary.record(&step, &artifact, &result);
    }
    Ok(())
}

/// Run one phase to completion; returns outcomes in declared order
async fn run_phase(
    ctx: &Arc<LaneContext>,
    phase: PhaseKind,
) -> RunResult<Vec<(Step, StepResult)>> {
    let lanes: Vec<Option<TargetDatabase>> = if ctx.plan.settings.concurrency <= 1 {
        vec![None]
    } else {
        phase_targets(&ctx.plan, phase)
            .map_err(RunError::Config)?
            .into_iter()
            .map(Some)
            .collect()
    };
    log::debug!("Phase {} runs on {} lane(s)", phase, lanes.len());

    let mut handles = Vec::with_capacity(lanes.len());
    for target in lanes {
        let ctx = Arc::clone(ctx);
        handles.push(tokio::spawn(async move { run_lane(&ctx, phase, target).await }));
    }

    let mut outcomes = Vec::new();
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(lane)) => outcomes.extend(lane),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                ctx.halt.cancel();
                first_error.get_or_insert(RunError::Internal(format!("lane task failed: {}", e)));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    outcomes.sort_by_key(|(step, _)| step.order());
    Ok(outcomes)
}

/// Run the steps of `phase` for one database (or all of them), pulling each
/// step from the source only when the previous one has been recorded
async fn run_lane(
    ctx: &LaneContext,
    phase: PhaseKind,
    target: Option<TargetDatabase>,
) -> RunResult<Vec<(Step, StepResult)>> {
    let mut source = match target {
        Some(target) => StepSource::for_target(&ctx.plan, phase, target),
        None => StepSource::new(&ctx.plan, phase),
    };

    let mut outcomes = Vec::new();
    loop {
        let step = match source.next_step() {
            Ok(Some(step)) => step,
            Ok(None) => break,
            Err(e) => {
                log::error!("{}", e);
                ctx.halt.cancel();
                return Err(RunError::Config(e));
            }
        };
        let artifact = ctx.plan.relative_artifact(step.artifact());
        let started_at = Utc::now();

        let result = match ctx.skip_reason(&step) {
            Some(reason) => StepResult::Skipped(reason),
            None => {
                let _permit = ctx
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| RunError::Internal(e.to_string()))?;
                // the state may have changed while waiting for a permit
                match ctx.skip_reason(&step) {
                    Some(reason) => StepResult::Skipped(reason),
                    None => ctx.dispatch(&step, &artifact).await,
                }
            }
        };
        if let StepResult::Skipped(reason) = &result {
            log::info!("[{}] {} skipped: {}", step.target().database, artifact, reason);
        }

        if let Err(e) = ctx.record(&step, artifact, &result, started_at) {
            log::error!("{}", e);
            ctx.halt.cancel();
            return Err(e);
        }
        outcomes.push((step, result));
    }
    Ok(outcomes)
}

//! Orchestrator behavior against synthetic plans on disk.

use async_trait::async_trait;
use mig_core::{ExecutionLedger, MigrationPlan, PhaseKind, Step, StepResult};
use mig_db::DuckDbBackend;
use mig_deploy::DuckDbDeployer;
use mig_run::{
    Orchestrator, PackageDeployStepExecutor, RunError, RunOptions, RunReport, RunState,
    ScriptStepExecutor, StepDispatcher, StepExecutor,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(String),
    End(String),
}

/// Records dispatches and detects overlapping steps on one database
#[derive(Default)]
struct FakeExecutor {
    fail: Mutex<HashSet<String>>,
    hang: HashSet<String>,
    slow: HashSet<String>,
    delay: Duration,
    events: Mutex<Vec<Event>>,
    active: Mutex<HashMap<String, usize>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    overlap: AtomicBool,
}

impl FakeExecutor {
    fn new() -> Self {
        Self::default()
    }

    fn failing(names: &[&str]) -> Self {
        let executor = Self::new();
        executor.set_failing(names);
        executor
    }

    fn set_failing(&self, names: &[&str]) {
        *self.fail.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn slow(mut self, names: &[&str]) -> Self {
        self.slow = names.iter().map(|n| n.to_string()).collect();
        self
    }

    fn hanging(mut self, names: &[&str]) -> Self {
        self.hang = names.iter().map(|n| n.to_string()).collect();
        self
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(id) => Some(id),
                Event::End(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl StepExecutor for FakeExecutor {
    async fn execute(&self, step: &Step, cancel: &CancellationToken) -> StepResult {
        let id = step.id().to_string();
        let db = step.target().database.to_string();
        let name = step
            .artifact()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        self.events.lock().unwrap().push(Event::Start(id.clone()));
        {
            let mut active = self.active.lock().unwrap();
            let n = active.entry(db.clone()).or_default();
            *n += 1;
            if *n > 1 {
                self.overlap.store(true, Ordering::SeqCst);
            }
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = if self.hang.contains(&name) {
            tokio::select! {
                _ = cancel.cancelled() => StepResult::failed("cancelled"),
                _ = tokio::time::sleep(Duration::from_secs(60)) => StepResult::Succeeded,
            }
        } else {
            let delay = if self.slow.contains(&name) {
                self.delay + Duration::from_millis(300)
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;
            let fail = self.fail.lock().unwrap();
            if fail.contains(&name) || fail.contains(&id) {
                StepResult::failed(format!("boom in {}", name))
            } else {
                StepResult::Succeeded
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(n) = self.active.lock().unwrap().get_mut(&db) {
            *n -= 1;
        }
        self.events.lock().unwrap().push(Event::End(id));
        result
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Two databases: Sales (two pre scripts, one post script) and Hr (one pre
/// script), plus a package for each.
fn two_database_fixture(settings: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("servers")).unwrap();
    write(root, "pre/sales/001_a.sql", "SELECT 1;");
    write(root, "pre/sales/002_b.sql", "SELECT 2;");
    write(root, "pre/hr/001_h.sql", "SELECT 3;");
    write(root, "packages/Sales.yml", "tables: []\n");
    write(root, "packages/Hr.yml", "tables: []\n");
    write(root, "post/sales/001_p.sql", "SELECT 4;");
    write(
        root,
        "Migration.yml",
        &format!(
            r#"
version: {{app_name: Contoso, version: 2.1.0}}
connection_strings: [servers]
pre_scripts:
  - {{database: Sales, directories: [pre/sales]}}
  - {{database: Hr, directories: [pre/hr]}}
schema_packages: [packages]
post_scripts:
  - {{database: Sales, directories: [post/sales]}}
settings:
  ledger_path: ledger.jsonl
{}
"#,
            settings
        ),
    );
    dir
}

fn load(dir: &TempDir) -> (Arc<MigrationPlan>, Arc<ExecutionLedger>) {
    let plan = MigrationPlan::load(&dir.path().join("Migration.yml")).unwrap();
    let ledger = ExecutionLedger::open(&plan.settings.ledger_path).unwrap();
    (Arc::new(plan), Arc::new(ledger))
}

async fn run_with(
    dir: &TempDir,
    executor: Arc<dyn StepExecutor>,
    options: RunOptions,
) -> (RunReport, Arc<ExecutionLedger>) {
    let (plan, ledger) = load(dir);
    let mut orchestrator =
        Orchestrator::new(plan, executor, Arc::clone(&ledger), CancellationToken::new());
    let report = orchestrator.run(options).await.unwrap();
    assert_eq!(orchestrator.state(), report.state);
    (report, ledger)
}

const SALES_A: &str = "pre_scripts/0/Sales/pre/sales/001_a.sql";
const SALES_B: &str = "pre_scripts/0/Sales/pre/sales/002_b.sql";
const HR_H: &str = "pre_scripts/0/Hr/pre/hr/001_h.sql";
const PKG_HR: &str = "schema_packages/0/Hr/packages/Hr.yml";
const PKG_SALES: &str = "schema_packages/0/Sales/packages/Sales.yml";
const POST_P: &str = "post_scripts/0/Sales/post/sales/001_p.sql";

#[tokio::test]
async fn test_phase_and_declared_order() {
    let dir = two_database_fixture("  concurrency: 1");
    let executor = Arc::new(FakeExecutor::new());
    let (report, ledger) = run_with(&dir, executor.clone(), RunOptions::default()).await;

    assert_eq!(report.state, RunState::Complete);
    assert!(report.is_success());
    assert_eq!(
        executor.started(),
        vec![SALES_A, SALES_B, HR_H, PKG_HR, PKG_SALES, POST_P]
    );

    // ledger order matches dispatch order when one step runs at a time
    let recorded: Vec<String> = ledger
        .entries_for(&report.run_id)
        .unwrap()
        .into_iter()
        .map(|e| e.step_id.to_string())
        .collect();
    assert_eq!(recorded, executor.started());
}

#[tokio::test]
async fn test_no_overlap_per_database_for_any_concurrency() {
    for concurrency in [1, 2, 4] {
        let dir = two_database_fixture(&format!("  concurrency: {}", concurrency));
        let executor = Arc::new(FakeExecutor::new().with_delay(Duration::from_millis(30)));
        let (report, _) = run_with(&dir, executor.clone(), RunOptions::default()).await;

        assert!(report.is_success());
        assert!(
            !executor.overlap.load(Ordering::SeqCst),
            "steps overlapped on one database with concurrency {}",
            concurrency
        );
        assert!(executor.max_running.load(Ordering::SeqCst) <= concurrency);
        if concurrency == 1 {
            assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
        }

        // Sales steps keep their declared order within the lane
        let started = executor.started();
        let a = started.iter().position(|s| s == SALES_A).unwrap();
        let b = started.iter().position(|s| s == SALES_B).unwrap();
        assert!(a < b);
    }
}

#[tokio::test]
async fn test_two_databases_run_in_parallel_with_phase_barrier() {
    let dir = two_database_fixture("  concurrency: 2");
    let executor = Arc::new(FakeExecutor::new().with_delay(Duration::from_millis(100)));
    let (report, _) = run_with(&dir, executor.clone(), RunOptions::default()).await;
    assert!(report.is_success());

    assert_eq!(executor.max_running.load(Ordering::SeqCst), 2);
    let events = executor.events();
    // Sales and Hr pre-scripts both start before either finishes
    let first_end = events
        .iter()
        .position(|e| matches!(e, Event::End(_)))
        .unwrap();
    assert!(events[..first_end].contains(&Event::Start(SALES_A.to_string())));
    assert!(events[..first_end].contains(&Event::Start(HR_H.to_string())));

    // no deployment starts before every pre-script has ended
    let last_pre_end = events
        .iter()
        .rposition(|e| matches!(e, Event::End(id) if id.starts_with("pre_scripts/")))
        .unwrap();
    let first_deploy_start = events
        .iter()
        .position(|e| matches!(e, Event::Start(id) if id.starts_with("schema_packages/")))
        .unwrap();
    assert!(last_pre_end < first_deploy_start);

    let last_deploy_end = events
        .iter()
        .rposition(|e| matches!(e, Event::End(id) if id.starts_with("schema_packages/")))
        .unwrap();
    let post_start = events
        .iter()
        .position(|e| *e == Event::Start(POST_P.to_string()))
        .unwrap();
    assert!(last_deploy_end < post_start);
}

#[tokio::test]
async fn test_continue_and_report() {
    let dir = two_database_fixture("  concurrency: 1");
    let executor = Arc::new(FakeExecutor::failing(&["002_b.sql"]));
    let (report, _) = run_with(&dir, executor.clone(), RunOptions::default()).await;

    assert_eq!(report.state, RunState::Complete);
    assert!(!report.is_success());

    let pre = report.summary.phase(PhaseKind::PreScripts);
    assert_eq!((pre.succeeded, pre.failed, pre.skipped), (2, 1, 0));
    // deployments and post-scripts still ran
    assert_eq!(report.summary.phase(PhaseKind::PackageDeployments).succeeded, 2);
    assert_eq!(report.summary.phase(PhaseKind::PostScripts).succeeded, 1);

    assert_eq!(report.summary.failures.len(), 1);
    let failure = &report.summary.failures[0];
    assert_eq!(failure.database, "Sales");
    assert_eq!(failure.artifact, "pre/sales/002_b.sql");
    assert_eq!(failure.reason, "boom in 002_b.sql");
}

#[tokio::test]
async fn test_abort_on_first_failure() {
    let dir = two_database_fixture("  concurrency: 1\n  failure_policy: abort-on-first-failure");
    let executor = Arc::new(FakeExecutor::failing(&["001_a.sql"]));
    let (report, ledger) = run_with(&dir, executor.clone(), RunOptions::default()).await;

    assert_eq!(report.state, RunState::Failed);
    assert!(!report.is_success());
    assert_eq!(executor.started(), vec![SALES_A]);

    let entries = ledger.entries_for(&report.run_id).unwrap();
    let outcomes: Vec<(String, StepResult)> = entries
        .into_iter()
        .map(|e| (e.step_id.to_string(), e.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (SALES_A.to_string(), StepResult::failed("boom in 001_a.sql")),
            (
                SALES_B.to_string(),
                StepResult::skipped("aborted after earlier failure")
            ),
            (
                HR_H.to_string(),
                StepResult::skipped("aborted after earlier failure")
            ),
        ]
    );
    // later phases never started
    assert_eq!(report.summary.phase(PhaseKind::PackageDeployments).total(), 0);
    assert_eq!(report.summary.phase(PhaseKind::PostScripts).total(), 0);
}

#[tokio::test]
async fn test_resume_skips_succeeded_and_retries_the_rest() {
    let dir = two_database_fixture("  concurrency: 1\n  failure_policy: abort-on-first-failure");
    let executor = Arc::new(FakeExecutor::failing(&["002_b.sql"]));
    let (first, _) = run_with(&dir, executor.clone(), RunOptions::default()).await;
    assert_eq!(first.state, RunState::Failed);

    executor.set_failing(&[]);
    executor.events.lock().unwrap().clear();
    let (second, ledger) = run_with(&dir, executor.clone(), RunOptions { resume: true }).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.state, RunState::Complete);
    // the failed step and the step skipped by the abort are attempted again
    assert_eq!(
        executor.started(),
        vec![SALES_B, HR_H, PKG_HR, PKG_SALES, POST_P]
    );

    let entries = ledger.entries_for(&second.run_id).unwrap();
    assert_eq!(entries[0].step_id, SALES_A);
    assert_eq!(
        entries[0].outcome,
        StepResult::skipped(format!("already succeeded in run {}", first.run_id))
    );
    assert_eq!(second.summary.phase(PhaseKind::PreScripts).skipped, 1);

    // a third resumed run has nothing left to do
    executor.events.lock().unwrap().clear();
    let (third, _) = run_with(&dir, executor.clone(), RunOptions { resume: true }).await;
    assert!(third.is_success());
    assert!(executor.started().is_empty());
    assert_eq!(third.summary.phase(PhaseKind::PostScripts).skipped, 1);
}

#[tokio::test]
async fn test_cancellation_skips_everything_not_started() {
    let dir = two_database_fixture("  concurrency: 1");
    let executor = Arc::new(FakeExecutor::new().hanging(&["001_a.sql"]));
    let (plan, ledger) = load(&dir);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let mut orchestrator = Orchestrator::new(plan, executor.clone(), ledger.clone(), cancel);
    let report = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(executor.started(), vec![SALES_A]);

    let outcomes: HashMap<String, StepResult> = ledger
        .entries_for(&report.run_id)
        .unwrap()
        .into_iter()
        .map(|e| (e.step_id.to_string(), e.outcome))
        .collect();
    assert_eq!(outcomes.len(), 6);
    assert_eq!(outcomes[SALES_A], StepResult::failed("cancelled"));
    for id in [SALES_B, HR_H, PKG_HR, PKG_SALES, POST_P] {
        assert_eq!(outcomes[id], StepResult::skipped("cancelled"), "{}", id);
    }
}

#[tokio::test]
async fn test_unreadable_script_is_a_config_error() {
    let dir = two_database_fixture("  concurrency: 1");
    std::fs::write(dir.path().join("post/sales/002_bad.sql"), [0xff, 0xfe, 0x00]).unwrap();
    let (plan, ledger) = load(&dir);

    let mut orchestrator = Orchestrator::new(
        plan,
        Arc::new(FakeExecutor::new()),
        ledger,
        CancellationToken::new(),
    );
    let err = orchestrator.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
}

#[tokio::test]
async fn test_orchestrator_runs_once() {
    let dir = two_database_fixture("  concurrency: 1");
    let (plan, ledger) = load(&dir);
    let mut orchestrator = Orchestrator::new(
        plan,
        Arc::new(FakeExecutor::new()),
        ledger,
        CancellationToken::new(),
    );
    orchestrator.run(RunOptions::default()).await.unwrap();
    assert!(orchestrator.run(RunOptions::default()).await.is_err());
}

fn duckdb_dispatcher(plan: &MigrationPlan) -> Arc<dyn StepExecutor> {
    Arc::new(StepDispatcher::new(
        ScriptStepExecutor::new(Arc::new(DuckDbBackend::new()), plan.settings.script_timeout),
        PackageDeployStepExecutor::new(
            Arc::new(DuckDbDeployer::new()),
            plan.settings.deploy_timeout,
        ),
    ))
}

#[tokio::test]
async fn test_timeout_fails_step_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("servers")).unwrap();
    write(
        root,
        "pre/001_endless.sql",
        "SELECT count(*) FROM range(100000000) a, range(100000000) b;",
    );
    write(root, "pre/002_create.sql", "CREATE TABLE after_timeout (id INTEGER);");
    write(
        root,
        "Migration.yml",
        r#"
version: {app_name: Contoso, version: 1.0.0}
connection_strings: [servers]
pre_scripts:
  - {database: Sales, directories: [pre]}
settings:
  script_timeout_secs: 1
  ledger_path: ledger.jsonl
"#,
    );

    let (plan, ledger) = load(&dir);
    let executor = duckdb_dispatcher(&plan);
    let mut orchestrator = Orchestrator::new(plan, executor, ledger, CancellationToken::new());
    let report = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.state, RunState::Complete);
    let pre = report.summary.phase(PhaseKind::PreScripts);
    assert_eq!((pre.succeeded, pre.failed), (1, 1));
    assert_eq!(report.summary.failures[0].reason, "timeout after 1s");
    assert_eq!(report.summary.failures[0].artifact, "pre/001_endless.sql");
}

#[tokio::test]
async fn test_end_to_end_with_duckdb() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("servers")).unwrap();
    write(
        root,
        "pre/001_legacy.sql",
        "CREATE TABLE IF NOT EXISTS customers (id INTEGER NOT NULL, email VARCHAR);\n\
         INSERT INTO customers VALUES (1, 'a@example.com');",
    );
    write(
        root,
        "packages/Sales.yml",
        r#"
tables:
  - name: customers
    columns:
      - { name: id, type: INTEGER, nullable: false }
      - { name: email, type: VARCHAR }
      - { name: active, type: BOOLEAN, nullable: false }
views:
  - { name: active_customers, sql: "SELECT id, email FROM customers WHERE active" }
"#,
    );
    write(
        root,
        "post/001_seed.sql",
        "UPDATE customers SET active = true WHERE id = 1;",
    );
    write(
        root,
        "Migration.yml",
        r#"
version: {app_name: Contoso, version: 1.0.0}
connection_strings: [servers]
pre_scripts:
  - {database: Sales, directories: [pre]}
schema_packages: [packages]
post_scripts:
  - {database: Sales, directories: [post]}
settings:
  ledger_path: ledger.jsonl
"#,
    );

    let (plan, ledger) = load(&dir);
    let executor = duckdb_dispatcher(&plan);
    let target = mig_core::TargetDatabase::new(
        root.join("servers"),
        mig_core::DatabaseName::try_new("Sales").unwrap(),
    );
    let mut orchestrator = Orchestrator::new(plan, executor, ledger, CancellationToken::new());
    let report = orchestrator.run(RunOptions::default()).await.unwrap();
    assert!(report.is_success(), "{}", report.summary);

    let conn = DuckDbBackend::open(&target).unwrap();
    let active: i64 = conn
        .query_row("SELECT count(*) FROM active_customers", [], |row| row.get(0))
        .unwrap();
    assert_eq!(active, 1);
}

fn outcomes_by_step(ledger: &ExecutionLedger, run_id: &str) -> HashMap<String, StepResult> {
    let entries = ledger.entries_for(run_id).unwrap();
    let outcomes: HashMap<String, StepResult> = entries
        .iter()
        .map(|e| (e.step_id.to_string(), e.outcome.clone()))
        .collect();
    // one entry per step, never two
    assert_eq!(outcomes.len(), entries.len());
    outcomes
}

#[tokio::test]
async fn test_abort_on_one_lane_skips_other_lanes_and_later_phases() {
    let dir = two_database_fixture("  concurrency: 2\n  failure_policy: abort-on-first-failure");
    // Sales is still busy with its first script when Hr fails
    let executor = Arc::new(FakeExecutor::failing(&["001_h.sql"]).slow(&["001_a.sql"]));
    let (report, ledger) = run_with(&dir, executor.clone(), RunOptions::default()).await;

    assert_eq!(report.state, RunState::Failed);
    let started: HashSet<String> = executor.started().into_iter().collect();
    assert_eq!(
        started,
        HashSet::from([SALES_A.to_string(), HR_H.to_string()])
    );

    let outcomes = outcomes_by_step(&ledger, &report.run_id);
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[HR_H], StepResult::failed("boom in 001_h.sql"));
    // in-flight work on the other lane finishes normally
    assert_eq!(outcomes[SALES_A], StepResult::Succeeded);
    assert_eq!(
        outcomes[SALES_B],
        StepResult::skipped("aborted after earlier failure")
    );

    assert_eq!(report.summary.phase(PhaseKind::PackageDeployments).total(), 0);
    assert_eq!(report.summary.phase(PhaseKind::PostScripts).total(), 0);
}

#[tokio::test]
async fn test_cancellation_with_parallel_lanes() {
    let dir = two_database_fixture("  concurrency: 2");
    let executor = Arc::new(FakeExecutor::new().hanging(&["001_a.sql", "001_h.sql"]));
    let (plan, ledger) = load(&dir);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let mut orchestrator = Orchestrator::new(plan, executor.clone(), ledger.clone(), cancel);
    let report = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.state, RunState::Cancelled);
    let started: HashSet<String> = executor.started().into_iter().collect();
    assert_eq!(
        started,
        HashSet::from([SALES_A.to_string(), HR_H.to_string()])
    );

    let outcomes = outcomes_by_step(&ledger, &report.run_id);
    assert_eq!(outcomes.len(), 6);
    assert_eq!(outcomes[SALES_A], StepResult::failed("cancelled"));
    assert_eq!(outcomes[HR_H], StepResult::failed("cancelled"));
    for id in [SALES_B, PKG_HR, PKG_SALES, POST_P] {
        assert_eq!(outcomes[id], StepResult::skipped("cancelled"), "{}", id);
    }
}

#[tokio::test]
async fn test_resume_tells_servers_apart() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("srv_a")).unwrap();
    std::fs::create_dir_all(root.join("srv_b")).unwrap();
    write(root, "pre/001.sql", "SELECT 1;");
    write(
        root,
        "Migration.yml",
        r#"
version: {app_name: Contoso, version: 1.0.0}
connection_strings: [srv_a, srv_b]
pre_scripts:
  - {database: Sales, connection: 0, directories: [pre]}
  - {database: Sales, connection: 1, directories: [pre]}
settings:
  ledger_path: ledger.jsonl
"#,
    );
    let on_a = "pre_scripts/0/Sales/pre/001.sql";
    let on_b = "pre_scripts/1/Sales/pre/001.sql";

    let executor = Arc::new(FakeExecutor::failing(&[on_b]));
    let (first, _) = run_with(&dir, executor.clone(), RunOptions::default()).await;
    assert_eq!(executor.started(), vec![on_a, on_b]);
    let pre = first.summary.phase(PhaseKind::PreScripts);
    assert_eq!((pre.succeeded, pre.failed), (1, 1));

    executor.set_failing(&[]);
    executor.events.lock().unwrap().clear();
    let (second, ledger) = run_with(&dir, executor.clone(), RunOptions { resume: true }).await;

    // only the server that failed is attempted again
    assert_eq!(executor.started(), vec![on_b]);
    assert!(second.is_success());
    let outcomes = outcomes_by_step(&ledger, &second.run_id);
    assert!(outcomes[on_a].is_skipped());
    assert_eq!(outcomes[on_b], StepResult::Succeeded);
}

use super::*;
use mig_core::{DatabaseName, DeploymentPolicy, PhaseKind, StepId, TargetDatabase};
use mig_deploy::{DeployReport, DeployResult};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct FixedScriptExecutor {
    outcome: fn() -> Result<(), DbError>,
    seen_timeout: Mutex<Option<Duration>>,
}

#[async_trait]
impl ScriptExecutor for FixedScriptExecutor {
    async fn execute_script(
        &self,
        _target: &TargetDatabase,
        _sql: &str,
        limits: &ExecLimits,
    ) -> mig_db::DbResult<()> {
        *self.seen_timeout.lock().unwrap() = Some(limits.timeout);
        (self.outcome)()
    }

    fn engine(&self) -> &'static str {
        "fixed"
    }
}

struct ChattyDeployer {
    fail: bool,
}

#[async_trait]
impl SchemaDeployer for ChattyDeployer {
    async fn deploy(
        &self,
        package: &SchemaPackage,
        _target: &TargetDatabase,
        _policy: &DeploymentPolicy,
        messages: mpsc::UnboundedSender<String>,
        _limits: &ExecLimits,
    ) -> DeployResult<DeployReport> {
        for table in &package.tables {
            messages.send(format!("Creating table {}", table.name)).unwrap();
        }
        if self.fail {
            return Err(DeployError::DataLoss {
                objects: "table main.legacy (3 rows)".to_string(),
            });
        }
        Ok(DeployReport {
            actions_applied: package.tables.len(),
            ..DeployReport::default()
        })
    }
}

fn target() -> TargetDatabase {
    TargetDatabase::new("/srv/db", DatabaseName::try_new("Sales").unwrap())
}

fn script_step() -> ScriptStep {
    ScriptStep {
        id: StepId::try_new("pre_scripts/Sales/pre/001.sql").unwrap(),
        phase: PhaseKind::PreScripts,
        target: target(),
        artifact: PathBuf::from("pre/001.sql"),
        order: 0,
        sql: "SELECT 1;".to_string(),
    }
}

fn package_step(artifact: &Path) -> PackageDeployStep {
    PackageDeployStep {
        id: StepId::try_new("schema_packages/Sales/packages/Sales.yml").unwrap(),
        phase: PhaseKind::PackageDeployments,
        target: target(),
        artifact: artifact.to_path_buf(),
        order: 0,
        policy: DeploymentPolicy::default(),
    }
}

fn script_executor(outcome: fn() -> Result<(), DbError>) -> (Arc<FixedScriptExecutor>, ScriptStepExecutor) {
    let db = Arc::new(FixedScriptExecutor {
        outcome,
        seen_timeout: Mutex::new(None),
    });
    let executor = ScriptStepExecutor::new(db.clone(), Duration::from_secs(900));
    (db, executor)
}

#[tokio::test]
async fn test_script_success() {
    let (db, executor) = script_executor(|| Ok(()));
    let result = executor.execute(&script_step(), &CancellationToken::new()).await;
    assert_eq!(result, StepResult::Succeeded);
    assert_eq!(*db.seen_timeout.lock().unwrap(), Some(Duration::from_secs(900)));
}

#[tokio::test]
async fn test_script_error_becomes_failed() {
    let (_, executor) =
        script_executor(|| Err(DbError::ExecutionError("syntax error at or near \"SELEC\"".into())));
    let result = executor.execute(&script_step(), &CancellationToken::new()).await;
    assert!(result.is_failed());
    assert!(result.reason().unwrap().contains("syntax error"));
}

#[tokio::test]
async fn test_script_timeout_reason() {
    let (_, executor) = script_executor(|| Err(DbError::Timeout(Duration::from_secs(900))));
    let result = executor.execute(&script_step(), &CancellationToken::new()).await;
    assert_eq!(result, StepResult::failed("timeout after 900s"));
}

#[tokio::test]
async fn test_script_cancelled_reason() {
    let (_, executor) = script_executor(|| Err(DbError::Cancelled));
    let result = executor.execute(&script_step(), &CancellationToken::new()).await;
    assert_eq!(result, StepResult::failed("cancelled"));
}

#[tokio::test]
async fn test_package_deploy_relays_messages_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Sales.yml");
    std::fs::write(
        &path,
        "tables:\n  - name: customers\n    columns: [{name: id, type: INTEGER}]\n",
    )
    .unwrap();

    let executor = PackageDeployStepExecutor::new(
        Arc::new(ChattyDeployer { fail: false }),
        Duration::from_secs(60),
    );
    let result = executor
        .execute(&package_step(&path), &CancellationToken::new())
        .await;
    assert_eq!(result, StepResult::Succeeded);
}

#[tokio::test]
async fn test_package_deploy_error_becomes_failed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Sales.yml");
    std::fs::write(
        &path,
        "tables:\n  - name: customers\n    columns: [{name: id, type: INTEGER}]\n",
    )
    .unwrap();

    let executor = PackageDeployStepExecutor::new(
        Arc::new(ChattyDeployer { fail: true }),
        Duration::from_secs(60),
    );
    let result = executor
        .execute(&package_step(&path), &CancellationToken::new())
        .await;
    assert!(result.reason().unwrap().contains("possible data loss"));
}

#[tokio::test]
async fn test_invalid_package_fails_without_deploying() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Sales.yml");
    std::fs::write(&path, "tables: [{name: t, columns: []}]\n").unwrap();

    let executor = PackageDeployStepExecutor::new(
        Arc::new(ChattyDeployer { fail: false }),
        Duration::from_secs(60),
    );
    let result = executor
        .execute(&package_step(&path), &CancellationToken::new())
        .await;
    assert!(result.reason().unwrap().contains("[E006]"));
}

#[tokio::test]
async fn test_dispatcher_routes_by_kind() {
    let (_, scripts) = script_executor(|| Err(DbError::Cancelled));
    let packages = PackageDeployStepExecutor::new(
        Arc::new(ChattyDeployer { fail: false }),
        Duration::from_secs(60),
    );
    let dispatcher = StepDispatcher::new(scripts, packages);

    let result = dispatcher
        .execute(&Step::Script(script_step()), &CancellationToken::new())
        .await;
    assert_eq!(result, StepResult::failed("cancelled"));

    let missing = Path::new("/definitely/not/here/Sales.yml");
    let result = dispatcher
        .execute(
            &Step::PackageDeploy(package_step(missing)),
            &CancellationToken::new(),
        )
        .await;
    assert!(result.reason().unwrap().contains("[E005]"));
}

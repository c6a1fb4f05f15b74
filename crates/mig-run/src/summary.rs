//! Run summary: per-phase counts and the failure list.

use mig_core::{PhaseKind, Step, StepId, StepResult};
use serde::Serialize;
use std::fmt;

/// Outcome counts for one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub phase: PhaseKind,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PhaseSummary {
    fn new(phase: PhaseKind) -> Self {
        Self {
            phase,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// A failed step, for the final report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub step_id: StepId,
    pub database: String,
    pub artifact: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub phases: [PhaseSummary; 3],
    pub failures: Vec<FailureRecord>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            phases: PhaseKind::ALL.map(PhaseSummary::new),
            failures: Vec::new(),
        }
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: &Step, artifact: &str, result: &StepResult) {
        let phase = self.phase_mut(step.phase());
        match result {
            StepResult::Succeeded => phase.succeeded += 1,
            StepResult::Skipped(_) => phase.skipped += 1,
            StepResult::Failed(reason) => {
                phase.failed += 1;
                self.failures.push(FailureRecord {
                    step_id: step.id().clone(),
                    database: step.target().database.to_string(),
                    artifact: artifact.to_string(),
                    reason: reason.clone(),
                });
            }
        }
    }

    pub fn phase(&self, kind: PhaseKind) -> &PhaseSummary {
        &self.phases[kind as usize]
    }

    fn phase_mut(&mut self, kind: PhaseKind) -> &mut PhaseSummary {
        &mut self.phases[kind as usize]
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.phases {
            writeln!(
                f,
                "  {:<16} {} succeeded, {} failed, {} skipped",
                p.phase.as_str(),
                p.succeeded,
                p.failed,
                p.skipped
            )?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "  Failures:")?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "    [{}] {}: {}",
                    failure.database, failure.artifact, failure.reason
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mig_core::{DatabaseName, ScriptStep, TargetDatabase};
    use std::path::PathBuf;

    fn step(phase: PhaseKind, name: &str) -> Step {
        Step::Script(ScriptStep {
            id: StepId::try_new(format!("{}/Sales/{}", phase.as_str(), name)).unwrap(),
            phase,
            target: TargetDatabase::new("/srv", DatabaseName::try_new("Sales").unwrap()),
            artifact: PathBuf::from(name),
            order: 0,
            sql: String::new(),
        })
    }

    #[test]
    fn test_counts_per_phase() {
        let mut summary = RunSummary::new();
        summary.record(&step(PhaseKind::PreScripts, "a.sql"), "a.sql", &StepResult::Succeeded);
        summary.record(
            &step(PhaseKind::PreScripts, "b.sql"),
            "b.sql",
            &StepResult::failed("boom"),
        );
        summary.record(
            &step(PhaseKind::PostScripts, "c.sql"),
            "c.sql",
            &StepResult::skipped("cancelled"),
        );

        let pre = summary.phase(PhaseKind::PreScripts);
        assert_eq!((pre.succeeded, pre.failed, pre.skipped), (1, 1, 0));
        assert_eq!(summary.phase(PhaseKind::PostScripts).skipped, 1);
        assert_eq!(summary.phase(PhaseKind::PackageDeployments).total(), 0);
        assert!(summary.has_failures());
        assert_eq!(summary.failures[0].reason, "boom");
        assert_eq!(summary.failures[0].database, "Sales");
    }

    #[test]
    fn test_display_lists_failures() {
        let mut summary = RunSummary::new();
        summary.record(
            &step(PhaseKind::PreScripts, "b.sql"),
            "pre/b.sql",
            &StepResult::failed("boom"),
        );
        let text = summary.to_string();
        assert!(text.contains("pre_scripts"));
        assert!(text.contains("[Sales] pre/b.sql: boom"));
    }
}

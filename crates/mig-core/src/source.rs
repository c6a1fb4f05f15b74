//! Lazy, single-pass production of a phase's steps in declared order.
//!
//! Directories are listed only when the source reaches them, and script text
//! is read only when its step is produced. Order inside a phase is: entry
//! order, then directory order within an entry, then file name order.

use crate::error::{CoreError, CoreResult};
use crate::names::{DatabaseName, StepId};
use crate::plan::{MigrationPlan, PhaseEntry, PhaseKind};
use crate::step::{PackageDeployStep, ScriptStep, Step};
use crate::target::TargetDatabase;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// What the source is currently draining
#[derive(Debug)]
enum Cursor {
    Scripts {
        connection: usize,
        target: TargetDatabase,
        directories: VecDeque<PathBuf>,
        files: VecDeque<PathBuf>,
    },
    Packages {
        connection: usize,
        server: PathBuf,
        files: VecDeque<PathBuf>,
    },
}

/// Produces the steps of one phase, then signals end of phase with `None`
#[derive(Debug)]
pub struct StepSource<'a> {
    plan: &'a MigrationPlan,
    phase: PhaseKind,
    next_entry: usize,
    cursor: Option<Cursor>,
    order: usize,
    /// When set, steps for other databases are passed over unread
    only: Option<TargetDatabase>,
}

impl<'a> StepSource<'a> {
    pub fn new(plan: &'a MigrationPlan, phase: PhaseKind) -> Self {
        Self {
            plan,
            phase,
            next_entry: 0,
            cursor: None,
            order: 0,
            only: None,
        }
    }

    /// Source producing only the steps that run against `target`.
    ///
    /// Order indexes stay those of the whole phase, so steps from several
    /// filtered sources interleave back into declared order.
    pub fn for_target(plan: &'a MigrationPlan, phase: PhaseKind, target: TargetDatabase) -> Self {
        Self {
            only: Some(target),
            ..Self::new(plan, phase)
        }
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    /// Next step of the phase, `Ok(None)` once the phase is exhausted.
    ///
    /// Fails with a configuration error when a declared directory or artifact
    /// has disappeared or cannot be read.
    pub fn next_step(&mut self) -> CoreResult<Option<Step>> {
        loop {
            if let Some(step) = self.take_from_cursor()? {
                return Ok(Some(step));
            }

            let entries = &self.plan.phase(self.phase).entries;
            let Some(entry) = entries.get(self.next_entry) else {
                return Ok(None);
            };
            self.next_entry += 1;

            self.cursor = Some(match entry {
                PhaseEntry::Scripts {
                    connection,
                    target,
                    directories,
                } => Cursor::Scripts {
                    connection: *connection,
                    target: target.clone(),
                    directories: directories.iter().cloned().collect(),
                    files: VecDeque::new(),
                },
                PhaseEntry::Packages {
                    connection,
                    server,
                    directory,
                } => Cursor::Packages {
                    connection: *connection,
                    server: server.clone(),
                    files: list_files(self.phase, directory, PACKAGE_EXTENSIONS)?,
                },
            });
        }
    }

    fn take_from_cursor(&mut self) -> CoreResult<Option<Step>> {
        loop {
            let phase = self.phase;
            let next = match self.cursor.as_mut() {
                None => return Ok(None),
                Some(Cursor::Scripts {
                    connection,
                    target,
                    directories,
                    files,
                }) => loop {
                    if let Some(path) = files.pop_front() {
                        break Some((*connection, target.clone(), path));
                    }
                    match directories.pop_front() {
                        Some(dir) => *files = list_files(phase, &dir, SCRIPT_EXTENSIONS)?,
                        None => break None,
                    }
                },
                Some(Cursor::Packages {
                    connection,
                    server,
                    files,
                }) => match files.pop_front() {
                    Some(path) => Some((
                        *connection,
                        TargetDatabase::new(server.clone(), database_from_package(&path)?),
                        path,
                    )),
                    None => None,
                },
            };

            let Some((connection, target, path)) = next else {
                self.cursor = None;
                return Ok(None);
            };

            let order = self.bump_order();
            if self.only.as_ref().is_some_and(|only| *only != target) {
                continue;
            }

            let id = self.step_id(connection, &target.database, &path)?;
            let step = match self.cursor {
                Some(Cursor::Scripts { .. }) => {
                    let sql = std::fs::read_to_string(&path).map_err(|e| {
                        CoreError::ArtifactUnreadable {
                            path: path.display().to_string(),
                            source: e,
                        }
                    })?;
                    Step::Script(ScriptStep {
                        id,
                        phase,
                        target,
                        artifact: path,
                        order,
                        sql,
                    })
                }
                _ => Step::PackageDeploy(PackageDeployStep {
                    id,
                    phase,
                    target,
                    artifact: path,
                    order,
                    policy: self.plan.policy.clone(),
                }),
            };
            return Ok(Some(step));
        }
    }

    fn bump_order(&mut self) -> usize {
        let order = self.order;
        self.order += 1;
        order
    }

    fn step_id(&self, connection: usize, database: &DatabaseName, artifact: &Path) -> CoreResult<StepId> {
        let raw = format!(
            "{}/{}/{}/{}",
            self.phase,
            connection,
            database,
            self.plan.relative_artifact(artifact)
        );
        StepId::try_new(raw).ok_or_else(|| CoreError::PlanInvalid {
            message: format!("blank step identity for {}", artifact.display()),
        })
    }
}

impl Iterator for StepSource<'_> {
    type Item = CoreResult<Step>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_step().transpose()
    }
}

/// Distinct databases a phase touches, in order of first appearance.
///
/// Package directories are listed to learn their databases; no artifact is
/// read.
pub fn phase_targets(plan: &MigrationPlan, phase: PhaseKind) -> CoreResult<Vec<TargetDatabase>> {
    let mut targets: Vec<TargetDatabase> = Vec::new();
    let mut push = |target: TargetDatabase| {
        if !targets.contains(&target) {
            targets.push(target);
        }
    };
    for entry in &plan.phase(phase).entries {
        match entry {
            PhaseEntry::Scripts { target, .. } => push(target.clone()),
            PhaseEntry::Packages {
                server, directory, ..
            } => {
                for path in list_files(phase, directory, PACKAGE_EXTENSIONS)? {
                    push(TargetDatabase::new(
                        server.clone(),
                        database_from_package(&path)?,
                    ));
                }
            }
        }
    }
    Ok(targets)
}

const SCRIPT_EXTENSIONS: &[&str] = &["sql"];
const PACKAGE_EXTENSIONS: &[&str] = &["yml", "yaml"];

/// List regular files in `dir` with one of `extensions`, sorted by file name
fn list_files(phase: PhaseKind, dir: &Path, extensions: &[&str]) -> CoreResult<VecDeque<PathBuf>> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::DirectoryNotFound {
                phase: phase.to_string(),
                path: dir.display().to_string(),
            }
        } else {
            CoreError::ArtifactUnreadable {
                path: dir.display().to_string(),
                source: e,
            }
        }
    })?;

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| CoreError::ArtifactUnreadable {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)));
        if matches {
            files.push(path);
        } else {
            log::debug!("Ignoring {} in {}", path.display(), phase);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files.into())
}

fn database_from_package(path: &Path) -> CoreResult<DatabaseName> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(DatabaseName::try_new)
        .filter(|name| name.is_valid_file_stem())
        .ok_or_else(|| CoreError::PlanInvalid {
            message: format!(
                "cannot derive a database name from package file '{}'",
                path.display()
            ),
        })
}

#[cfg(test)]
#[path = "source_test.rs"]
mod tests;

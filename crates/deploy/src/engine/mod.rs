//! Applies a plan: runs the steps that are new or changed since the last run,
//! wave by wave, and tears down the steps that left the plan.

mod kubectl;
mod process;
mod remote;
mod router;
mod state;

use std::{future::Future, path::PathBuf};

use anyhow::{Context, Result};
use futures::future::join_all;

use crate::plan::{Plan, Step, StepId, Teardown};

pub use kubectl::Kubectl;
pub use remote::RemoteShell;
pub use router::Router;
pub use state::{DeploymentState, StepRecord};

/// Whether a step runs for the first time or re-runs after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
}

/// Carries out the effect of individual steps.
pub trait StepExecutor: Send + Sync {
    /// Perform `step`'s action.
    fn apply(&self, step: &Step, operation: Operation) -> impl Future<Output = Result<()>> + Send;

    /// Undo a previously applied step.
    fn teardown(&self, teardown: &Teardown) -> impl Future<Output = Result<()>> + Send;
}

/// What happens, or happened, to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Change {
    Create,
    Update,
    Unchanged,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub changes: Vec<(StepId, Change)>,
}

impl ApplyReport {
    pub fn change(&self, id: &StepId) -> Option<Change> {
        self.changes
            .iter()
            .find(|(step, _)| step == id)
            .map(|(_, change)| *change)
    }

    pub fn ids(&self, change: Change) -> Vec<&StepId> {
        self.changes
            .iter()
            .filter(|(_, c)| *c == change)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn count(&self, change: Change) -> usize {
        self.changes.iter().filter(|(_, c)| *c == change).count()
    }
}

pub struct Engine<E> {
    executor: E,
    state_path: PathBuf,
}

impl<E: StepExecutor> Engine<E> {
    pub fn new(executor: E, state_path: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            state_path: state_path.into(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Compute what [`Engine::apply`] would do, without doing it.
    pub fn preview(&self, plan: &Plan) -> Result<ApplyReport> {
        if plan.is_empty() {
            tracing::warn!("Plan is empty, the deployment would be left untouched");
            return Ok(ApplyReport::default());
        }

        plan.validate()?;
        let state = DeploymentState::load_or_default(&self.state_path)?;

        let mut report = ApplyReport::default();
        for (id, _) in state.stale(plan) {
            report.changes.push((id, Change::Delete));
        }
        for wave in plan.waves()? {
            for step in wave {
                let fingerprint = step.fingerprint()?;
                let change = match state.get(&step.id) {
                    Some(record) if record.fingerprint == fingerprint => Change::Unchanged,
                    Some(_) => Change::Update,
                    None => Change::Create,
                };
                report.changes.push((step.id.clone(), change));
            }
        }

        Ok(report)
    }

    /// Apply `plan`.
    ///
    /// Steps recorded by a previous run but missing from the plan are torn down
    /// first, newest first. Then the plan runs wave by wave; the steps of a wave
    /// run concurrently. Unchanged steps are skipped. The first failing wave
    /// stops the run; steps that succeeded are recorded, so the next run picks
    /// up where this one stopped. Failed steps are not retried.
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyReport> {
        if plan.is_empty() {
            tracing::warn!("Plan is empty, leaving the deployment untouched");
            return Ok(ApplyReport::default());
        }

        plan.validate()?;
        let waves = plan.waves()?;
        let mut state = DeploymentState::load_or_default(&self.state_path)?;
        let mut report = ApplyReport::default();

        for (id, record) in state.stale(plan) {
            if let Some(teardown) = &record.teardown {
                tracing::info!(step = %id, kind = %record.kind, "Removing step no longer in the plan");
                self.executor
                    .teardown(teardown)
                    .await
                    .context(format!("Failed to tear down step {}", id))?;
            }
            state.remove(&id);
            state.save_to_file(&self.state_path)?;
            report.changes.push((id, Change::Delete));
        }

        let total = waves.len();
        for (index, wave) in waves.into_iter().enumerate() {
            let mut pending = Vec::new();
            for step in wave {
                let fingerprint = step.fingerprint()?;
                match state.get(&step.id) {
                    Some(record) if record.fingerprint == fingerprint => {
                        tracing::debug!(step = %step.id, "Step unchanged, skipping");
                        report.changes.push((step.id.clone(), Change::Unchanged));
                    }
                    Some(_) => pending.push((step, Operation::Update, fingerprint)),
                    None => pending.push((step, Operation::Create, fingerprint)),
                }
            }

            if pending.is_empty() {
                continue;
            }

            tracing::info!(wave = index + 1, waves = total, steps = pending.len(), "Applying wave");

            let results = join_all(pending.iter().map(|(step, operation, _)| async move {
                tracing::info!(step = %step.id, kind = %step.kind, %operation, "Applying step");
                self.executor
                    .apply(step, *operation)
                    .await
                    .context(format!("Failed to {} step {}", operation, step.id))
            }))
            .await;

            let mut first_error = None;
            for ((step, operation, fingerprint), result) in pending.into_iter().zip(results) {
                match result {
                    Ok(()) => {
                        state.record(step, fingerprint);
                        let change = match operation {
                            Operation::Create => Change::Create,
                            Operation::Update => Change::Update,
                        };
                        report.changes.push((step.id.clone(), change));
                    }
                    Err(err) => {
                        tracing::error!(step = %step.id, error = %format!("{err:#}"), "Step failed");
                        first_error.get_or_insert(err);
                    }
                }
            }

            state.save_to_file(&self.state_path)?;

            if let Some(err) = first_error {
                return Err(err);
            }
        }

        Ok(report)
    }

    /// The steps [`Engine::destroy`] would tear down, in the order it would, without
    /// running anything.
    pub fn preview_destroy(&self) -> Result<ApplyReport> {
        let state = DeploymentState::load_or_default(&self.state_path)?;

        Ok(ApplyReport {
            changes: state
                .teardown_order()
                .into_iter()
                .map(|(id, _)| (id, Change::Delete))
                .collect(),
        })
    }

    /// Tear down every recorded step, newest first. Returns the number of steps removed.
    pub async fn destroy(&self) -> Result<usize> {
        let mut state = DeploymentState::load_or_default(&self.state_path)?;
        let entries = state.teardown_order();

        for (id, record) in &entries {
            if let Some(teardown) = &record.teardown {
                tracing::info!(step = %id, kind = %record.kind, "Tearing down step");
                self.executor
                    .teardown(teardown)
                    .await
                    .context(format!("Failed to tear down step {}", id))?;
            }
            state.remove(id);
            state.save_to_file(&self.state_path)?;
        }

        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use tempdir::TempDir;

    use super::*;
    use crate::plan::{Action, RemoteCommand, Scope, StepKind};

    /// Records calls instead of touching any host.
    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<(StepId, Operation)>>,
        torn_down: Mutex<Vec<Teardown>>,
        failing: HashSet<StepId>,
    }

    impl StepExecutor for Recorder {
        async fn apply(&self, step: &Step, operation: Operation) -> Result<()> {
            if self.failing.contains(&step.id) {
                anyhow::bail!("boom");
            }
            self.applied
                .lock()
                .unwrap()
                .push((step.id.clone(), operation));
            Ok(())
        }

        async fn teardown(&self, teardown: &Teardown) -> Result<()> {
            self.torn_down.lock().unwrap().push(teardown.clone());
            Ok(())
        }
    }

    impl Recorder {
        fn applied(&self) -> Vec<(StepId, Operation)> {
            std::mem::take(&mut *self.applied.lock().unwrap())
        }
    }

    fn plan(build_command: &str, with_extra: bool) -> Plan {
        let scope = Scope::root("n");
        let mut plan = Plan::new();
        let dir = plan
            .add(
                scope.step("dir"),
                StepKind::CreateDataDir,
                Action::command(RemoteCommand::new("mkdir -p /data").on_delete("rmdir /data")),
                &[],
            )
            .unwrap();
        let clone = plan
            .add(
                scope.step("clone"),
                StepKind::CloneOrUpdateRepo,
                Action::command(
                    RemoteCommand::new("git clone repo")
                        .on_update("git pull")
                        .on_delete("rm -rf repo"),
                ),
                &[dir.clone()],
            )
            .unwrap();
        plan.add(
            scope.step("build"),
            StepKind::Build,
            Action::command(RemoteCommand::new(build_command)),
            &[clone],
        )
        .unwrap();
        if with_extra {
            plan.add(
                scope.step("extra"),
                StepKind::InstallStartScript,
                Action::copy("scripts/start.sh", "/data/scripts/start.sh"),
                &[dir],
            )
            .unwrap();
        }
        plan
    }

    fn engine(dir: &TempDir, recorder: Recorder) -> Engine<Recorder> {
        Engine::new(recorder, dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn test_apply_respects_dependency_order() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let engine = engine(&dir, Recorder::default());

        let report = engine.apply(&plan("make", true)).await.unwrap();
        assert_eq!(report.count(Change::Create), 4);

        let applied: Vec<String> = engine
            .executor()
            .applied()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(applied[0], "n/dir");
        let clone = applied.iter().position(|id| id == "n/clone").unwrap();
        let build = applied.iter().position(|id| id == "n/build").unwrap();
        assert!(clone < build);
    }

    #[tokio::test]
    async fn test_reapply_skips_unchanged_and_updates_changed() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let engine = engine(&dir, Recorder::default());

        engine.apply(&plan("make", false)).await.unwrap();
        engine.executor().applied();

        let report = engine.apply(&plan("make", false)).await.unwrap();
        assert_eq!(report.count(Change::Unchanged), 3);
        assert!(engine.executor().applied().is_empty());

        let report = engine.apply(&plan("make release", false)).await.unwrap();
        assert_eq!(report.ids(Change::Update), vec![&StepId::new("n/build")]);
        assert_eq!(
            engine.executor().applied(),
            vec![(StepId::new("n/build"), Operation::Update)]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_and_keeps_progress() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let recorder = Recorder {
            failing: HashSet::from([StepId::new("n/clone")]),
            ..Default::default()
        };
        let failing = engine(&dir, recorder);

        let err = failing.apply(&plan("make", true)).await.unwrap_err();
        assert!(format!("{err:#}").contains("n/clone"));

        // The clone's sibling in the same wave still completed; the build never ran.
        let applied: Vec<StepId> = failing
            .executor()
            .applied()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert!(applied.contains(&StepId::new("n/extra")));
        assert!(!applied.contains(&StepId::new("n/build")));

        let healthy = engine(&dir, Recorder::default());
        let preview = healthy.preview(&plan("make", true)).unwrap();
        assert_eq!(preview.change(&StepId::new("n/dir")), Some(Change::Unchanged));
        assert_eq!(preview.change(&StepId::new("n/clone")), Some(Change::Create));
        assert_eq!(preview.change(&StepId::new("n/build")), Some(Change::Create));
    }

    #[tokio::test]
    async fn test_removed_steps_are_torn_down() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let engine = engine(&dir, Recorder::default());

        engine.apply(&plan("make", true)).await.unwrap();

        let report = engine.apply(&plan("make", false)).await.unwrap();
        assert_eq!(report.ids(Change::Delete), vec![&StepId::new("n/extra")]);
        assert_eq!(
            *engine.executor().torn_down.lock().unwrap(),
            vec![Teardown::Command("rm -f /data/scripts/start.sh".to_string())]
        );
    }

    #[tokio::test]
    async fn test_destroy_runs_in_reverse_order() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let engine = engine(&dir, Recorder::default());

        engine.apply(&plan("make", false)).await.unwrap();
        let removed = engine.destroy().await.unwrap();

        // The build step has no teardown, but it is still dropped from the state.
        assert_eq!(removed, 3);
        assert_eq!(
            *engine.executor().torn_down.lock().unwrap(),
            vec![
                Teardown::Command("rm -rf repo".to_string()),
                Teardown::Command("rmdir /data".to_string()),
            ]
        );
        assert!(
            DeploymentState::load_from_file(&dir.path().join("state.json"))
                .unwrap()
                .steps
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_empty_plan_leaves_state_alone() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let engine = engine(&dir, Recorder::default());

        engine.apply(&plan("make", false)).await.unwrap();
        let preview = engine.preview(&Plan::new()).unwrap();
        let report = engine.apply(&Plan::new()).await.unwrap();

        assert_eq!(preview, report);
        assert!(report.changes.is_empty());
        assert!(engine.executor().torn_down.lock().unwrap().is_empty());
        assert_eq!(engine.preview(&plan("make", false)).unwrap().count(Change::Unchanged), 3);
    }

    #[tokio::test]
    async fn test_preview_destroy_runs_nothing() {
        let dir = TempDir::new("ethnode-engine").unwrap();
        let engine = engine(&dir, Recorder::default());

        engine.apply(&plan("make", false)).await.unwrap();
        let state_before = std::fs::read_to_string(dir.path().join("state.json")).unwrap();

        let preview = engine.preview_destroy().unwrap();

        let ids: Vec<String> = preview.ids(Change::Delete).iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["n/build", "n/clone", "n/dir"]);
        assert!(engine.executor().torn_down.lock().unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("state.json")).unwrap(),
            state_before
        );
    }
}

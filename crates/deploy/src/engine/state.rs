//! Persistent record of the steps applied by previous runs.
//!
//! The state file stores one fingerprint per step so that the next run can tell
//! unchanged steps from changed ones, and the teardown of every applied step so
//! that steps removed from the configuration can be undone. It never stores the
//! actions themselves, which may embed secrets.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    fs::FsHandler,
    plan::{Plan, Step, StepId, StepKind, Teardown},
};

/// What was applied for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub kind: StepKind,
    /// SHA-256 of the step's action when it was applied.
    pub fingerprint: String,
    /// Position in the overall apply order. Teardown runs in reverse order.
    pub order: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<Teardown>,
    /// RFC 3339 timestamp of the last apply.
    pub applied_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Version of ethnode that last wrote this state.
    pub ethnode_version: String,
    #[serde(default)]
    pub next_order: u64,
    #[serde(default)]
    pub steps: BTreeMap<StepId, StepRecord>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            ethnode_version: env!("CARGO_PKG_VERSION").to_string(),
            next_order: 0,
            steps: BTreeMap::new(),
        }
    }
}

impl DeploymentState {
    /// Save the state to a file as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        FsHandler::create_parent_dir(path)?;

        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment state")?;

        std::fs::write(path, json).context(format!(
            "Failed to write deployment state to {}",
            path.display()
        ))?;

        Ok(())
    }

    /// Load the state from a file.
    ///
    /// Returns an error if the file doesn't exist, is malformed, or cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Deployment state file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path).context(format!(
            "Failed to read deployment state from {}",
            path.display()
        ))?;

        serde_json::from_str(&content).context(format!(
            "Failed to parse deployment state {}",
            path.display()
        ))
    }

    /// Load the state, or start from an empty one if this is the first run.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "No deployment state found, starting fresh");
            Ok(Self::default())
        }
    }

    pub fn get(&self, id: &StepId) -> Option<&StepRecord> {
        self.steps.get(id)
    }

    /// Record a successful apply of `step`.
    ///
    /// An updated step keeps its original position in the teardown order.
    pub fn record(&mut self, step: &Step, fingerprint: String) {
        let order = match self.steps.get(&step.id) {
            Some(existing) => existing.order,
            None => {
                self.next_order += 1;
                self.next_order - 1
            }
        };
        self.ethnode_version = env!("CARGO_PKG_VERSION").to_string();

        self.steps.insert(
            step.id.clone(),
            StepRecord {
                kind: step.kind,
                fingerprint,
                order,
                teardown: step.action.teardown(),
                applied_at: chrono::Utc::now().to_rfc3339(),
            },
        );
    }

    pub fn remove(&mut self, id: &StepId) -> Option<StepRecord> {
        self.steps.remove(id)
    }

    /// Recorded steps absent from `plan`, most recently applied first.
    pub fn stale(&self, plan: &Plan) -> Vec<(StepId, StepRecord)> {
        let mut stale: Vec<_> = self
            .steps
            .iter()
            .filter(|(id, _)| !plan.contains(id))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        stale.sort_by(|a, b| b.1.order.cmp(&a.1.order));
        stale
    }

    /// All recorded steps, most recently applied first.
    pub fn teardown_order(&self) -> Vec<(StepId, StepRecord)> {
        let mut all: Vec<_> = self
            .steps
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        all.sort_by(|a, b| b.1.order.cmp(&a.1.order));
        all
    }
}

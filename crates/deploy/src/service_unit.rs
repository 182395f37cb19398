//! Installs a systemd unit on the remote host, then enables and starts it.

use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::{
    clients::Network,
    plan::{Action, Plan, RemoteCommand, Scope, StepId, StepKind},
};

const SYSTEMD_DIR: &str = "/etc/systemd/system";

/// A `{service_type}.{network}` systemd unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub service_type: String,
    pub network: Network,
}

impl ServiceUnit {
    pub fn new(service_type: impl Into<String>, network: Network) -> Self {
        Self {
            service_type: service_type.into(),
            network,
        }
    }

    /// Unit name, without the `.service` suffix.
    pub fn name(&self) -> String {
        format!("{}.{}", self.service_type, self.network)
    }

    pub fn file_name(&self) -> String {
        format!("{}.service", self.name())
    }

    /// The unit file shipped with the deployment assets.
    pub fn local_path(&self, assets_dir: &Path) -> PathBuf {
        assets_dir.join("config").join(self.file_name())
    }

    pub fn remote_path(&self) -> String {
        format!("{}/{}", SYSTEMD_DIR, self.file_name())
    }

    /// Add the copy, enable and start steps to `plan`, chained in that order.
    ///
    /// Returns the ids of the three steps; the last one is the start step.
    pub fn plan(
        &self,
        scope: &Scope,
        assets_dir: &Path,
        after: &[StepId],
        plan: &mut Plan,
    ) -> Result<Vec<StepId>> {
        let name = self.name();

        let copy = plan.add(
            scope.step("copyUnit"),
            StepKind::CopyServiceUnit,
            Action::copy_asset(self.local_path(assets_dir), self.remote_path())?,
            after,
        )?;

        let enable = plan.add(
            scope.step("enable"),
            StepKind::EnableService,
            Action::command(
                RemoteCommand::new(format!("systemctl daemon-reload && systemctl enable {}", name))
                    .on_delete(format!("systemctl disable {}", name)),
            ),
            &[copy.clone()],
        )?;

        // The revision changes with the unit file or any file copied before it,
        // which turns the start step into a restart.
        let mut restart = format!("systemctl daemon-reload && systemctl restart {}", name);
        if let Some(revision) = revision(plan, &copy) {
            restart.push_str(&format!(" # revision {}", revision));
        }

        let start = plan.add(
            scope.step("start"),
            StepKind::StartService,
            Action::command(
                RemoteCommand::new(format!("systemctl start {}", name))
                    .on_update(restart)
                    .on_delete(format!("systemctl stop {}", name)),
            ),
            &[enable.clone()],
        )?;

        Ok(vec![copy, enable, start])
    }
}

/// Short digest over the content of `copy` and of every file copied by a step
/// it depends on.
fn revision(plan: &Plan, copy: &StepId) -> Option<String> {
    let digests: Vec<&str> = plan
        .steps()
        .iter()
        .filter(|step| &step.id == copy || plan.depends_on_transitively(copy, &step.id))
        .filter_map(|step| step.action.content_digest())
        .collect();
    if digests.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    for digest in digests {
        hasher.update(digest.as_bytes());
    }
    Some(hex::encode(&hasher.finalize()[..6]))
}

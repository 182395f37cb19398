//! The production executor: shell steps go over SSH, objects go to kubectl.

use anyhow::{Context, Result};

use super::{Operation, StepExecutor, kubectl::Kubectl, remote::RemoteShell};
use crate::plan::{Action, Step, Teardown};

#[derive(Default)]
pub struct Router {
    remote: Option<RemoteShell>,
    kubectl: Option<Kubectl>,
}

impl Router {
    pub fn new(remote: Option<RemoteShell>, kubectl: Option<Kubectl>) -> Self {
        Self { remote, kubectl }
    }

    fn remote(&self) -> Result<&RemoteShell> {
        self.remote
            .as_ref()
            .context("Step runs on the remote host but no SSH connection is configured")
    }

    fn kubectl(&self) -> Result<&Kubectl> {
        self.kubectl
            .as_ref()
            .context("Step declares a Kubernetes object but Kubernetes is not configured")
    }
}

impl StepExecutor for Router {
    async fn apply(&self, step: &Step, operation: Operation) -> Result<()> {
        match &step.action {
            Action::Command(command) => {
                let script = match operation {
                    Operation::Create => command.create.as_str(),
                    Operation::Update => command.for_update(),
                };
                self.remote()?.run(script).await?;
            }
            Action::CopyFile(copy) => {
                self.remote()?.copy(&copy.local, &copy.remote).await?;
            }
            Action::Apply(object) => {
                self.kubectl()?.apply(object).await?;
            }
        }
        Ok(())
    }

    async fn teardown(&self, teardown: &Teardown) -> Result<()> {
        match teardown {
            Teardown::Command(command) => {
                self.remote()?.run(command).await?;
            }
            Teardown::DeleteObject {
                kind,
                name,
                namespace,
            } => {
                self.kubectl()?
                    .delete(kind, name, namespace.as_deref())
                    .await?;
            }
        }
        Ok(())
    }
}

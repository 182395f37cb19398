//! Rollup clients. Only the start script is provisioned.

use anyhow::{Context, Result};

use super::SCRIPTS_DIR;
use crate::{
    catalog::{Recipe, RecipeContext, RecipeHandle},
    clients::{DeploymentType, RollupClient},
    plan::{Action, Plan, RemoteCommand, StepKind},
};

#[derive(Debug, Clone, Copy)]
pub struct RollupRecipe {
    client: RollupClient,
}

impl RollupRecipe {
    pub fn new(client: RollupClient) -> Self {
        Self { client }
    }

    fn script_name(&self, ctx: &RecipeContext<'_>) -> String {
        format!("start_{}_{}.sh", self.client, ctx.network)
    }
}

impl Recipe for RollupRecipe {
    fn name(&self) -> &'static str {
        self.client.into()
    }

    fn plan(&self, ctx: &RecipeContext<'_>, plan: &mut Plan) -> Result<RecipeHandle> {
        if ctx.deployment_type != DeploymentType::Source {
            tracing::warn!(
                client = self.name(),
                deployment_type = %ctx.deployment_type,
                "Rollup clients are only provisioned from source, skipping"
            );
            return Ok(RecipeHandle::empty(self.name()));
        }

        ctx.connection.with_context(|| {
            format!("Deploying {} requires an SSH connection to the target host", self.name())
        })?;

        let script = self.script_name(ctx);
        let remote = format!("{}/{}", SCRIPTS_DIR, script);

        let copy = plan.add(
            ctx.scope.step("copyStartScript"),
            StepKind::InstallStartScript,
            Action::copy_asset(ctx.assets_dir.join("scripts").join(&script), remote.clone())?,
            &ctx.after,
        )?;
        let executable = plan.add(
            ctx.scope.step("makeStartScriptExecutable"),
            StepKind::MakeExecutable,
            Action::command(RemoteCommand::new(format!("chmod +x {}", remote))),
            &[copy.clone()],
        )?;

        Ok(RecipeHandle {
            name: self.name().to_string(),
            steps: vec![copy, executable],
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        catalog::JwtBinding, clients::Network, connection::Connection, jwt::JwtSecret,
        plan::Scope,
    };

    #[test]
    fn test_alphanet_copies_start_script() {
        let network = Network::Custom("odyssey".to_string());
        let connection = Connection::new("host");
        let jwt = JwtSecret::generate();
        let ctx = RecipeContext::new(
            Scope::root("rollup"),
            "alphanet",
            &network,
            DeploymentType::Source,
            Path::new("assets"),
            JwtBinding::Owned(&jwt),
        )
        .with_connection(&connection);

        let mut plan = Plan::new();
        let handle = RollupRecipe::new(RollupClient::Alphanet)
            .plan(&ctx, &mut plan)
            .unwrap();

        assert_eq!(handle.steps.len(), 2);
        assert_eq!(
            plan.get(&handle.steps[0]).unwrap().action,
            Action::copy(
                Path::new("assets/scripts/start_alphanet_odyssey.sh"),
                "/data/scripts/start_alphanet_odyssey.sh"
            )
        );
    }

    #[test]
    fn test_alphanet_on_kubernetes_is_skipped() {
        let network = Network::Mainnet;
        let jwt = JwtSecret::generate();
        let ctx = RecipeContext::new(
            Scope::root("rollup"),
            "alphanet",
            &network,
            DeploymentType::Kubernetes,
            Path::new("assets"),
            JwtBinding::Owned(&jwt),
        );

        let mut plan = Plan::new();
        let handle = RollupRecipe::new(RollupClient::Alphanet)
            .plan(&ctx, &mut plan)
            .unwrap();
        assert!(handle.is_empty());
    }
}

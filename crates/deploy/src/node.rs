//! Composes an execution client and a consensus client into one node.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};

use crate::{
    catalog::{Catalog, JwtBinding, Recipe, RecipeContext, RecipeHandle, Repository},
    clients::{Client, ConsensusClient, DeploymentType, ExecutionClient, Network, RollupClient},
    connection::Connection,
    jwt::JwtSecret,
    k8s::{ObjectMeta, Secret},
    plan::{Action, Plan, RemoteCommand, Scope, StepId, StepKind},
    recipes::{KubernetesConfig, RollupRecipe, SCRIPTS_DIR, SHARED_GROUP, kubernetes::JWT_FILE},
};

/// Remote directory shared by the clients of a source node.
pub const SHARED_DIR: &str = "/data/shared";

/// Everything needed to describe one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub network: Network,
    pub deployment_type: DeploymentType,
    pub execution: ExecutionClient,
    pub consensus: ConsensusClient,
    pub rollup: Option<RollupClient>,
}

/// The steps a node contributed to the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub prerequisites: Vec<StepId>,
    pub execution: RecipeHandle,
    pub consensus: RecipeHandle,
    pub rollup: Option<RecipeHandle>,
}

impl Node {
    /// Every step of the node, prerequisites first.
    pub fn steps(&self) -> impl Iterator<Item = &StepId> {
        self.prerequisites
            .iter()
            .chain(&self.execution.steps)
            .chain(&self.consensus.steps)
            .chain(self.rollup.iter().flat_map(|rollup| &rollup.steps))
    }
}

/// Shared inputs of every node of a deployment.
#[derive(Debug, Clone)]
pub struct NodeComposer<'a> {
    pub assets_dir: &'a Path,
    pub jwt: &'a JwtSecret,
    pub connection: Option<&'a Connection>,
    pub kubernetes: Option<&'a KubernetesConfig>,
    pub repositories: Option<&'a BTreeMap<String, Repository>>,
}

impl<'a> NodeComposer<'a> {
    pub fn new(assets_dir: &'a Path, jwt: &'a JwtSecret) -> Self {
        Self {
            assets_dir,
            jwt,
            connection: None,
            kubernetes: None,
            repositories: None,
        }
    }

    pub fn with_connection(mut self, connection: Option<&'a Connection>) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_kubernetes(mut self, kubernetes: &'a KubernetesConfig) -> Self {
        self.kubernetes = Some(kubernetes);
        self
    }

    pub fn with_repositories(mut self, repositories: &'a BTreeMap<String, Repository>) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Add the steps of one node to `plan`.
    ///
    /// Both clients depend on the node's shared prerequisites, so the JWT secret
    /// exists before either of them starts.
    pub fn compose(&self, spec: &NodeSpec, plan: &mut Plan) -> Result<Node> {
        let scope = Scope::root(&spec.name);

        tracing::info!(
            node = %spec.name,
            network = %spec.network,
            deployment_type = %spec.deployment_type,
            execution = %spec.execution,
            consensus = %spec.consensus,
            "Composing node"
        );

        let (prerequisites, jwt) = match spec.deployment_type {
            DeploymentType::Source => {
                self.connection.with_context(|| {
                    format!(
                        "Node {} is deployed from source and needs an SSH connection",
                        spec.name
                    )
                })?;
                let steps = self.shared_directories(&scope.child("shared"), plan)?;
                (steps, JwtBinding::Owned(self.jwt))
            }
            DeploymentType::Kubernetes => {
                let secret_name = format!("{}-execution-jwt", spec.name);
                let namespace = self.kubernetes.and_then(|k| k.namespace.as_deref());
                let step = plan.add(
                    scope.child("shared").step("jwtSecret"),
                    StepKind::DeclareSecret,
                    Action::apply(Secret::opaque(
                        ObjectMeta::new(secret_name.clone(), namespace, &spec.name),
                        JWT_FILE,
                        self.jwt.expose().as_bytes(),
                    )),
                    &[],
                )?;
                (
                    vec![step.clone()],
                    JwtBinding::Shared { secret_name, step },
                )
            }
            DeploymentType::Binary | DeploymentType::Docker => {
                (Vec::new(), JwtBinding::Owned(self.jwt))
            }
        };

        let execution_ctx = self.context(spec, &scope, spec.execution.into(), &jwt, &prerequisites);
        let execution = Catalog::recipe(spec.execution.into())
            .plan(&execution_ctx, plan)
            .context(format!("Failed to plan execution client of node {}", spec.name))?;

        let consensus_ctx = self.context(spec, &scope, spec.consensus.into(), &jwt, &prerequisites);
        let consensus = Catalog::recipe(spec.consensus.into())
            .plan(&consensus_ctx, plan)
            .context(format!("Failed to plan consensus client of node {}", spec.name))?;

        let rollup = spec
            .rollup
            .map(|client| {
                let recipe = RollupRecipe::new(client);
                let mut ctx = RecipeContext::new(
                    scope.child("rollup").child(recipe.name()),
                    format!("{}-{}", spec.name, recipe.name()),
                    &spec.network,
                    spec.deployment_type,
                    self.assets_dir,
                    jwt.clone(),
                )
                .after(prerequisites.iter().cloned());
                ctx.connection = self.connection;
                recipe.plan(&ctx, plan)
            })
            .transpose()?;

        Ok(Node {
            name: spec.name.clone(),
            prerequisites,
            execution,
            consensus,
            rollup,
        })
    }

    /// Compose `replicas` nodes from one spec. Node `i` is named `{name}-{i}` when
    /// there is more than one.
    pub fn factory(&self, spec: &NodeSpec, replicas: usize, plan: &mut Plan) -> Result<Vec<Node>> {
        if replicas == 0 {
            anyhow::bail!("At least one node replica is required");
        }

        // Source nodes share the host's /data layout and systemd unit names.
        if replicas > 1 && spec.deployment_type == DeploymentType::Source {
            anyhow::bail!(
                "Cannot deploy {} replicas from source: replication requires the kubernetes deployment type",
                replicas
            );
        }

        (0..replicas)
            .map(|index| {
                let mut replica = spec.clone();
                if replicas > 1 {
                    replica.name = format!("{}-{}", spec.name, index);
                }
                self.compose(&replica, plan)
            })
            .collect()
    }

    fn context<'b>(
        &self,
        spec: &'b NodeSpec,
        scope: &Scope,
        client: Client,
        jwt: &JwtBinding<'b>,
        prerequisites: &[StepId],
    ) -> RecipeContext<'b>
    where
        'a: 'b,
    {
        let mut ctx = RecipeContext::new(
            scope.child(&client.role().to_string()).child(client.name()),
            format!("{}-{}", spec.name, client.name()),
            &spec.network,
            spec.deployment_type,
            self.assets_dir,
            jwt.clone(),
        )
        .after(prerequisites.iter().cloned())
        .with_repository(self.repositories.and_then(|r| r.get(client.name())));

        ctx.connection = self.connection;
        ctx.kubernetes = self.kubernetes;
        ctx
    }

    fn shared_directories(&self, scope: &Scope, plan: &mut Plan) -> Result<Vec<StepId>> {
        let mkdir = |plan: &mut Plan, name: &str, dir: &str| {
            plan.add(
                scope.step(name),
                StepKind::CreateDirectory,
                Action::command(RemoteCommand::new(format!("mkdir -p {}", dir))),
                &[],
            )
        };

        let shared = mkdir(plan, "createSharedDir", SHARED_DIR)?;
        let bin = mkdir(plan, "createBinDir", "/data/bin")?;
        let scripts = mkdir(plan, "createScriptsDir", SCRIPTS_DIR)?;
        let repos = mkdir(plan, "createReposDir", "/data/repos")?;

        let jwt_path = format!("{}/jwt.hex", SHARED_DIR);
        let jwt = plan.add(
            scope.step("writeJwtSecret"),
            StepKind::WriteJwtSecret,
            Action::command(
                RemoteCommand::new(format!(
                    "echo {} > {jwt_path} && chmod 640 {jwt_path}",
                    self.jwt.expose()
                ))
                .on_delete(format!("rm -f {}", jwt_path))
                .sensitive(),
            ),
            &[shared.clone()],
        )?;

        let permissions = plan.add(
            scope.step("setGroupPermissions"),
            StepKind::SetGroupPermissions,
            Action::command(RemoteCommand::new(format!(
                "(getent group {group} >/dev/null || groupadd --system {group}) && chown -R root:{group} {SHARED_DIR} && chmod 750 {SHARED_DIR}",
                group = SHARED_GROUP
            ))),
            &[jwt.clone()],
        )?;

        Ok(vec![shared, bin, scripts, repos, jwt, permissions])
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::k8s::Object;

    fn spec(deployment_type: DeploymentType) -> NodeSpec {
        NodeSpec {
            name: "holesky".to_string(),
            network: Network::Holesky,
            deployment_type,
            execution: ExecutionClient::Reth,
            consensus: ConsensusClient::Lighthouse,
            rollup: None,
        }
    }

    fn assets() -> TempDir {
        let dir = TempDir::new("ethnode-node").unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        for client in ["reth", "lighthouse"] {
            std::fs::write(dir.path().join("config").join(format!("{client}.toml")), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_compose_source_node() {
        let jwt = JwtSecret::generate();
        let connection = Connection::new("10.0.0.2");
        let composer = NodeComposer::new(Path::new("assets"), &jwt).with_connection(Some(&connection));

        let mut plan = Plan::new();
        let node = composer.compose(&spec(DeploymentType::Source), &mut plan).unwrap();
        plan.validate().unwrap();

        let write_jwt = StepId::new("holesky/shared/writeJwtSecret");
        assert!(node.prerequisites.contains(&write_jwt));
        assert!(plan.get(&write_jwt).unwrap().action.is_sensitive());

        for handle in [&node.execution, &node.consensus] {
            let start = handle
                .steps
                .iter()
                .find(|id| plan.get(id).unwrap().kind == StepKind::StartService)
                .unwrap();
            assert!(plan.depends_on_transitively(start, &write_jwt));
        }

        assert_eq!(node.execution.steps[0], StepId::new("holesky/execution/reth/createDataDir"));
        assert_eq!(node.steps().count(), plan.len());
    }

    #[test]
    fn test_compose_source_requires_connection() {
        let jwt = JwtSecret::generate();
        let composer = NodeComposer::new(Path::new("assets"), &jwt);

        assert!(composer.compose(&spec(DeploymentType::Source), &mut Plan::new()).is_err());
    }

    #[test]
    fn test_compose_kubernetes_shares_one_secret() {
        let assets = assets();
        let jwt = JwtSecret::generate();
        let composer = NodeComposer::new(assets.path(), &jwt);

        let mut plan = Plan::new();
        composer.compose(&spec(DeploymentType::Kubernetes), &mut plan).unwrap();
        plan.validate().unwrap();

        let secrets: Vec<&str> = plan
            .objects()
            .filter(|(_, o)| o.kind() == "Secret")
            .map(|(_, o)| o.name())
            .collect();
        assert_eq!(secrets, vec!["holesky-execution-jwt"]);

        let sets: Vec<&Object> = plan
            .objects()
            .filter(|(_, o)| o.kind() == "StatefulSet")
            .map(|(_, o)| o)
            .collect();
        assert_eq!(sets.len(), 2);
        for set in sets {
            let Object::StatefulSet(set) = set else { unreachable!() };
            let volumes = serde_json::to_value(&set.spec.template.spec.volumes).unwrap();
            assert!(volumes.to_string().contains("holesky-execution-jwt"));
        }
    }

    #[test]
    fn test_factory_names_replicas_by_index() {
        let assets = assets();
        let jwt = JwtSecret::generate();
        let composer = NodeComposer::new(assets.path(), &jwt);

        let mut plan = Plan::new();
        let nodes = composer
            .factory(&spec(DeploymentType::Kubernetes), 3, &mut plan)
            .unwrap();

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["holesky-0", "holesky-1", "holesky-2"]);
        plan.validate().unwrap();
        assert_eq!(
            plan.objects().filter(|(_, o)| o.kind() == "StatefulSet").count(),
            6
        );
    }

    #[test]
    fn test_factory_rejects_replicated_source_nodes() {
        let jwt = JwtSecret::generate();
        let connection = Connection::new("10.0.0.2");
        let composer = NodeComposer::new(Path::new("assets"), &jwt).with_connection(Some(&connection));

        assert!(composer.factory(&spec(DeploymentType::Source), 2, &mut Plan::new()).is_err());
        assert!(composer.factory(&spec(DeploymentType::Source), 0, &mut Plan::new()).is_err());
        assert_eq!(
            composer
                .factory(&spec(DeploymentType::Source), 1, &mut Plan::new())
                .unwrap()[0]
                .name,
            "holesky"
        );
    }

    #[test]
    fn test_unsupported_deployment_type_plans_nothing() {
        let jwt = JwtSecret::generate();
        let composer = NodeComposer::new(Path::new("assets"), &jwt);

        let mut plan = Plan::new();
        let node = composer.compose(&spec(DeploymentType::Docker), &mut plan).unwrap();
        assert!(node.execution.is_empty());
        assert!(node.consensus.is_empty());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_rollup_is_composed() {
        let jwt = JwtSecret::generate();
        let connection = Connection::new("10.0.0.2");
        let composer = NodeComposer::new(Path::new("assets"), &jwt).with_connection(Some(&connection));
        let mut spec = spec(DeploymentType::Source);
        spec.rollup = Some(RollupClient::Alphanet);

        let mut plan = Plan::new();
        let node = composer.compose(&spec, &mut plan).unwrap();

        let rollup = node.rollup.unwrap();
        assert_eq!(rollup.steps[0], StepId::new("holesky/rollup/alphanet/copyStartScript"));
    }
}

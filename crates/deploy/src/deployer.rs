use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::Repository,
    clients::{Client, ConsensusClient, DeploymentType, ExecutionClient, Network, RollupClient},
    connection::Connection,
    engine::{ApplyReport, Engine, Kubectl, RemoteShell, Router},
    jwt::JwtSecret,
    node::{Node, NodeComposer, NodeSpec},
    plan::Plan,
    recipes::KubernetesConfig,
};

/// The default name for the ethnode configuration file.
pub const NODES_CONFIG_FILENAME: &str = "Nodes.toml";

/// Prefix of environment variables overriding configuration values.
/// Nested keys are separated by `__`, e.g. `ETHNODE_CONNECTION__HOST`.
pub const ENV_PREFIX: &str = "ETHNODE_";

/// File holding the generated JWT secret, next to the state file.
pub const JWT_SECRET_FILENAME: &str = "jwt.hex";

/// A client choice, as written in the `[execution]`, `[consensus]` and `[rollup]` tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSelection<C> {
    pub client: C,
}

/// Everything needed to deploy one or more nodes.
///
/// Assembled once at the entry point, from `Nodes.toml` merged with the
/// environment, and passed by reference to every recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployer {
    /// Name of the deployment, used as the node name and object name prefix.
    pub name: String,
    pub network: Network,
    #[serde(default)]
    pub deployment_type: DeploymentType,
    /// Number of identical nodes.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Engine API secret. Generated and kept next to the state file when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<JwtSecret>,
    /// Local directory holding `scripts/` and `config/`.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    pub execution: ClientSelection<ExecutionClient>,
    pub consensus: ClientSelection<ConsensusClient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollup: Option<ClientSelection<RollupClient>>,
    /// Source repositories overriding the built-in ones, keyed by client name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repositories: BTreeMap<String, Repository>,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
}

fn default_replicas() -> usize {
    1
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Deployer {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployer config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Nodes.toml` if `path`
    /// is a directory, with `ETHNODE_*` environment variables layered on top.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(NODES_CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let deployer: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load config from {}", config_path.display()))?;

        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(deployer)
    }

    /// Check the configuration for problems that planning would only hit halfway.
    pub fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            anyhow::bail!("replicas must be at least 1");
        }

        if self.deployment_type == DeploymentType::Source {
            if self.connection.is_none() {
                anyhow::bail!("The source deployment type requires a [connection] section");
            }
            if self.replicas > 1 {
                anyhow::bail!(
                    "The source deployment type supports a single node, got {} replicas",
                    self.replicas
                );
            }
        }

        for client in self.repositories.keys() {
            if Client::parse_any(client).is_none() {
                anyhow::bail!("Unknown client in [repositories]: {}", client);
            }
        }

        Ok(())
    }

    pub fn node_spec(&self) -> NodeSpec {
        NodeSpec {
            name: self.name.clone(),
            network: self.network.clone(),
            deployment_type: self.deployment_type,
            execution: self.execution.client,
            consensus: self.consensus.client,
            rollup: self.rollup.map(|rollup| rollup.client),
        }
    }

    /// The configured JWT secret, or the one generated for this state file.
    pub fn jwt_secret(&self, state_path: &Path) -> Result<JwtSecret> {
        match &self.jwt_secret {
            Some(secret) => Ok(secret.clone()),
            None => {
                let dir = state_path.parent().unwrap_or_else(|| Path::new("."));
                JwtSecret::load_or_generate(&dir.join(JWT_SECRET_FILENAME))
            }
        }
    }

    /// Build the full deployment plan.
    pub fn plan(&self, jwt: &JwtSecret) -> Result<(Plan, Vec<Node>)> {
        self.validate()?;

        let composer = NodeComposer::new(&self.assets_dir, jwt)
            .with_connection(self.connection.as_ref())
            .with_kubernetes(&self.kubernetes)
            .with_repositories(&self.repositories);

        let mut plan = Plan::new();
        let nodes = composer.factory(&self.node_spec(), self.replicas, &mut plan)?;
        plan.validate()?;

        tracing::info!(
            name = %self.name,
            nodes = nodes.len(),
            steps = plan.len(),
            "Deployment planned"
        );

        Ok((plan, nodes))
    }

    fn executor(&self) -> Result<Router> {
        let remote = self
            .connection
            .clone()
            .map(RemoteShell::new)
            .transpose()?;
        Ok(Router::new(remote, Some(Kubectl::new(&self.kubernetes))))
    }

    /// What [`Deployer::deploy`] would change, without changing anything.
    pub fn preview(&self, plan: &Plan, state_path: &Path) -> Result<ApplyReport> {
        Engine::new(Router::default(), state_path).preview(plan)
    }

    /// Apply `plan` to the target hosts and cluster.
    pub async fn deploy(&self, plan: &Plan, state_path: &Path) -> Result<ApplyReport> {
        tracing::info!(
            name = %self.name,
            network = %self.network,
            deployment_type = %self.deployment_type,
            state = %state_path.display(),
            "Deploying..."
        );

        Engine::new(self.executor()?, state_path).apply(plan).await
    }

    /// What [`Deployer::destroy`] would tear down, newest first, without running anything.
    pub fn preview_destroy(&self, state_path: &Path) -> Result<ApplyReport> {
        Engine::new(Router::default(), state_path).preview_destroy()
    }

    /// Tear down everything recorded in the state file.
    pub async fn destroy(&self, state_path: &Path) -> Result<usize> {
        tracing::info!(name = %self.name, state = %state_path.display(), "Destroying deployment...");

        Engine::new(self.executor()?, state_path).destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const CONFIG: &str = r#"
name = "holesky-node"
network = "holesky"
deployment_type = "kubernetes"
replicas = 2

[execution]
client = "reth"

[consensus]
client = "lighthouse"

[repositories.reth]
url = "https://github.com/example/reth.git"
branch = "v1"

[kubernetes]
namespace = "eth"

[kubernetes.execution]
storage_class = "premium-rwo"
cpu_limit = "8"
enable_rpc_ingress = false
"#;

    #[test]
    fn test_load_from_directory() {
        let temp_dir = TempDir::new("ethnode-config").unwrap();
        std::fs::write(temp_dir.path().join(NODES_CONFIG_FILENAME), CONFIG).unwrap();

        let deployer = Deployer::load_from_file(temp_dir.path()).unwrap();

        assert_eq!(deployer.name, "holesky-node");
        assert_eq!(deployer.network, Network::Holesky);
        assert_eq!(deployer.deployment_type, DeploymentType::Kubernetes);
        assert_eq!(deployer.replicas, 2);
        assert_eq!(deployer.execution.client, ExecutionClient::Reth);
        assert_eq!(deployer.repositories["reth"].branch, "v1");
        assert_eq!(
            deployer.kubernetes.execution.resources.cpu_limit.as_deref(),
            Some("8")
        );
        assert_eq!(deployer.kubernetes.execution.enable_rpc_ingress, Some(false));
        assert!(deployer.jwt_secret.is_none());
        deployer.validate().unwrap();
    }

    #[test]
    fn test_load_missing_path() {
        assert!(Deployer::load_from_file(Path::new("/nonexistent/Nodes.toml")).is_err());
    }

    #[test]
    fn test_unknown_client_rejected() {
        let temp_dir = TempDir::new("ethnode-config").unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, CONFIG.replace("\"lighthouse\"", "\"gibberish\"")).unwrap();

        assert!(Deployer::load_from_file(&path).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new("ethnode-config").unwrap();
        let path = temp_dir.path().join(NODES_CONFIG_FILENAME);
        std::fs::write(&path, CONFIG).unwrap();

        let mut deployer = Deployer::load_from_file(&path).unwrap();
        deployer.jwt_secret = Some(JwtSecret::generate());
        deployer.save_to_file(&path).unwrap();

        assert_eq!(Deployer::load_from_file(&path).unwrap(), deployer);
    }

    #[test]
    fn test_validate() {
        let temp_dir = TempDir::new("ethnode-config").unwrap();
        let path = temp_dir.path().join(NODES_CONFIG_FILENAME);
        std::fs::write(&path, CONFIG).unwrap();
        let deployer = Deployer::load_from_file(&path).unwrap();

        let mut source = deployer.clone();
        source.deployment_type = DeploymentType::Source;
        assert!(source.validate().is_err());
        source.connection = Some(Connection::new("10.0.0.1"));
        assert!(source.validate().is_err());
        source.replicas = 1;
        source.validate().unwrap();

        let mut unknown = deployer.clone();
        unknown.repositories.insert(
            "erigon".to_string(),
            deployer.repositories["reth"].clone(),
        );
        assert!(unknown.validate().is_err());

        let mut none = deployer;
        none.replicas = 0;
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_generated_jwt_is_reused() {
        let temp_dir = TempDir::new("ethnode-config").unwrap();
        let path = temp_dir.path().join(NODES_CONFIG_FILENAME);
        std::fs::write(&path, CONFIG).unwrap();
        let deployer = Deployer::load_from_file(&path).unwrap();

        let state = temp_dir.path().join("state").join("state.json");
        let first = deployer.jwt_secret(&state).unwrap();
        assert_eq!(deployer.jwt_secret(&state).unwrap(), first);
        assert!(temp_dir.path().join("state").join(JWT_SECRET_FILENAME).exists());
    }
}

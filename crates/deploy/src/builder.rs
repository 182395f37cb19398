//! Builder module for creating a [`Deployer`] configuration programmatically.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Result;

use crate::{
    Deployer,
    catalog::Repository,
    clients::{Client, ConsensusClient, DeploymentType, ExecutionClient, Network, RollupClient},
    connection::Connection,
    deployer::ClientSelection,
    jwt::JwtSecret,
    recipes::KubernetesConfig,
};

/// Builder for creating a [`Deployer`] configuration.
///
/// This builder handles:
/// - Deployment name generation (if not provided)
/// - JWT secret generation (if not provided)
///
/// # Example
///
/// ```no_run
/// use ethnode_deploy::{DeployerBuilder, ExecutionClient, ConsensusClient, Network};
///
/// # fn example() -> anyhow::Result<()> {
/// let deployer = DeployerBuilder::new(Network::Holesky, ExecutionClient::Reth, ConsensusClient::Lighthouse)
///     .name("holesky-archive")
///     .connection(ethnode_deploy::Connection::new("10.0.0.4"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeployerBuilder {
    network: Network,
    execution: ExecutionClient,
    consensus: ConsensusClient,
    name: Option<String>,
    deployment_type: DeploymentType,
    replicas: usize,
    rollup: Option<RollupClient>,
    connection: Option<Connection>,
    jwt_secret: Option<JwtSecret>,
    assets_dir: Option<PathBuf>,
    repositories: BTreeMap<String, Repository>,
    kubernetes: KubernetesConfig,
}

impl DeployerBuilder {
    pub fn new(network: Network, execution: ExecutionClient, consensus: ConsensusClient) -> Self {
        Self {
            network,
            execution,
            consensus,
            name: None,
            deployment_type: DeploymentType::default(),
            replicas: 1,
            rollup: None,
            connection: None,
            jwt_secret: None,
            assets_dir: None,
            repositories: BTreeMap::new(),
            kubernetes: KubernetesConfig::default(),
        }
    }

    /// Set the deployment name.
    ///
    /// If not set, a memorable two-word name will be generated (e.g., "eth-happy-turtle").
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn deployment_type(mut self, deployment_type: DeploymentType) -> Self {
        self.deployment_type = deployment_type;
        self
    }

    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn rollup(mut self, rollup: RollupClient) -> Self {
        self.rollup = Some(rollup);
        self
    }

    pub fn connection(mut self, connection: Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Use a fixed JWT secret instead of generating one.
    pub fn jwt_secret(mut self, secret: JwtSecret) -> Self {
        self.jwt_secret = Some(secret);
        self
    }

    pub fn assets_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.assets_dir = Some(path.into());
        self
    }

    /// Override the source repository of a client.
    pub fn repository(mut self, client: Client, repository: Repository) -> Self {
        self.repositories.insert(client.name().to_string(), repository);
        self
    }

    pub fn kubernetes(mut self, kubernetes: KubernetesConfig) -> Self {
        self.kubernetes = kubernetes;
        self
    }

    /// Build and validate the [`Deployer`] configuration.
    pub fn build(self) -> Result<Deployer> {
        let name = self.name.unwrap_or_else(|| {
            let name = names::Generator::default()
                .next()
                .unwrap_or_else(|| "unknown-node".to_string());
            format!("eth-{}", name)
        });

        tracing::info!(
            name,
            network = %self.network,
            deployment_type = %self.deployment_type,
            execution = %self.execution,
            consensus = %self.consensus,
            "Building node deployer configuration..."
        );

        let deployer = Deployer {
            name,
            network: self.network,
            deployment_type: self.deployment_type,
            replicas: self.replicas,
            jwt_secret: Some(self.jwt_secret.unwrap_or_else(JwtSecret::generate)),
            assets_dir: self.assets_dir.unwrap_or_else(|| PathBuf::from(".")),
            connection: self.connection,
            execution: ClientSelection {
                client: self.execution,
            },
            consensus: ClientSelection {
                client: self.consensus,
            },
            rollup: self.rollup.map(|client| ClientSelection { client }),
            repositories: self.repositories,
            kubernetes: self.kubernetes,
        };

        deployer.validate()?;
        Ok(deployer)
    }
}

use std::path::PathBuf;

use clap::Parser;
use ethnode_deploy::{DeploymentType, NODES_CONFIG_FILENAME};
use tracing::level_filters::LevelFilter;

/// Default location of the deployment state file.
const DEFAULT_STATE_PATH: &str = ".ethnode/state.json";

/// What to do with the configured nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DeployType {
    Source,
    Binary,
    Docker,
    Kubernetes,
    /// Plan with the configured deployment type and print the plan.
    DryRun,
}

impl DeployType {
    /// The deployment type this selects, `None` for a dry run.
    pub fn deployment_type(&self) -> Option<DeploymentType> {
        match self {
            DeployType::Source => Some(DeploymentType::Source),
            DeployType::Binary => Some(DeploymentType::Binary),
            DeployType::Docker => Some(DeploymentType::Docker),
            DeployType::Kubernetes => Some(DeploymentType::Kubernetes),
            DeployType::DryRun => None,
        }
    }
}

#[derive(Parser)]
#[command(name = "ethnode")]
#[command(
    author,
    version,
    about = "Provision Ethereum execution and consensus clients from source or on Kubernetes"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "ETHNODE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or to a directory containing Nodes.toml.
    #[arg(short, long, env = "ETHNODE_CONFIG", default_value = NODES_CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Override the configured deployment type.
    ///
    /// `dry-run` plans with the configured type, prints the plan and applies nothing.
    #[arg(long, env = "DEPLOY_TYPE")]
    pub deploy_type: Option<DeployType>,

    /// Path to the state file recording what was applied.
    ///
    /// A generated JWT secret is stored next to it.
    #[arg(long, env = "ETHNODE_STATE", default_value = DEFAULT_STATE_PATH)]
    pub state: PathBuf,

    /// Override the number of nodes to deploy.
    #[arg(long, env = "ETHNODE_REPLICAS")]
    pub replicas: Option<usize>,

    /// Tear down everything recorded in the state file instead of deploying.
    #[arg(long, env = "ETHNODE_DESTROY", default_value_t = false)]
    pub destroy: bool,
}

//! ethnode-deploy - Provisioning library for Ethereum nodes.
//!
//! A node pairs an execution client with a consensus client. This crate turns a
//! [`Deployer`] configuration into a [`Plan`], a graph of idempotent steps, and
//! applies it either on a remote host over SSH (build from source, run under
//! systemd) or on a Kubernetes cluster.

mod builder;
pub use builder::DeployerBuilder;

mod deployer;
pub use deployer::{
    ClientSelection, Deployer, ENV_PREFIX, JWT_SECRET_FILENAME, NODES_CONFIG_FILENAME,
};

pub mod catalog;
pub mod clients;
pub mod connection;
pub mod engine;
mod fs;
pub mod jwt;
pub mod k8s;
pub mod node;
pub mod plan;
pub mod recipes;
pub mod service_unit;

pub use catalog::{Catalog, ClientRecipe, JwtBinding, Recipe, RecipeContext, RecipeHandle, Repository};
pub use clients::{Client, ConsensusClient, DeploymentType, ExecutionClient, Network, Role, RollupClient};
pub use connection::{Connection, Credential};
pub use engine::{ApplyReport, Change, Engine, Operation, StepExecutor};
pub use jwt::JwtSecret;
pub use node::{Node, NodeComposer, NodeSpec};
pub use plan::{Action, Plan, RemoteCommand, Scope, Step, StepId, StepKind, Teardown};
pub use recipes::{KubernetesConfig, WorkloadConfig};
pub use service_unit::ServiceUnit;

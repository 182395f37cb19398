//! The client catalog: maps a role and client name to the recipe that provisions it.

pub mod descriptors;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    clients::{Client, DeploymentType, Network, Role},
    connection::Connection,
    jwt::JwtSecret,
    plan::{Plan, Scope, StepId},
    recipes::{self, KubernetesConfig},
};

pub use descriptors::{ClientDescriptor, descriptor};

/// Where to fetch a client's source code from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub url: Url,
    pub branch: String,
}

/// How a recipe gets hold of the JWT secret.
#[derive(Debug, Clone)]
pub enum JwtBinding<'a> {
    /// The recipe declares its own secret from this value.
    Owned(&'a JwtSecret),
    /// A secret already declared by the node, at step `step`.
    Shared { secret_name: String, step: StepId },
}

/// Inputs of a recipe.
#[derive(Debug, Clone)]
pub struct RecipeContext<'a> {
    /// Step ids of the recipe are created under this scope.
    pub scope: Scope,
    /// Base name of the declared Kubernetes objects.
    pub instance: String,
    pub network: &'a Network,
    pub deployment_type: DeploymentType,
    pub assets_dir: &'a Path,
    pub jwt: JwtBinding<'a>,
    pub connection: Option<&'a Connection>,
    /// Remote data directory. Defaults to `/data/{network}/{client}`.
    pub data_dir: Option<String>,
    /// Overrides the client's default repository.
    pub repository: Option<&'a Repository>,
    pub kubernetes: Option<&'a KubernetesConfig>,
    /// Steps every root step of the recipe depends on.
    pub after: Vec<StepId>,
}

impl<'a> RecipeContext<'a> {
    pub fn new(
        scope: Scope,
        instance: impl Into<String>,
        network: &'a Network,
        deployment_type: DeploymentType,
        assets_dir: &'a Path,
        jwt: JwtBinding<'a>,
    ) -> Self {
        Self {
            scope,
            instance: instance.into(),
            network,
            deployment_type,
            assets_dir,
            jwt,
            connection: None,
            data_dir: None,
            repository: None,
            kubernetes: None,
            after: Vec::new(),
        }
    }

    pub fn with_connection(mut self, connection: &'a Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_repository(mut self, repository: Option<&'a Repository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_kubernetes(mut self, kubernetes: &'a KubernetesConfig) -> Self {
        self.kubernetes = Some(kubernetes);
        self
    }

    pub fn after(mut self, steps: impl IntoIterator<Item = StepId>) -> Self {
        self.after.extend(steps);
        self
    }

    pub fn data_dir_for(&self, client: &str) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| format!("/data/{}/{}", self.network, client))
    }
}

/// Steps declared by one recipe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecipeHandle {
    pub name: String,
    pub steps: Vec<StepId>,
}

impl RecipeHandle {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The last declared step.
    pub fn terminal(&self) -> Option<&StepId> {
        self.steps.last()
    }
}

/// Something that knows how to add the steps provisioning a component to a plan.
pub trait Recipe {
    fn name(&self) -> &'static str;

    fn plan(&self, ctx: &RecipeContext<'_>, plan: &mut Plan) -> Result<RecipeHandle>;
}

/// The recipe of an execution or consensus client, driven by its descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ClientRecipe {
    descriptor: &'static ClientDescriptor,
}

impl ClientRecipe {
    pub fn new(client: Client) -> Self {
        Self {
            descriptor: descriptor(client),
        }
    }

    pub fn client(&self) -> Client {
        self.descriptor.client
    }

    pub fn descriptor(&self) -> &'static ClientDescriptor {
        self.descriptor
    }
}

impl Recipe for ClientRecipe {
    fn name(&self) -> &'static str {
        self.descriptor.name()
    }

    fn plan(&self, ctx: &RecipeContext<'_>, plan: &mut Plan) -> Result<RecipeHandle> {
        match ctx.deployment_type {
            DeploymentType::Source => recipes::source::plan(self.descriptor, ctx, plan),
            DeploymentType::Kubernetes => recipes::kubernetes::plan(self.descriptor, ctx, plan),
            DeploymentType::Binary | DeploymentType::Docker => {
                tracing::warn!(
                    client = self.name(),
                    deployment_type = %ctx.deployment_type,
                    "Deployment type is not supported yet, skipping client"
                );
                Ok(RecipeHandle::empty(self.name()))
            }
        }
    }
}

pub struct Catalog;

impl Catalog {
    pub fn recipe(client: Client) -> ClientRecipe {
        ClientRecipe::new(client)
    }

    /// Look up a client by role and name. Unknown names are logged and yield `None`.
    pub fn resolve(role: Role, name: &str) -> Option<ClientRecipe> {
        match Client::parse(role, name) {
            Some(client) => Some(ClientRecipe::new(client)),
            None => {
                tracing::warn!(%role, client = name, "Unknown client, nothing will be deployed for it");
                None
            }
        }
    }

    /// Plan the client named `name`. An unknown name yields an empty handle, not an error.
    pub fn dispatch(
        role: Role,
        name: &str,
        ctx: &RecipeContext<'_>,
        plan: &mut Plan,
    ) -> Result<RecipeHandle> {
        match Self::resolve(role, name) {
            Some(recipe) => recipe.plan(ctx, plan),
            None => Ok(RecipeHandle::empty(name)),
        }
    }
}

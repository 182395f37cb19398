use std::{fmt, path::PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{fs::FsHandler, k8s::Object};

/// Hierarchical identifier of a step, e.g. `node/execution/reth/cloneRepo`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment.
    pub fn local_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

/// A namespace for step ids, owned by one component of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct Scope(String);

impl Scope {
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name))
    }

    pub fn step(&self, name: &str) -> StepId {
        StepId(format!("{}/{}", self.0, name))
    }

    pub fn contains(&self, id: &StepId) -> bool {
        id.0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// What a step accomplishes. Used to query plans and to label output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    CreateDirectory,
    WriteJwtSecret,
    SetGroupPermissions,
    CreateDataDir,
    CloneOrUpdateRepo,
    InstallToolchain,
    CreateServiceAccount,
    SetOwnership,
    Build,
    InstallBinary,
    InstallStartScript,
    MakeExecutable,
    CopyServiceUnit,
    EnableService,
    StartService,
    FinalizeOwnership,
    DeclareConfig,
    DeclareSecret,
    DeclareVolumeClaim,
    DeclareWorkload,
    DeclareNetworkService,
}

/// A shell command run on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    /// Run when the step is created.
    pub create: String,
    /// Run instead of `create` when the step changed since the last apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    /// Run when the step is removed from the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    /// The command embeds secret material and must never be printed.
    #[serde(default)]
    pub sensitive: bool,
}

impl RemoteCommand {
    pub fn new(create: impl Into<String>) -> Self {
        Self {
            create: create.into(),
            update: None,
            delete: None,
            sensitive: false,
        }
    }

    pub fn on_update(mut self, command: impl Into<String>) -> Self {
        self.update = Some(command.into());
        self
    }

    pub fn on_delete(mut self, command: impl Into<String>) -> Self {
        self.delete = Some(command.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// The command to run for the given operation.
    pub fn for_update(&self) -> &str {
        self.update.as_deref().unwrap_or(&self.create)
    }
}

/// A local file copied to the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFile {
    pub local: PathBuf,
    pub remote: String,
    /// SHA-256 of the local content when the step was planned. Part of the
    /// fingerprint, so an edited file is copied again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// The effect of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec", rename_all = "kebab-case")]
pub enum Action {
    Command(RemoteCommand),
    CopyFile(CopyFile),
    Apply(Box<Object>),
}

impl Action {
    pub fn command(command: RemoteCommand) -> Self {
        Action::Command(command)
    }

    pub fn copy(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Action::CopyFile(CopyFile {
            local: local.into(),
            remote: remote.into(),
            digest: None,
        })
    }

    /// Copy a local asset, recording a digest of its current content.
    ///
    /// A missing file is not an error here: the copy fails with its path when applied.
    pub fn copy_asset(local: impl Into<PathBuf>, remote: impl Into<String>) -> anyhow::Result<Self> {
        let local = local.into();
        let digest = FsHandler::digest(&local)?;
        Ok(Action::CopyFile(CopyFile {
            local,
            remote: remote.into(),
            digest,
        }))
    }

    /// Digest of the copied content, for copy steps planned from an existing file.
    pub fn content_digest(&self) -> Option<&str> {
        match self {
            Action::CopyFile(copy) => copy.digest.as_deref(),
            _ => None,
        }
    }

    pub fn apply(object: impl Into<Object>) -> Self {
        Action::Apply(Box::new(object.into()))
    }

    pub fn is_sensitive(&self) -> bool {
        match self {
            Action::Command(command) => command.sensitive,
            Action::CopyFile(_) => false,
            Action::Apply(object) => object.is_sensitive(),
        }
    }

    /// What to undo when the step leaves the deployment, if anything.
    pub fn teardown(&self) -> Option<Teardown> {
        match self {
            Action::Command(command) => command.delete.clone().map(Teardown::Command),
            Action::CopyFile(copy) => Some(Teardown::Command(format!("rm -f {}", copy.remote))),
            Action::Apply(object) => Some(Teardown::DeleteObject {
                kind: object.kind().to_string(),
                name: object.name().to_string(),
                namespace: object.namespace().map(str::to_string),
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command(command) if command.sensitive => f.write_str("<redacted>"),
            Action::Command(command) => f.write_str(&command.create),
            Action::CopyFile(copy) => write!(f, "copy {} -> {}", copy.local.display(), copy.remote),
            Action::Apply(object) => write!(f, "apply {}/{}", object.kind(), object.name()),
        }
    }
}

/// The inverse of an applied step, recorded in the deployment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Teardown {
    Command(String),
    DeleteObject {
        kind: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },
}

/// A node of the deployment graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub kind: StepKind,
    pub action: Action,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

impl Step {
    /// SHA-256 of the serialized action, hex encoded.
    ///
    /// Dependencies are not part of the fingerprint: reordering a graph does not
    /// re-run steps whose effect is unchanged.
    pub fn fingerprint(&self) -> anyhow::Result<String> {
        let json = serde_json::to_string(&self.action)
            .context(format!("Failed to serialize step {}", self.id))?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

macro_rules! impl_into_object {
    ($($ty:ident),*) => {
        $(
            impl From<crate::k8s::$ty> for Object {
                fn from(value: crate::k8s::$ty) -> Self {
                    Object::$ty(value)
                }
            }
        )*
    };
}

impl_into_object!(ConfigMap, Secret, PersistentVolumeClaim, StatefulSet, Service);

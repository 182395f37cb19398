//! Applies and deletes objects through `kubectl`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::process;
use crate::{k8s::Object, recipes::KubernetesConfig};

#[derive(Debug, Clone, Default)]
pub struct Kubectl {
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
    namespace: Option<String>,
}

impl Kubectl {
    pub fn new(config: &KubernetesConfig) -> Self {
        Self {
            context: config.context.clone(),
            kubeconfig: config.kubeconfig.clone(),
            namespace: config.namespace.clone(),
        }
    }

    fn base_args(&self, namespace: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        if let Some(context) = &self.context {
            args.push(format!("--context={}", context));
        }
        if let Some(namespace) = namespace.or(self.namespace.as_deref()) {
            args.push(format!("--namespace={}", namespace));
        }
        args
    }

    pub async fn apply(&self, object: &Object) -> Result<()> {
        let manifest = object.to_manifest()?;
        let mut args = self.base_args(object.namespace());
        args.extend(["apply".to_string(), "-f".to_string(), "-".to_string()]);

        let output = process::run("kubectl", &args, Some(&manifest))
            .await
            .context(format!("Failed to apply {} {}", object.kind(), object.name()))?;

        tracing::debug!(kind = object.kind(), name = object.name(), output = %output.trim(), "Applied object");
        Ok(())
    }

    pub async fn delete(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<()> {
        let mut args = self.base_args(namespace);
        args.extend([
            "delete".to_string(),
            kind.to_lowercase(),
            name.to_string(),
            "--ignore-not-found".to_string(),
        ]);

        process::run("kubectl", &args, None)
            .await
            .context(format!("Failed to delete {} {}", kind, name))?;

        Ok(())
    }
}

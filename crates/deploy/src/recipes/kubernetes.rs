//! Kubernetes template: one StatefulSet per client, plus its configuration,
//! storage and network services.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{JwtBinding, RecipeContext, RecipeHandle, descriptors::ClientDescriptor},
    clients::{Client, Role},
    fs::FsHandler,
    k8s::{
        APP_LABEL, ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource,
        LabelSelector, ObjectMeta, PersistentVolumeClaim, PodSpec, PodTemplate, PortProtocol,
        ResourceRequirements, Secret, Service, ServicePort, ServiceType, StatefulSet,
        StatefulSetSpec, Volume, VolumeMount,
    },
    plan::{Action, Plan, StepId, StepKind},
};

/// Key of the JWT secret, and file name it is mounted as.
pub const JWT_FILE: &str = "jwt.hex";

/// Cluster wide settings for Kubernetes deployments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Namespace of every declared object. Defaults to the context's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// kubectl context to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default)]
    pub execution: WorkloadConfig,

    #[serde(default)]
    pub consensus: WorkloadConfig,
}

impl KubernetesConfig {
    pub fn workload(&self, role: Role) -> &WorkloadConfig {
        match role {
            Role::Execution => &self.execution,
            Role::Consensus => &self.consensus,
        }
    }
}

/// Settings of the workload running one client. Unset values fall back to per-role defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Local client configuration file. Defaults to `{assets_dir}/config/{client}.toml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,

    /// Restore the data volume from this VolumeSnapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,

    #[serde(default, flatten)]
    pub resources: ResourceConfig,

    /// Expose the RPC port through a NodePort service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_rpc_ingress: Option<bool>,

    /// Environment variables, injected through a dedicated ConfigMap.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

struct RoleDefaults {
    storage_size: &'static str,
    cpu_request: &'static str,
    cpu_limit: &'static str,
    memory_request: &'static str,
    memory_limit: &'static str,
    rpc_service: bool,
}

fn role_defaults(role: Role) -> RoleDefaults {
    match role {
        Role::Execution => RoleDefaults {
            storage_size: "1500Gi",
            cpu_request: "2",
            cpu_limit: "4",
            memory_request: "8Gi",
            memory_limit: "16Gi",
            rpc_service: true,
        },
        Role::Consensus => RoleDefaults {
            storage_size: "200Gi",
            cpu_request: "1",
            cpu_limit: "2",
            memory_request: "4Gi",
            memory_limit: "8Gi",
            rpc_service: false,
        },
    }
}

/// Name of the JWT secret a client declares when deployed on its own.
pub fn standalone_secret_name(role: Role, instance: &str) -> String {
    match role {
        Role::Execution => "execution-jwt".to_string(),
        Role::Consensus => format!("{}-execution-jwt", instance),
    }
}

pub(crate) fn plan(
    desc: &ClientDescriptor,
    ctx: &RecipeContext<'_>,
    plan: &mut Plan,
) -> Result<RecipeHandle> {
    let defaults = KubernetesConfig::default();
    let config = ctx.kubernetes.unwrap_or(&defaults);
    let role = desc.client.role();
    let workload = config.workload(role);
    let role_defaults = role_defaults(role);

    let client = desc.name();
    let instance = ctx.instance.as_str();
    let namespace = config.namespace.as_deref();
    let scope = &ctx.scope;
    let meta = |name: String| ObjectMeta::new(name, namespace, instance);

    let mut steps: Vec<StepId> = Vec::new();

    let config_path = workload
        .config_path
        .clone()
        .unwrap_or_else(|| ctx.assets_dir.join("config").join(format!("{}.toml", client)));
    let content = FsHandler::read_asset(&config_path)
        .context(format!("Failed to load {} configuration", client))?;

    let config_map = format!("{}-config", instance);
    let config_step = plan.add(
        scope.step("config"),
        StepKind::DeclareConfig,
        Action::apply(ConfigMap::new(
            meta(config_map.clone()),
            BTreeMap::from([(format!("{}.toml", client), content)]),
        )),
        &ctx.after,
    )?;
    steps.push(config_step.clone());
    let mut workload_deps = vec![config_step];

    let env_map = (!workload.environment.is_empty()).then(|| format!("{}-env-config", instance));
    if let Some(env_map) = &env_map {
        let env_step = plan.add(
            scope.step("envConfig"),
            StepKind::DeclareConfig,
            Action::apply(ConfigMap::new(
                meta(env_map.clone()),
                workload.environment.clone(),
            )),
            &ctx.after,
        )?;
        steps.push(env_step.clone());
        workload_deps.push(env_step);
    }

    let secret_name = match &ctx.jwt {
        JwtBinding::Owned(secret) => {
            let name = standalone_secret_name(role, instance);
            let secret_step = plan.add(
                scope.step("jwtSecret"),
                StepKind::DeclareSecret,
                Action::apply(Secret::opaque(
                    meta(name.clone()),
                    JWT_FILE,
                    secret.expose().as_bytes(),
                )),
                &ctx.after,
            )?;
            steps.push(secret_step.clone());
            workload_deps.push(secret_step);
            name
        }
        JwtBinding::Shared { secret_name, step } => {
            workload_deps.push(step.clone());
            secret_name.clone()
        }
    };

    let claim = format!("{}-data", instance);
    let storage_size = workload
        .storage_size
        .as_deref()
        .unwrap_or(role_defaults.storage_size);
    let claim_step = plan.add(
        scope.step("dataVolume"),
        StepKind::DeclareVolumeClaim,
        Action::apply(PersistentVolumeClaim::read_write_once(
            meta(claim.clone()),
            workload.storage_class.clone(),
            storage_size,
            workload.snapshot_name.as_deref(),
        )),
        &ctx.after,
    )?;
    steps.push(claim_step.clone());
    workload_deps.push(claim_step);

    let ports = desc.ports;
    let mut container_ports = vec![
        ContainerPort {
            name: "p2p-tcp".to_string(),
            container_port: ports.p2p,
            protocol: PortProtocol::Tcp,
        },
        ContainerPort {
            name: "p2p-udp".to_string(),
            container_port: ports.p2p,
            protocol: PortProtocol::Udp,
        },
    ];
    if let Some(quic) = ports.quic {
        container_ports.push(ContainerPort {
            name: "quic".to_string(),
            container_port: quic,
            protocol: PortProtocol::Udp,
        });
    }
    container_ports.push(ContainerPort {
        name: "metrics".to_string(),
        container_port: ports.metrics,
        protocol: PortProtocol::Tcp,
    });
    container_ports.push(ContainerPort {
        name: rpc_port_name(desc.client).to_string(),
        container_port: ports.rpc,
        protocol: PortProtocol::Tcp,
    });
    if let Some(engine) = ports.engine {
        container_ports.push(ContainerPort {
            name: "engine".to_string(),
            container_port: engine,
            protocol: PortProtocol::Tcp,
        });
    }

    let resources = &workload.resources;
    let resources = ResourceRequirements {
        limits: BTreeMap::from([
            (
                "cpu".to_string(),
                resources.cpu_limit.clone().unwrap_or_else(|| role_defaults.cpu_limit.to_string()),
            ),
            (
                "memory".to_string(),
                resources
                    .memory_limit
                    .clone()
                    .unwrap_or_else(|| role_defaults.memory_limit.to_string()),
            ),
        ]),
        requests: BTreeMap::from([
            (
                "cpu".to_string(),
                resources
                    .cpu_request
                    .clone()
                    .unwrap_or_else(|| role_defaults.cpu_request.to_string()),
            ),
            (
                "memory".to_string(),
                resources
                    .memory_request
                    .clone()
                    .unwrap_or_else(|| role_defaults.memory_request.to_string()),
            ),
        ]),
    };

    let container = Container {
        name: client.to_string(),
        image: workload
            .image
            .clone()
            .unwrap_or_else(|| desc.image.to_string()),
        command: workload.command.clone(),
        ports: container_ports,
        volume_mounts: vec![
            VolumeMount {
                name: "config".to_string(),
                mount_path: desc.container_config_dir(),
                read_only: true,
            },
            VolumeMount {
                name: "data".to_string(),
                mount_path: desc.container_data_dir(ctx.network),
                read_only: false,
            },
            VolumeMount {
                name: "jwt".to_string(),
                mount_path: desc.container_jwt_dir(),
                read_only: true,
            },
        ],
        env_from: env_map
            .iter()
            .map(|name| EnvFromSource {
                config_map_ref: ConfigMapEnvSource {
                    name: name.clone(),
                    optional: true,
                },
            })
            .collect(),
        resources: Some(resources),
    };

    let selector = BTreeMap::from([(APP_LABEL.to_string(), instance.to_string())]);
    let pod_meta = ObjectMeta {
        labels: selector.clone(),
        ..Default::default()
    };

    let (internal_service, p2p_service) = match role {
        Role::Execution => (
            format!("{}-internal-service", instance),
            format!("{}-p2pnet-service", instance),
        ),
        Role::Consensus => (
            format!("{}-metrics-service", instance),
            format!("{}-p2p-service", instance),
        ),
    };

    let stateful_set = StatefulSet {
        api_version: "apps/v1".to_string(),
        metadata: meta(format!("{}-set", instance)),
        spec: StatefulSetSpec {
            replicas: 1,
            service_name: internal_service.clone(),
            selector: LabelSelector {
                match_labels: selector,
            },
            template: PodTemplate {
                metadata: pod_meta,
                spec: PodSpec {
                    containers: vec![container],
                    volumes: vec![
                        Volume::config_map("config", &config_map),
                        Volume::claim("data", &claim),
                        Volume::secret("jwt", &secret_name),
                    ],
                },
            },
        },
    };

    let workload_step = plan.add(
        scope.step("statefulSet"),
        StepKind::DeclareWorkload,
        Action::apply(stateful_set),
        &workload_deps,
    )?;
    steps.push(workload_step);

    let mut p2p_ports = vec![
        ServicePort::new("p2p-tcp", ports.p2p, PortProtocol::Tcp),
        ServicePort::new("p2p-udp", ports.p2p, PortProtocol::Udp),
    ];
    if let Some(quic) = ports.quic {
        p2p_ports.push(ServicePort::new("quic", quic, PortProtocol::Udp));
    }

    let mut internal_ports = vec![ServicePort::new("metrics", ports.metrics, PortProtocol::Tcp)];
    if let Some(engine) = ports.engine {
        internal_ports.push(ServicePort::new("engine", engine, PortProtocol::Tcp));
    }

    let mut services = vec![
        ("p2pService", p2p_service, ServiceType::NodePort, p2p_ports),
        (
            "internalService",
            internal_service,
            ServiceType::ClusterIP,
            internal_ports,
        ),
    ];

    if workload
        .enable_rpc_ingress
        .unwrap_or(role_defaults.rpc_service)
    {
        services.push((
            "rpcService",
            format!("{}-rpc-service", instance),
            ServiceType::NodePort,
            vec![ServicePort::new(
                rpc_port_name(desc.client),
                ports.rpc,
                PortProtocol::Tcp,
            )],
        ));
    }

    for (step_name, service_name, service_type, service_ports) in services {
        let step = plan.add(
            scope.step(step_name),
            StepKind::DeclareNetworkService,
            Action::apply(Service::new(
                meta(service_name),
                service_type,
                instance,
                service_ports,
            )),
            &ctx.after,
        )?;
        steps.push(step);
    }

    tracing::debug!(client, instance, objects = steps.len(), "Planned Kubernetes deployment");

    Ok(RecipeHandle {
        name: client.to_string(),
        steps,
    })
}

fn rpc_port_name(client: Client) -> &'static str {
    match client.role() {
        Role::Execution => "rpc",
        Role::Consensus => "http",
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempdir::TempDir;

    use super::*;
    use crate::{
        catalog::{Catalog, Recipe},
        clients::{ConsensusClient, DeploymentType, ExecutionClient, Network},
        jwt::JwtSecret,
        k8s::Object,
        plan::Scope,
    };

    fn assets(clients: &[&str]) -> TempDir {
        let dir = TempDir::new("ethnode-assets").unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        for client in clients {
            std::fs::write(
                dir.path().join("config").join(format!("{client}.toml")),
                format!("# {client} configuration\n"),
            )
            .unwrap();
        }
        dir
    }

    fn object_names(plan: &Plan) -> Vec<(String, String)> {
        plan.objects()
            .map(|(_, o)| (o.kind().to_string(), o.name().to_string()))
            .collect()
    }

    #[test]
    fn test_consensus_object_names() {
        let assets = assets(&["lighthouse"]);
        let network = Network::Sepolia;
        let jwt = JwtSecret::generate();
        let config = KubernetesConfig {
            namespace: Some("eth".to_string()),
            ..Default::default()
        };
        let ctx = RecipeContext::new(
            Scope::root("lighthouse"),
            "lighthouse",
            &network,
            DeploymentType::Kubernetes,
            assets.path(),
            JwtBinding::Owned(&jwt),
        )
        .with_kubernetes(&config);

        let mut plan = Plan::new();
        Catalog::recipe(Client::Consensus(ConsensusClient::Lighthouse))
            .plan(&ctx, &mut plan)
            .unwrap();

        let names = object_names(&plan);
        let expected: Vec<(String, String)> = [
            ("ConfigMap", "lighthouse-config"),
            ("Secret", "lighthouse-execution-jwt"),
            ("PersistentVolumeClaim", "lighthouse-data"),
            ("StatefulSet", "lighthouse-set"),
            ("Service", "lighthouse-p2p-service"),
            ("Service", "lighthouse-metrics-service"),
        ]
        .iter()
        .map(|(k, n)| (k.to_string(), n.to_string()))
        .collect();
        assert_eq!(names, expected);
        assert!(plan.objects().all(|(_, o)| o.namespace() == Some("eth")));
    }

    #[test]
    fn test_workload_mounts_and_dependencies() {
        let assets = assets(&["reth"]);
        let network = Network::Holesky;
        let jwt = JwtSecret::generate();
        let ctx = RecipeContext::new(
            Scope::root("el"),
            "reth",
            &network,
            DeploymentType::Kubernetes,
            assets.path(),
            JwtBinding::Owned(&jwt),
        );

        let mut plan = Plan::new();
        Catalog::recipe(Client::Execution(ExecutionClient::Reth))
            .plan(&ctx, &mut plan)
            .unwrap();

        let set_id = StepId::new("el/statefulSet");
        for dependency in ["el/config", "el/jwtSecret", "el/dataVolume"] {
            assert!(plan.depends_on_transitively(&set_id, &StepId::new(dependency)));
        }
        // Services don't wait for the workload.
        assert!(!plan.depends_on_transitively(&StepId::new("el/rpcService"), &set_id));

        let Action::Apply(object) = &plan.get(&set_id).unwrap().action else {
            panic!("expected an object");
        };
        let Object::StatefulSet(set) = object.as_ref() else {
            panic!("expected a StatefulSet");
        };
        let container = &set.spec.template.spec.containers[0];
        let mounts: Vec<&str> = container
            .volume_mounts
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(
            mounts,
            vec!["/etc/reth", "/root/.local/share/reth", "/etc/reth/execution-jwt"]
        );
        assert_eq!(container.image, "ghcr.io/paradigmxyz/reth:latest");
        assert_eq!(set.spec.replicas, 1);
        assert_eq!(set.spec.selector.match_labels["app"], "reth");
        assert_eq!(
            container.resources.as_ref().unwrap().limits["memory"],
            "16Gi"
        );
    }

    #[test]
    fn test_snapshot_and_environment() {
        let assets = assets(&["reth"]);
        let network = Network::Mainnet;
        let jwt = JwtSecret::generate();
        let config = KubernetesConfig {
            execution: WorkloadConfig {
                snapshot_name: Some("reth-mainnet-snap".to_string()),
                storage_class: Some("premium-rwo".to_string()),
                environment: BTreeMap::from([("RUST_LOG".to_string(), "info".to_string())]),
                enable_rpc_ingress: Some(false),
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = RecipeContext::new(
            Scope::root("el"),
            "reth",
            &network,
            DeploymentType::Kubernetes,
            assets.path(),
            JwtBinding::Owned(&jwt),
        )
        .with_kubernetes(&config);

        let mut plan = Plan::new();
        Catalog::recipe(Client::Execution(ExecutionClient::Reth))
            .plan(&ctx, &mut plan)
            .unwrap();

        let names = object_names(&plan);
        assert!(names.contains(&("ConfigMap".to_string(), "reth-env-config".to_string())));
        assert!(!names.iter().any(|(_, n)| n == "reth-rpc-service"));

        let claim = plan
            .objects()
            .find_map(|(_, o)| match o {
                Object::PersistentVolumeClaim(claim) => Some(claim.clone()),
                _ => None,
            })
            .unwrap();
        let source = claim.spec.data_source.unwrap();
        assert_eq!(source.name, "reth-mainnet-snap");
        assert_eq!(source.api_group.as_deref(), Some("snapshot.storage.k8s.io"));
    }

    #[test]
    fn test_missing_configuration_file_fails() {
        let assets = assets(&[]);
        let network = Network::Mainnet;
        let jwt = JwtSecret::generate();
        let ctx = RecipeContext::new(
            Scope::root("cl"),
            "teku",
            &network,
            DeploymentType::Kubernetes,
            assets.path(),
            JwtBinding::Owned(&jwt),
        );

        let err = Catalog::recipe(Client::Consensus(ConsensusClient::Teku))
            .plan(&ctx, &mut Plan::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("teku.toml"));
    }

    #[test]
    fn test_shared_secret_is_mounted_not_declared() {
        let assets = assets(&["nimbus"]);
        let network = Network::Mainnet;
        let mut plan = Plan::new();
        let shared = plan
            .add(
                StepId::new("node/jwtSecret"),
                StepKind::DeclareSecret,
                Action::apply(Secret::opaque(
                    ObjectMeta::new("node-execution-jwt", None, "node"),
                    JWT_FILE,
                    b"00",
                )),
                &[],
            )
            .unwrap();
        let ctx = RecipeContext::new(
            Scope::root("node/cl"),
            "node-nimbus",
            &network,
            DeploymentType::Kubernetes,
            Path::new(assets.path()),
            JwtBinding::Shared {
                secret_name: "node-execution-jwt".to_string(),
                step: shared.clone(),
            },
        );

        Catalog::recipe(Client::Consensus(ConsensusClient::Nimbus))
            .plan(&ctx, &mut plan)
            .unwrap();

        assert_eq!(
            plan.objects()
                .filter(|(_, o)| o.kind() == "Secret")
                .count(),
            1
        );
        assert!(plan.depends_on_transitively(&StepId::new("node/cl/statefulSet"), &shared));
    }
}

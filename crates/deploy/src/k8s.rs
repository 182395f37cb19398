//! A minimal typed model of the Kubernetes objects the recipes declare.
//!
//! Objects serialize to the manifest shape `kubectl apply` expects.

use std::collections::BTreeMap;

use anyhow::Context;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const APP_LABEL: &str = "app";

const MANAGED_BY: &str = "ethnode";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for an object belonging to the client instance `part_of`.
    pub fn new(name: impl Into<String>, namespace: Option<&str>, part_of: &str) -> Self {
        let name = name.into();
        let labels = BTreeMap::from([
            (NAME_LABEL.to_string(), name.clone()),
            (PART_OF_LABEL.to_string(), part_of.to_string()),
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        ]);

        Self {
            name,
            namespace: namespace.map(str::to_string),
            labels,
        }
    }
}

/// Transport protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

/// A declared Kubernetes object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    ConfigMap(ConfigMap),
    Secret(Secret),
    PersistentVolumeClaim(PersistentVolumeClaim),
    StatefulSet(StatefulSet),
    Service(Service),
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::ConfigMap(_) => "ConfigMap",
            Object::Secret(_) => "Secret",
            Object::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            Object::StatefulSet(_) => "StatefulSet",
            Object::Service(_) => "Service",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Object::ConfigMap(o) => &o.metadata,
            Object::Secret(o) => &o.metadata,
            Object::PersistentVolumeClaim(o) => &o.metadata,
            Object::StatefulSet(o) => &o.metadata,
            Object::Service(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Whether the object carries secret material.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Object::Secret(_))
    }

    /// Render the object as a JSON manifest.
    pub fn to_manifest(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self)
            .context(format!("Failed to serialize {} {}", self.kind(), self.name()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub api_version: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(metadata: ObjectMeta, data: BTreeMap<String, String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            metadata,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub api_version: String,
    pub metadata: ObjectMeta,
    #[serde(rename = "type")]
    pub secret_type: String,
    /// Base64 encoded values.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// An `Opaque` secret holding a single key.
    pub fn opaque(metadata: ObjectMeta, key: &str, value: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        Self {
            api_version: "v1".to_string(),
            metadata,
            secret_type: "Opaque".to_string(),
            data: BTreeMap::from([(key.to_string(), encoded)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeClaimSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    pub access_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    pub resources: VolumeResources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<TypedLocalObjectReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeResources {
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    pub kind: String,
    pub name: String,
}

impl PersistentVolumeClaim {
    /// A `ReadWriteOnce` claim, optionally restored from a volume snapshot.
    pub fn read_write_once(
        metadata: ObjectMeta,
        storage_class: Option<String>,
        size: &str,
        snapshot: Option<&str>,
    ) -> Self {
        Self {
            api_version: "v1".to_string(),
            metadata,
            spec: PersistentVolumeClaimSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                storage_class_name: storage_class,
                resources: VolumeResources {
                    requests: BTreeMap::from([("storage".to_string(), size.to_string())]),
                },
                data_source: snapshot.map(|name| TypedLocalObjectReference {
                    api_group: Some("snapshot.storage.k8s.io".to_string()),
                    kind: "VolumeSnapshot".to_string(),
                    name: name.to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSet {
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub spec: StatefulSetSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    pub replicas: u32,
    pub service_name: String,
    pub selector: LabelSelector,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    pub config_map_ref: ConfigMapEnvSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapEnvSource {
    pub name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    ConfigMap(ConfigMapVolumeSource),
    Secret(SecretVolumeSource),
    PersistentVolumeClaim(PersistentVolumeClaimVolumeSource),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapVolumeSource {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimVolumeSource {
    pub claim_name: String,
}

impl Volume {
    pub fn config_map(name: &str, config_map: &str) -> Self {
        Self {
            name: name.to_string(),
            source: VolumeSource::ConfigMap(ConfigMapVolumeSource {
                name: config_map.to_string(),
            }),
        }
    }

    pub fn secret(name: &str, secret: &str) -> Self {
        Self {
            name: name.to_string(),
            source: VolumeSource::Secret(SecretVolumeSource {
                secret_name: secret.to_string(),
            }),
        }
    }

    pub fn claim(name: &str, claim: &str) -> Self {
        Self {
            name: name.to_string(),
            source: VolumeSource::PersistentVolumeClaim(PersistentVolumeClaimVolumeSource {
                claim_name: claim.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    NodePort,
    ClusterIP,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: PortProtocol,
}

impl ServicePort {
    pub fn new(name: &str, port: u16, protocol: PortProtocol) -> Self {
        Self {
            name: name.to_string(),
            port,
            target_port: port,
            protocol,
        }
    }
}

impl Service {
    pub fn new(
        metadata: ObjectMeta,
        service_type: ServiceType,
        app: &str,
        ports: Vec<ServicePort>,
    ) -> Self {
        Self {
            api_version: "v1".to_string(),
            metadata,
            spec: ServiceSpec {
                service_type,
                selector: BTreeMap::from([(APP_LABEL.to_string(), app.to_string())]),
                ports,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_manifest() {
        let secret = Object::Secret(Secret::opaque(
            ObjectMeta::new("execution-jwt", Some("eth"), "reth"),
            "jwt.hex",
            b"abcd",
        ));

        let value: serde_json::Value = serde_json::from_str(&secret.to_manifest().unwrap()).unwrap();
        assert_eq!(value["kind"], "Secret");
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["type"], "Opaque");
        assert_eq!(value["metadata"]["namespace"], "eth");
        assert_eq!(value["data"]["jwt.hex"], "YWJjZA==");
        assert!(secret.is_sensitive());
    }

    #[test]
    fn test_claim_from_snapshot() {
        let claim = Object::PersistentVolumeClaim(PersistentVolumeClaim::read_write_once(
            ObjectMeta::new("reth-data", None, "reth"),
            Some("premium-rwo".to_string()),
            "1500Gi",
            Some("reth-snapshot"),
        ));

        let value = serde_json::to_value(&claim).unwrap();
        assert_eq!(value["spec"]["accessModes"], json!(["ReadWriteOnce"]));
        assert_eq!(value["spec"]["storageClassName"], "premium-rwo");
        assert_eq!(value["spec"]["resources"]["requests"]["storage"], "1500Gi");
        assert_eq!(
            value["spec"]["dataSource"],
            json!({
                "apiGroup": "snapshot.storage.k8s.io",
                "kind": "VolumeSnapshot",
                "name": "reth-snapshot"
            })
        );
        assert!(value["metadata"].get("namespace").is_none());
    }

    #[test]
    fn test_volume_sources_serialize_inline() {
        let volumes = vec![
            Volume::config_map("config", "reth-config"),
            Volume::secret("jwt", "execution-jwt"),
            Volume::claim("data", "reth-data"),
        ];

        let value = serde_json::to_value(&volumes).unwrap();
        assert_eq!(
            value,
            json!([
                { "name": "config", "configMap": { "name": "reth-config" } },
                { "name": "jwt", "secret": { "secretName": "execution-jwt" } },
                { "name": "data", "persistentVolumeClaim": { "claimName": "reth-data" } }
            ])
        );

        let parsed: Vec<Volume> = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, volumes);
    }

    #[test]
    fn test_service_ports() {
        let service = Service::new(
            ObjectMeta::new("reth-p2pnet-service", None, "reth"),
            ServiceType::NodePort,
            "reth",
            vec![
                ServicePort::new("p2p-tcp", 30303, PortProtocol::Tcp),
                ServicePort::new("p2p-udp", 30303, PortProtocol::Udp),
            ],
        );

        let value = serde_json::to_value(Object::Service(service)).unwrap();
        assert_eq!(value["spec"]["type"], "NodePort");
        assert_eq!(value["spec"]["selector"]["app"], "reth");
        assert_eq!(value["spec"]["ports"][1]["protocol"], "UDP");
        assert_eq!(value["spec"]["ports"][1]["targetPort"], 30303);
    }
}

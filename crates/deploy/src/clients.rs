//! Client, network and deployment type identifiers.
//!
//! Every identifier is a closed enum so that an unknown client name in the
//! configuration is rejected when the configuration is parsed, not silently
//! skipped while planning.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::IntoEnumIterator;

/// The layer of the Ethereum stack a client belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Execution,
    Consensus,
}

/// Supported execution layer clients.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionClient {
    Reth,
    Geth,
    Nethermind,
}

/// Supported consensus layer clients.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsensusClient {
    Teku,
    Prysm,
    Lighthouse,
    Lodestar,
    Nimbus,
}

/// Layer 2 rollup clients. Only the start script is provisioned for now.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RollupClient {
    Alphanet,
}

/// Any supported client, tagged with its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Client {
    Execution(ExecutionClient),
    Consensus(ConsensusClient),
}

impl Client {
    /// The role this client plays in a node.
    pub fn role(&self) -> Role {
        match self {
            Client::Execution(_) => Role::Execution,
            Client::Consensus(_) => Role::Consensus,
        }
    }

    /// The lowercase client name, as used in paths, unit names and object names.
    pub fn name(&self) -> &'static str {
        match self {
            Client::Execution(client) => client.into(),
            Client::Consensus(client) => client.into(),
        }
    }

    /// Parse a client name for the given role. Returns `None` for unknown names.
    pub fn parse(role: Role, name: &str) -> Option<Self> {
        match role {
            Role::Execution => name.parse().ok().map(Client::Execution),
            Role::Consensus => name.parse().ok().map(Client::Consensus),
        }
    }

    /// Parse a client name of either role.
    pub fn parse_any(name: &str) -> Option<Self> {
        Self::parse(Role::Execution, name).or_else(|| Self::parse(Role::Consensus, name))
    }

    /// Every supported client, execution clients first.
    pub fn all() -> impl Iterator<Item = Client> {
        ExecutionClient::iter()
            .map(Client::Execution)
            .chain(ConsensusClient::iter().map(Client::Consensus))
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<ExecutionClient> for Client {
    fn from(client: ExecutionClient) -> Self {
        Client::Execution(client)
    }
}

impl From<ConsensusClient> for Client {
    fn from(client: ConsensusClient) -> Self {
        Client::Consensus(client)
    }
}

/// The Ethereum network a node joins.
///
/// Names outside the well-known set are kept verbatim as [`Network::Custom`];
/// they end up in remote paths, so they are restricted to `[a-z0-9-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Sepolia,
    Holesky,
    Base,
    Custom(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Sepolia => "sepolia",
            Network::Holesky => "holesky",
            Network::Base => "base",
            Network::Custom(name) => name,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let network = match s {
            "mainnet" => Network::Mainnet,
            "sepolia" => Network::Sepolia,
            "holesky" => Network::Holesky,
            "base" => Network::Base,
            "" => anyhow::bail!("Network name must not be empty"),
            other => {
                if !other
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                {
                    anyhow::bail!(
                        "Invalid network name '{}': only lowercase letters, digits and '-' are allowed",
                        other
                    );
                }
                Network::Custom(other.to_string())
            }
        };
        Ok(network)
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How a client is provisioned.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeploymentType {
    /// Build from source on a remote host and run as a systemd service.
    #[default]
    Source,
    /// Install a release binary. Not supported by any recipe yet.
    Binary,
    /// Run in a container on the remote host. Not supported by any recipe yet.
    Docker,
    /// Run as a Kubernetes StatefulSet.
    Kubernetes,
}

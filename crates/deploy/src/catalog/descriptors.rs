//! Per-client facts: where the source lives, how to build it, which ports it serves.

use crate::clients::{Client, ConsensusClient, ExecutionClient, Network};

/// Whether a remote path is shared by all networks or specific to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    Host,
    Network,
}

/// Build prerequisites installed on the remote host before building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Toolchain {
    Rust,
    Go,
    Node,
    Dotnet,
    Native,
}

impl Toolchain {
    pub fn install_command(&self) -> &'static str {
        match self {
            Toolchain::Rust => "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            Toolchain::Go => "sudo apt update && sudo apt install -y golang-go",
            Toolchain::Node => "sudo apt update && sudo apt install -y nodejs npm",
            Toolchain::Dotnet => "sudo apt update && sudo apt install -y dotnet-sdk-5.0",
            Toolchain::Native => "sudo apt install -y git cmake build-essential",
        }
    }
}

/// Values substituted into build and install commands.
#[derive(Debug, Clone)]
pub struct BuildEnv<'a> {
    pub network: &'a Network,
    pub repo_dir: &'a str,
    pub account: &'a str,
    /// Home directory of the login user, where rustup installs cargo.
    pub home_dir: &'a str,
}

impl BuildEnv<'_> {
    pub fn cargo(&self) -> String {
        format!("{}/.cargo/bin/cargo", self.home_dir)
    }
}

type Render = fn(&BuildEnv<'_>) -> String;

/// Ports a client serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPorts {
    /// Peer to peer, TCP and UDP.
    pub p2p: u16,
    /// Extra UDP port for QUIC discovery.
    pub quic: Option<u16>,
    pub metrics: u16,
    /// JSON-RPC for execution clients, beacon API for consensus clients.
    pub rpc: u16,
    /// Authenticated engine API, execution clients only.
    pub engine: Option<u16>,
}

const EXECUTION_PORTS: ClientPorts = ClientPorts {
    p2p: 30303,
    quic: None,
    metrics: 9001,
    rpc: 8545,
    engine: Some(8551),
};

const CONSENSUS_PORTS: ClientPorts = ClientPorts {
    p2p: 9000,
    quic: Some(9001),
    metrics: 5054,
    rpc: 5052,
    engine: None,
};

const LODESTAR_PORTS: ClientPorts = ClientPorts {
    metrics: 5064,
    rpc: 5062,
    ..CONSENSUS_PORTS
};

/// Everything the recipes need to know about one client.
#[derive(Debug, Clone)]
pub struct ClientDescriptor {
    pub client: Client,
    pub repository: &'static str,
    pub branch: &'static str,
    pub repo_scope: PathScope,
    pub script_scope: PathScope,
    pub toolchain: Option<Toolchain>,
    pub build: Option<Render>,
    pub install: Option<Render>,
    /// Installed binary, chowned to the service account once everything is in place.
    pub binary: Option<Render>,
    /// Dedicated unix account owning the sources and data.
    pub service_account: Option<&'static str>,
    pub start_script: bool,
    pub ports: ClientPorts,
    /// Default container image for Kubernetes deployments.
    pub image: &'static str,
    /// Data directory inside the container. `{network}` is substituted.
    pub container_data_dir: &'static str,
}

impl ClientDescriptor {
    pub fn name(&self) -> &'static str {
        self.client.name()
    }

    /// Remote checkout directory.
    pub fn repo_dir(&self, network: &Network) -> String {
        match self.repo_scope {
            PathScope::Host => format!("/data/repos/{}", self.name()),
            PathScope::Network => format!("/data/repos/{}/{}", network, self.name()),
        }
    }

    /// File name of the start script, shared by the local asset and its remote copy.
    pub fn script_name(&self, network: &Network) -> String {
        match self.script_scope {
            PathScope::Host => format!("start_{}.sh", self.name()),
            PathScope::Network => format!("start_{}_{}.sh", self.name(), network),
        }
    }

    pub fn container_data_dir(&self, network: &Network) -> String {
        self.container_data_dir
            .replace("{network}", network.as_str())
    }

    /// Mount point of the JWT secret inside the container.
    pub fn container_jwt_dir(&self) -> String {
        match self.client {
            Client::Execution(_) => format!("/etc/{}/execution-jwt", self.name()),
            Client::Consensus(_) => "/secrets".to_string(),
        }
    }

    pub fn container_config_dir(&self) -> String {
        format!("/etc/{}", self.name())
    }
}

/// Look up the descriptor of a client.
pub fn descriptor(client: Client) -> &'static ClientDescriptor {
    match client {
        Client::Execution(ExecutionClient::Reth) => &RETH,
        Client::Execution(ExecutionClient::Geth) => &GETH,
        Client::Execution(ExecutionClient::Nethermind) => &NETHERMIND,
        Client::Consensus(ConsensusClient::Teku) => &TEKU,
        Client::Consensus(ConsensusClient::Prysm) => &PRYSM,
        Client::Consensus(ConsensusClient::Lighthouse) => &LIGHTHOUSE,
        Client::Consensus(ConsensusClient::Lodestar) => &LODESTAR,
        Client::Consensus(ConsensusClient::Nimbus) => &NIMBUS,
    }
}

fn reth_binary(network: &Network) -> &'static str {
    // Base is an OP Stack chain and needs the optimism build.
    if *network == Network::Base {
        "op-reth"
    } else {
        "reth"
    }
}

static RETH: ClientDescriptor = ClientDescriptor {
    client: Client::Execution(ExecutionClient::Reth),
    repository: "https://github.com/paradigmxyz/reth.git",
    branch: "main",
    repo_scope: PathScope::Network,
    script_scope: PathScope::Network,
    toolchain: Some(Toolchain::Rust),
    build: Some(|env: &BuildEnv<'_>| {
        let binary = reth_binary(env.network);
        let features = if binary == "op-reth" {
            " --features \"optimism\""
        } else {
            ""
        };
        format!(
            "{} install --locked --path {}/bin/reth --bin {}{} --root /data",
            env.cargo(),
            env.repo_dir,
            binary,
            features
        )
    }),
    install: None,
    binary: Some(|env: &BuildEnv<'_>| format!("/data/bin/{}", reth_binary(env.network))),
    service_account: Some("reth"),
    start_script: true,
    ports: EXECUTION_PORTS,
    image: "ghcr.io/paradigmxyz/reth:latest",
    container_data_dir: "/root/.local/share/reth",
};

static GETH: ClientDescriptor = ClientDescriptor {
    client: Client::Execution(ExecutionClient::Geth),
    repository: "https://github.com/ethereum/go-ethereum.git",
    branch: "master",
    repo_scope: PathScope::Host,
    script_scope: PathScope::Host,
    toolchain: Some(Toolchain::Go),
    build: Some(|env: &BuildEnv<'_>| format!("cd {} && sudo -u {} make geth", env.repo_dir, env.account)),
    install: Some(|env: &BuildEnv<'_>| format!("mv {}/build/bin/geth /usr/local/bin/geth", env.repo_dir)),
    binary: Some(|_: &BuildEnv<'_>| "/usr/local/bin/geth".to_string()),
    service_account: Some("geth"),
    start_script: false,
    ports: EXECUTION_PORTS,
    image: "ethereum/client-go:stable",
    container_data_dir: "/root/.ethereum",
};

static NETHERMIND: ClientDescriptor = ClientDescriptor {
    client: Client::Execution(ExecutionClient::Nethermind),
    repository: "https://github.com/NethermindEth/nethermind.git",
    branch: "master",
    repo_scope: PathScope::Host,
    script_scope: PathScope::Host,
    toolchain: Some(Toolchain::Dotnet),
    build: Some(|env: &BuildEnv<'_>| format!("cd {} && dotnet build -c Release", env.repo_dir)),
    install: None,
    binary: None,
    service_account: Some("nethermind"),
    start_script: true,
    ports: EXECUTION_PORTS,
    image: "nethermind/nethermind:latest",
    container_data_dir: "/nethermind/data",
};

static TEKU: ClientDescriptor = ClientDescriptor {
    client: Client::Consensus(ConsensusClient::Teku),
    repository: "https://github.com/Consensys/teku.git",
    branch: "master",
    repo_scope: PathScope::Host,
    script_scope: PathScope::Host,
    toolchain: None,
    build: None,
    install: None,
    binary: None,
    service_account: None,
    start_script: false,
    ports: CONSENSUS_PORTS,
    image: "consensys/teku:latest",
    container_data_dir: "/opt/teku/data/{network}",
};

static PRYSM: ClientDescriptor = ClientDescriptor {
    client: Client::Consensus(ConsensusClient::Prysm),
    repository: "https://github.com/prysmaticlabs/prysm.git",
    branch: "develop",
    repo_scope: PathScope::Host,
    script_scope: PathScope::Host,
    toolchain: Some(Toolchain::Go),
    build: Some(|env: &BuildEnv<'_>| format!("cd {} && sudo -u {} make", env.repo_dir, env.account)),
    install: None,
    binary: None,
    service_account: Some("prysm"),
    start_script: true,
    ports: CONSENSUS_PORTS,
    image: "gcr.io/prysmaticlabs/prysm/beacon-chain:stable",
    container_data_dir: "/data/prysm/{network}",
};

static LIGHTHOUSE: ClientDescriptor = ClientDescriptor {
    client: Client::Consensus(ConsensusClient::Lighthouse),
    repository: "https://github.com/sigp/lighthouse.git",
    branch: "stable",
    repo_scope: PathScope::Network,
    script_scope: PathScope::Network,
    toolchain: Some(Toolchain::Rust),
    build: Some(|env: &BuildEnv<'_>| {
        format!(
            "{} install --locked --path {}/lighthouse --bin lighthouse --root /data",
            env.cargo(),
            env.repo_dir
        )
    }),
    install: None,
    binary: Some(|_: &BuildEnv<'_>| "/data/bin/lighthouse".to_string()),
    service_account: Some("lighthouse"),
    start_script: true,
    ports: CONSENSUS_PORTS,
    image: "sigp/lighthouse:latest",
    container_data_dir: "/root/.lighthouse/{network}",
};

static LODESTAR: ClientDescriptor = ClientDescriptor {
    client: Client::Consensus(ConsensusClient::Lodestar),
    repository: "https://github.com/ChainSafe/lodestar.git",
    branch: "unstable",
    repo_scope: PathScope::Host,
    script_scope: PathScope::Host,
    toolchain: Some(Toolchain::Node),
    build: Some(|env: &BuildEnv<'_>| format!("cd {} && npm install && npm run build", env.repo_dir)),
    install: None,
    binary: None,
    service_account: Some("lodestar"),
    start_script: true,
    ports: LODESTAR_PORTS,
    image: "chainsafe/lodestar:latest",
    container_data_dir: "/data/lodestar/{network}",
};

static NIMBUS: ClientDescriptor = ClientDescriptor {
    client: Client::Consensus(ConsensusClient::Nimbus),
    repository: "https://github.com/status-im/nimbus-eth2.git",
    branch: "stable",
    repo_scope: PathScope::Host,
    script_scope: PathScope::Host,
    toolchain: Some(Toolchain::Native),
    build: Some(|env: &BuildEnv<'_>| format!("cd {} && make -j4 nimbus_beacon_node", env.repo_dir)),
    install: Some(|env: &BuildEnv<'_>| {
        format!(
            "mv {}/build/nimbus_beacon_node /usr/local/bin/nimbus_beacon_node",
            env.repo_dir
        )
    }),
    binary: Some(|_: &BuildEnv<'_>| "/usr/local/bin/nimbus_beacon_node".to_string()),
    service_account: Some("nimbus"),
    start_script: true,
    ports: CONSENSUS_PORTS,
    image: "statusim/nimbus-eth2:multiarch-latest",
    container_data_dir: "/home/user/nimbus-eth2/build/data/{network}",
};

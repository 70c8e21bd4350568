//! Typed view of collected cluster and NBDB state

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Label set on control-plane nodes by kubeadm and most distributions
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
/// Legacy control-plane label
pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

/// Role of a cluster node, used only for ordering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "control-plane" => Some(NodeRole::ControlPlane),
            "worker" => Some(NodeRole::Worker),
            _ => None,
        }
    }

    /// Derive the role from node labels, falling back to kind-style naming
    /// (`<cluster>-control-plane`) when no role label is present
    pub fn from_labels(labels: &BTreeMap<String, String>, name: &str) -> Self {
        if labels.contains_key(CONTROL_PLANE_LABEL) || labels.contains_key(MASTER_LABEL) {
            return NodeRole::ControlPlane;
        }
        if name.ends_with("control-plane") {
            return NodeRole::ControlPlane;
        }
        NodeRole::Worker
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Kubernetes node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// InternalIP of the node; host-network pods share it
    pub ip: Option<IpAddr>,
    pub role: NodeRole,
}

impl Node {
    pub fn new(name: impl Into<String>, ip: Option<IpAddr>, role: NodeRole) -> Self {
        Self {
            name: name.into(),
            ip,
            role,
        }
    }

    pub fn is_control_plane(&self) -> bool {
        self.role == NodeRole::ControlPlane
    }

    /// Control-plane nodes sort first, then everything by name
    pub fn ordering_key(&self) -> (u8, &str) {
        let rank = if self.is_control_plane() { 0 } else { 1 };
        (rank, self.name.as_str())
    }
}

/// Sort nodes into diagram order
pub fn sort_nodes(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Switch,
    Router,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Switch => f.write_str("switch"),
            ComponentKind::Router => f.write_str("router"),
        }
    }
}

/// A logical switch or logical router as reported by one node's NBDB
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalComponent {
    pub kind: ComponentKind,
    /// Node whose NBDB reported this row
    pub node: String,
    /// Row `_uuid`; only meaningful within the reporting NBDB
    pub identity: String,
    pub name: String,
    /// Names of member ports
    pub ports: Vec<String>,
    /// Flattened `other_config:*`, `options:*` and `external_ids:*` columns
    pub attributes: BTreeMap<String, String>,
}

impl LogicalComponent {
    /// Subnets from `other_config:subnet` (space separated for dual stack)
    pub fn subnets(&self) -> Vec<IpNetwork> {
        self.attributes
            .get("other_config:subnet")
            .map(|value| {
                value
                    .split_whitespace()
                    .filter_map(|s| s.parse::<IpNetwork>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortKind {
    SwitchPort,
    RouterPort,
}

/// OVN port type; the empty string is a regular VIF port
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortType {
    Normal,
    Router,
    Localnet,
    Other(String),
}

impl PortType {
    pub fn parse(value: &str) -> Self {
        match value {
            "" => PortType::Normal,
            "router" => PortType::Router,
            "localnet" => PortType::Localnet,
            other => PortType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PortType::Normal => "",
            PortType::Router => "router",
            PortType::Localnet => "localnet",
            PortType::Other(other) => other,
        }
    }
}

impl From<String> for PortType {
    fn from(value: String) -> Self {
        PortType::parse(&value)
    }
}

impl From<PortType> for String {
    fn from(value: PortType) -> Self {
        value.as_str().to_string()
    }
}

/// A logical switch port or logical router port
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalPort {
    pub kind: PortKind,
    pub node: String,
    pub name: String,
    /// LSP `addresses`, or `mac network...` for router ports
    pub address: String,
    pub port_type: PortType,
    /// LSP options; router ports carry their `peer` column here as well
    pub options: BTreeMap<String, String>,
}

impl LogicalPort {
    /// Name of the port on the other side of this link, if any
    pub fn peer(&self) -> Option<&str> {
        let peer = match self.kind {
            PortKind::SwitchPort if self.port_type == PortType::Router => {
                self.options.get("router-port")
            }
            PortKind::SwitchPort => None,
            PortKind::RouterPort => self.options.get("peer"),
        };
        peer.map(String::as_str).filter(|p| !p.is_empty())
    }

    /// IP addresses in the address field, with or without prefix length
    pub fn ip_addrs(&self) -> Vec<IpAddr> {
        self.address
            .split_whitespace()
            .filter_map(|token| {
                token
                    .parse::<IpAddr>()
                    .ok()
                    .or_else(|| token.parse::<IpNetwork>().ok().map(|n| n.ip()))
            })
            .collect()
    }

    /// CIDR networks in the address field
    pub fn networks(&self) -> Vec<IpNetwork> {
        self.address
            .split_whitespace()
            .filter(|token| token.contains('/'))
            .filter_map(|token| token.parse::<IpNetwork>().ok())
            .collect()
    }
}

/// How a pod reaches the OVN network
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PodClass {
    HostNetwork,
    PodNetwork,
    Outside,
}

/// A running pod with an assigned IP
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub ip: IpAddr,
    pub node: String,
}

impl Pod {
    /// Logical switch port name OVN-Kubernetes assigns to this pod
    pub fn port_name(&self) -> String {
        format!("{}_{}", self.namespace, self.name)
    }

    /// Classify the pod against its node IP and the known pod CIDRs.
    /// With no CIDR known at all, every non-host IP counts as pod network.
    pub fn classify(&self, node_ip: Option<IpAddr>, pod_cidrs: &[IpNetwork]) -> PodClass {
        if node_ip == Some(self.ip) {
            return PodClass::HostNetwork;
        }
        if pod_cidrs.is_empty() || pod_cidrs.iter().any(|cidr| cidr.contains(self.ip)) {
            return PodClass::PodNetwork;
        }
        PodClass::Outside
    }
}

/// Outcome of collecting one node's NBDB
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum NodeStatus {
    Complete,
    Partial { errors: Vec<String> },
    Failed { error: String },
}

impl NodeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, NodeStatus::Failed { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, NodeStatus::Complete)
    }
}

/// Everything collected in one invocation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub switches: Vec<LogicalComponent>,
    pub routers: Vec<LogicalComponent>,
    pub switch_ports: Vec<LogicalPort>,
    pub router_ports: Vec<LogicalPort>,
    pub pods: Vec<Pod>,
    pub node_status: BTreeMap<String, NodeStatus>,
}

impl Snapshot {
    /// Nodes in diagram order
    pub fn ordered_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
        nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Switches followed by routers
    pub fn components(&self) -> impl Iterator<Item = &LogicalComponent> {
        self.switches.iter().chain(self.routers.iter())
    }

    pub fn status(&self, node: &str) -> Option<&NodeStatus> {
        self.node_status.get(node)
    }

    /// Nodes that are not `Complete`, in name order
    pub fn degraded_nodes(&self) -> Vec<(&str, &NodeStatus)> {
        self.node_status
            .iter()
            .filter(|(_, status)| !status.is_complete())
            .map(|(name, status)| (name.as_str(), status))
            .collect()
    }
}

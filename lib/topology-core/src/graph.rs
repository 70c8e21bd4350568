//! Layered topology graph
//!
//! The graph follows the packet path bottom to top: pods, their ports, the
//! node switch, the cluster router, the join and transit switches, the
//! gateway router, the external switch and finally the external network.
//! Components are recognised by OVN-Kubernetes naming conventions.
//!
//! Per-node components are drawn inside their node's partition. Cluster-wide
//! components (including the ones an override draws once) go into a single
//! partition emitted after all nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ipnetwork::IpNetwork;
use serde::Serialize;
use tracing::{debug, warn};
use topology_api::{
    ComponentKind, LogicalComponent, LogicalPort, Node, NodeStatus, Pod, PodClass, PortKind,
    PortType, Snapshot,
};

use crate::placement::{Placement, PlacementMap};
use crate::TopologyError;

/// Port name prefixes OVN-Kubernetes uses for infrastructure ports
pub const INFRA_PORT_PREFIXES: &[&str] = &[
    "k8s-", "stor-", "rtos-", "rtoj-", "jtor-", "rtoe-", "etor-", "rtots-", "tstor-", "breth0",
];

pub const CLUSTER_ROUTER: &str = "ovn_cluster_router";

/// Name of the shared management port host-network pods attach to
pub fn management_port(node: &str) -> String {
    format!("k8s-{}", node)
}

/// Whether a switch port can be the dedicated port of a pod
pub fn is_pod_port(port: &LogicalPort) -> bool {
    port.kind == PortKind::SwitchPort
        && port.port_type == PortType::Normal
        && !INFRA_PORT_PREFIXES
            .iter()
            .any(|prefix| port.name.starts_with(prefix))
}

/// Partition a graph node is drawn in
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Node(String),
    Cluster,
}

impl Scope {
    /// Prefix for graph node ids; `@` cannot appear in a node name
    fn key(&self) -> &str {
        match self {
            Scope::Node(name) => name,
            Scope::Cluster => "@cluster",
        }
    }
}

/// Bottom-to-top layers; the derive order is the rank
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    Pods,
    PodPorts,
    NodeSwitch,
    NodeSwitchPorts,
    ClusterRouter,
    ClusterRouterPorts,
    JoinSwitch,
    JoinSwitchPorts,
    TransitSwitch,
    TransitSwitchPorts,
    GatewayRouter,
    GatewayRouterPorts,
    ExternalSwitch,
    ExternalSwitchPorts,
    Other,
    OtherPorts,
    ExternalNetwork,
}

/// What a component does in an OVN-Kubernetes topology
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    NodeSwitch,
    ClusterRouter,
    JoinSwitch,
    TransitSwitch,
    GatewayRouter,
    ExternalSwitch,
    Other,
}

impl Role {
    pub fn of(name: &str, kind: ComponentKind, node_names: &BTreeSet<&str>) -> Self {
        match kind {
            ComponentKind::Switch if node_names.contains(name) => Role::NodeSwitch,
            ComponentKind::Router if name == CLUSTER_ROUTER => Role::ClusterRouter,
            ComponentKind::Router if name.starts_with("GR_") => Role::GatewayRouter,
            ComponentKind::Switch if name == "join" || name.starts_with("join_") => {
                Role::JoinSwitch
            }
            ComponentKind::Switch
                if name == "transit_switch" || name.ends_with("_transit_switch") =>
            {
                Role::TransitSwitch
            }
            ComponentKind::Switch if name.starts_with("ext_") => Role::ExternalSwitch,
            _ => Role::Other,
        }
    }

    pub fn layer(&self) -> Layer {
        match self {
            Role::NodeSwitch => Layer::NodeSwitch,
            Role::ClusterRouter => Layer::ClusterRouter,
            Role::JoinSwitch => Layer::JoinSwitch,
            Role::TransitSwitch => Layer::TransitSwitch,
            Role::GatewayRouter => Layer::GatewayRouter,
            Role::ExternalSwitch => Layer::ExternalSwitch,
            Role::Other => Layer::Other,
        }
    }

    /// Layer of a port owned by a component with this role. The node switch
    /// splits its ports: pod-facing ones sit below it, the rest above.
    pub fn port_layer(&self, port: &LogicalPort) -> Layer {
        match self {
            Role::NodeSwitch if is_pod_port(port) || port.name.starts_with("k8s-") => {
                Layer::PodPorts
            }
            Role::NodeSwitch => Layer::NodeSwitchPorts,
            Role::ClusterRouter => Layer::ClusterRouterPorts,
            Role::JoinSwitch => Layer::JoinSwitchPorts,
            Role::TransitSwitch => Layer::TransitSwitchPorts,
            Role::GatewayRouter => Layer::GatewayRouterPorts,
            Role::ExternalSwitch => Layer::ExternalSwitchPorts,
            Role::Other => Layer::OtherPorts,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GraphNodeKind {
    Pod,
    SwitchPort,
    RouterPort,
    Switch,
    Router,
    ExternalNetwork,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: GraphNodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Set when the node is drawn but could not be connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// Directed, along the packet path
    Flow,
    /// Undirected link between two peered ports
    Peer,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn flow(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            kind: EdgeKind::Flow,
        }
    }

    /// Peer edges are stored with their endpoints ordered
    pub fn peer(a: &str, b: &str) -> Self {
        let (from, to) = if a <= b { (a, b) } else { (b, a) };
        Self {
            from: from.to_string(),
            to: to.to_string(),
            kind: EdgeKind::Peer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub scope: Scope,
    pub title: String,
    pub layers: BTreeMap<Layer, Vec<GraphNode>>,
}

impl Partition {
    fn new(scope: Scope, title: String) -> Self {
        Self {
            scope,
            title,
            layers: BTreeMap::new(),
        }
    }

    fn push(&mut self, layer: Layer, node: GraphNode) {
        self.layers.entry(layer).or_default().push(node);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.layers.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.values().all(Vec::is_empty)
    }
}

/// Non-fatal problems found while building the graph
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Issue {
    UnmatchedPod {
        pod: String,
        node: String,
        reason: String,
    },
    UnresolvedPlacement {
        component: String,
    },
    NodeDegraded {
        node: String,
        status: NodeStatus,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::UnmatchedPod { pod, node, reason } => {
                write!(f, "pod {} on {} is not connected: {}", pod, node, reason)
            }
            Issue::UnresolvedPlacement { component } => {
                write!(f, "component {} has no placement and was not drawn", component)
            }
            Issue::NodeDegraded { node, status } => match status {
                NodeStatus::Complete => write!(f, "node {} complete", node),
                NodeStatus::Partial { errors } => {
                    write!(f, "node {} returned partial data: {}", node, errors.join("; "))
                }
                NodeStatus::Failed { error } => write!(f, "node {} failed: {}", node, error),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TopologyGraph {
    /// Node partitions in node order, then the cluster partition if any
    pub partitions: Vec<Partition>,
    pub edges: BTreeSet<Edge>,
    pub issues: Vec<Issue>,
    /// Annotations for overridden placements
    pub notes: Vec<String>,
}

impl TopologyGraph {
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.partitions.iter().flat_map(Partition::nodes)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes().find(|n| n.id == id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn partition(&self, scope: &Scope) -> Option<&Partition> {
        self.partitions.iter().find(|p| &p.scope == scope)
    }

    /// Layer a graph node was placed in
    pub fn layer_of(&self, id: &str) -> Option<(&Scope, Layer)> {
        self.partitions.iter().find_map(|partition| {
            partition
                .layers
                .iter()
                .find(|(_, nodes)| nodes.iter().any(|n| n.id == id))
                .map(|(layer, _)| (&partition.scope, *layer))
        })
    }

    pub fn has_edge(&self, edge: &Edge) -> bool {
        self.edges.contains(edge)
    }

    pub fn unmatched_pods(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, Issue::UnmatchedPod { .. }))
            .count()
    }
}

/// Options for graph construction
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Pod CIDRs in addition to the node switch subnets
    pub pod_cidrs: Vec<IpNetwork>,
}

impl BuildOptions {
    /// Classify a pod against its node IP, the configured CIDRs and the
    /// subnets of its node switch
    pub fn pod_class(&self, snapshot: &Snapshot, pod: &Pod) -> PodClass {
        let node_ip = snapshot.node(&pod.node).and_then(|n| n.ip);
        let mut cidrs = self.pod_cidrs.clone();
        for switch in snapshot
            .switches
            .iter()
            .filter(|s| s.name == pod.node && s.node == pod.node)
        {
            cidrs.extend(switch.subnets());
        }
        pod.classify(node_ip, &cidrs)
    }
}

struct PlacedComponent<'a> {
    scope: Scope,
    component: &'a LogicalComponent,
    role: Role,
    ports: Vec<&'a LogicalPort>,
}

struct PlacedPort<'a> {
    scope: Scope,
    id: String,
    port: &'a LogicalPort,
    parent_id: String,
    parent_layer: Layer,
}

pub struct TopologyGraphBuilder<'a> {
    snapshot: &'a Snapshot,
    placement: &'a PlacementMap,
    options: &'a BuildOptions,
}

impl<'a> TopologyGraphBuilder<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        placement: &'a PlacementMap,
        options: &'a BuildOptions,
    ) -> Self {
        Self {
            snapshot,
            placement,
            options,
        }
    }

    pub fn build(&self) -> TopologyGraph {
        let nodes = self.snapshot.ordered_nodes();
        let node_names: BTreeSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let mut graph = TopologyGraph::default();

        let mut partitions: Vec<Partition> = nodes
            .iter()
            .map(|node| Partition::new(Scope::Node(node.name.clone()), self.title(node)))
            .collect();
        let mut cluster = Partition::new(Scope::Cluster, "cluster-wide".to_string());

        let placed = self.place_components(&nodes, &node_names, &mut graph);

        let mut ports: Vec<PlacedPort> = Vec::new();
        for item in &placed {
            let component_id = component_id(&item.scope, item.component);
            let layer = item.role.layer();
            let target = partition_for(&mut partitions, &mut cluster, &item.scope);
            target.push(
                layer,
                GraphNode {
                    id: component_id.clone(),
                    label: item.component.name.clone(),
                    kind: match item.component.kind {
                        ComponentKind::Switch => GraphNodeKind::Switch,
                        ComponentKind::Router => GraphNodeKind::Router,
                    },
                    detail: join_nonempty(item.component.subnets().iter()),
                    warning: None,
                },
            );
            for &port in &item.ports {
                let id = port_id(&item.scope, port);
                target.push(
                    item.role.port_layer(port),
                    GraphNode {
                        id: id.clone(),
                        label: port.name.clone(),
                        kind: match port.kind {
                            PortKind::SwitchPort => GraphNodeKind::SwitchPort,
                            PortKind::RouterPort => GraphNodeKind::RouterPort,
                        },
                        detail: join_nonempty(port.ip_addrs().iter()),
                        warning: None,
                    },
                );
                ports.push(PlacedPort {
                    scope: item.scope.clone(),
                    id,
                    port,
                    parent_id: component_id.clone(),
                    parent_layer: layer,
                });
            }
        }

        let index = PortIndex::new(&ports);
        link_ports(&ports, &index, &mut graph.edges);
        self.external_markers(&placed, &ports, &index, &mut partitions, &mut cluster, &mut graph);
        self.attach_pods(&node_names, &ports, &index, &mut partitions, &mut cluster, &mut graph);

        for (node, status) in self.snapshot.degraded_nodes() {
            graph.issues.push(Issue::NodeDegraded {
                node: node.to_string(),
                status: status.clone(),
            });
        }

        for record in self.placement.records() {
            if let (Some(rule), Some(note)) = (&record.override_rule, &record.note) {
                graph.notes.push(format!(
                    "{}: drawn {} (structural {}, rule {}): {}",
                    record.name, record.effective, record.structural, rule, note
                ));
            }
        }

        if !cluster.is_empty() {
            partitions.push(cluster);
        }
        for partition in &mut partitions {
            for layer in partition.layers.values_mut() {
                layer.sort_by(|a, b| (&a.label, &a.id).cmp(&(&b.label, &b.id)));
            }
        }
        graph.partitions = partitions;

        debug!(
            nodes = graph.node_count(),
            edges = graph.edges.len(),
            issues = graph.issues.len(),
            "Built topology graph"
        );
        graph
    }

    fn title(&self, node: &Node) -> String {
        match self.snapshot.status(&node.name) {
            Some(NodeStatus::Partial { .. }) => format!("{} [partial]", node.name),
            Some(NodeStatus::Failed { .. }) => format!("{} [failed]", node.name),
            _ => node.name.clone(),
        }
    }

    /// Decide the partition of every component and the ports drawn with it
    fn place_components(
        &self,
        nodes: &[&'a Node],
        node_names: &BTreeSet<&str>,
        graph: &mut TopologyGraph,
    ) -> Vec<PlacedComponent<'a>> {
        let ports: BTreeMap<(&str, PortKind, &str), &LogicalPort> = self
            .snapshot
            .switch_ports
            .iter()
            .chain(self.snapshot.router_ports.iter())
            .map(|p| ((p.node.as_str(), p.kind, p.name.as_str()), p))
            .collect();
        let member_kind = |component: &LogicalComponent| match component.kind {
            ComponentKind::Switch => PortKind::SwitchPort,
            ComponentKind::Router => PortKind::RouterPort,
        };

        let mut unresolved = BTreeSet::new();
        let mut placed = Vec::new();
        // name -> (representative, candidate ports by name in reporter order)
        let mut shared: BTreeMap<&str, (&LogicalComponent, BTreeMap<&str, Vec<&LogicalPort>>)> =
            BTreeMap::new();

        for node in nodes {
            let mut seen = BTreeSet::new();
            for component in self.snapshot.components().filter(|c| c.node == node.name) {
                let placement = match self.placement.require(&component.name) {
                    Ok(placement) => placement,
                    Err(e) => {
                        if unresolved.insert(component.name.clone()) {
                            warn!("{}", e);
                        }
                        continue;
                    }
                };
                if !seen.insert(component.name.as_str()) {
                    debug!(node = %node.name, "Ignoring second row named {}", component.name);
                    continue;
                }

                let kind = member_kind(component);
                let members = component.ports.iter().filter_map(|name| {
                    let port = ports.get(&(component.node.as_str(), kind, name.as_str()));
                    if port.is_none() {
                        debug!(node = %node.name, "Port {} of {} has no record", name, component.name);
                    }
                    port.copied()
                });

                if placement == Placement::PerNode {
                    placed.push(PlacedComponent {
                        scope: Scope::Node(node.name.clone()),
                        component,
                        role: Role::of(&component.name, component.kind, node_names),
                        ports: members.collect(),
                    });
                } else {
                    let (_, candidates) = shared
                        .entry(component.name.as_str())
                        .or_insert_with(|| (component, BTreeMap::new()));
                    for port in members {
                        candidates.entry(port.name.as_str()).or_default().push(port);
                    }
                }
            }
        }

        for (_, (component, candidates)) in shared {
            // First reporter wins, unless a later reporter holds the peered copy
            let ports = candidates
                .values()
                .filter_map(|copies| {
                    copies
                        .iter()
                        .find(|p| p.peer().is_some())
                        .or_else(|| copies.first())
                        .copied()
                })
                .collect();
            placed.push(PlacedComponent {
                scope: Scope::Cluster,
                component,
                role: Role::of(&component.name, component.kind, node_names),
                ports,
            });
        }

        for name in unresolved {
            graph
                .issues
                .push(Issue::UnresolvedPlacement { component: name });
        }
        placed
    }

    fn external_markers(
        &self,
        placed: &[PlacedComponent<'a>],
        ports: &[PlacedPort<'a>],
        index: &PortIndex,
        partitions: &mut [Partition],
        cluster: &mut Partition,
        graph: &mut TopologyGraph,
    ) {
        for gateway in placed.iter().filter(|c| c.role == Role::GatewayRouter) {
            let Some(uplink) = gateway.ports.iter().find(|p| p.name.starts_with("rtoe-")) else {
                continue;
            };
            let Some(network) = uplink.networks().into_iter().next() else {
                debug!("{} has no external network address", uplink.name);
                continue;
            };

            let marker = format!("{}:ext-net:{}", gateway.scope.key(), gateway.component.name);
            partition_for(partitions, cluster, &gateway.scope).push(
                Layer::ExternalNetwork,
                GraphNode {
                    id: marker.clone(),
                    label: network.ip().to_string(),
                    kind: GraphNodeKind::ExternalNetwork,
                    detail: Some("external network".to_string()),
                    warning: None,
                },
            );

            let suffix = gateway
                .component
                .name
                .strip_prefix("GR_")
                .unwrap_or(&gateway.component.name);
            let wanted = [format!("ext_{}", suffix), format!("ext_ext_{}", suffix)];
            let external = placed
                .iter()
                .filter(|c| c.role == Role::ExternalSwitch)
                .filter(|c| wanted.contains(&c.component.name))
                .min_by_key(|c| c.scope != gateway.scope);

            let from = match external {
                Some(switch) => switch
                    .ports
                    .iter()
                    .find(|p| p.port_type == PortType::Localnet)
                    .and_then(|p| ports.iter().find(|pp| pp.port == *p && pp.scope == switch.scope))
                    .map(|pp| pp.id.clone())
                    .unwrap_or_else(|| component_id(&switch.scope, switch.component)),
                None => {
                    match index.resolve(
                        PortKind::RouterPort,
                        &uplink.name,
                        &[gateway.scope.clone()],
                        ports,
                    ) {
                        Some(i) => ports[i].id.clone(),
                        None => continue,
                    }
                }
            };
            graph.edges.insert(Edge::flow(&from, &marker));
        }
    }

    fn attach_pods(
        &self,
        node_names: &BTreeSet<&str>,
        ports: &[PlacedPort<'a>],
        index: &PortIndex,
        partitions: &mut [Partition],
        cluster: &mut Partition,
        graph: &mut TopologyGraph,
    ) {
        let mut pods: Vec<&Pod> = self.snapshot.pods.iter().collect();
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

        for pod in pods {
            let known = node_names.contains(pod.node.as_str());
            let scope = if known {
                Scope::Node(pod.node.clone())
            } else {
                Scope::Cluster
            };
            let id = format!("{}:pod:{}/{}", scope.key(), pod.namespace, pod.name);

            let attached = if !known {
                Err("node is not part of the collected node list".to_string())
            } else if self
                .snapshot
                .status(&pod.node)
                .map(NodeStatus::is_failed)
                .unwrap_or(true)
            {
                Err("node data unavailable".to_string())
            } else {
                self.pod_port(pod, ports, index)
            };

            let warning = match attached {
                Ok(port_id) => {
                    graph.edges.insert(Edge::flow(&id, &port_id));
                    None
                }
                Err(reason) => {
                    let pod_name = format!("{}/{}", pod.namespace, pod.name);
                    let failure = TopologyError::UnmatchedPod {
                        pod: pod_name.clone(),
                        reason: reason.clone(),
                    };
                    warn!(node = %pod.node, "{}", failure);
                    graph.issues.push(Issue::UnmatchedPod {
                        pod: pod_name,
                        node: pod.node.clone(),
                        reason: reason.clone(),
                    });
                    Some(reason)
                }
            };

            partition_for(partitions, cluster, &scope).push(
                Layer::Pods,
                GraphNode {
                    id,
                    label: format!("{}/{}", pod.namespace, pod.name),
                    kind: GraphNodeKind::Pod,
                    detail: Some(pod.ip.to_string()),
                    warning,
                },
            );
        }
    }

    /// Graph node id of the port a pod attaches to
    fn pod_port(
        &self,
        pod: &Pod,
        ports: &[PlacedPort<'a>],
        index: &PortIndex,
    ) -> std::result::Result<String, String> {
        let preference = [Scope::Node(pod.node.clone()), Scope::Cluster];
        match self.options.pod_class(self.snapshot, pod) {
            PodClass::HostNetwork => {
                let name = management_port(&pod.node);
                index
                    .resolve(PortKind::SwitchPort, &name, &preference, ports)
                    .map(|i| ports[i].id.clone())
                    .ok_or_else(|| format!("management port {} not found", name))
            }
            PodClass::PodNetwork => {
                let name = pod.port_name();
                match index.resolve(PortKind::SwitchPort, &name, &preference, ports) {
                    Some(i) if is_pod_port(ports[i].port) => Ok(ports[i].id.clone()),
                    Some(_) => Err(format!("port {} is not a pod port", name)),
                    None => Err(format!("no logical switch port {}", name)),
                }
            }
            PodClass::Outside => Err(format!(
                "IP {} is outside the node and pod networks",
                pod.ip
            )),
        }
    }
}

/// Lookup of placed ports by kind and name
struct PortIndex {
    by_name: BTreeMap<(PortKind, String), Vec<usize>>,
}

impl PortIndex {
    fn new(ports: &[PlacedPort]) -> Self {
        let mut by_name: BTreeMap<(PortKind, String), Vec<usize>> = BTreeMap::new();
        for (i, placed) in ports.iter().enumerate() {
            by_name
                .entry((placed.port.kind, placed.port.name.clone()))
                .or_default()
                .push(i);
        }
        Self { by_name }
    }

    /// First placed port of that name in the first matching scope
    fn resolve(
        &self,
        kind: PortKind,
        name: &str,
        preference: &[Scope],
        ports: &[PlacedPort],
    ) -> Option<usize> {
        let candidates = self.by_name.get(&(kind, name.to_string()))?;
        preference.iter().find_map(|scope| {
            candidates
                .iter()
                .copied()
                .find(|&i| &ports[i].scope == scope)
        })
    }
}

/// Peer edges plus the flow edge between each port and its parent
fn link_ports(ports: &[PlacedPort], index: &PortIndex, edges: &mut BTreeSet<Edge>) {
    let mut partner: Vec<Option<usize>> = vec![None; ports.len()];
    for (i, placed) in ports.iter().enumerate() {
        let Some(peer) = placed.port.peer() else {
            continue;
        };
        let preference = [
            placed.scope.clone(),
            Scope::Node(placed.port.node.clone()),
            Scope::Cluster,
        ];
        match index.resolve(PortKind::RouterPort, peer, &preference, ports) {
            Some(j) => {
                partner[i] = Some(j);
                if partner[j].is_none() {
                    partner[j] = Some(i);
                }
            }
            None => debug!(node = %placed.port.node, "Peer {} of {} not found", peer, placed.port.name),
        }
    }

    for (i, placed) in ports.iter().enumerate() {
        let outward = match partner[i] {
            Some(j) => {
                edges.insert(Edge::peer(&placed.id, &ports[j].id));
                ports[j].parent_layer > placed.parent_layer
            }
            None => placed.port.port_type == PortType::Localnet,
        };
        if outward {
            edges.insert(Edge::flow(&placed.parent_id, &placed.id));
        } else {
            edges.insert(Edge::flow(&placed.id, &placed.parent_id));
        }
    }
}

fn partition_for<'p>(
    partitions: &'p mut [Partition],
    cluster: &'p mut Partition,
    scope: &Scope,
) -> &'p mut Partition {
    match scope {
        Scope::Cluster => cluster,
        Scope::Node(_) => match partitions.iter_mut().find(|p| &p.scope == scope) {
            Some(partition) => partition,
            None => cluster,
        },
    }
}

fn component_id(scope: &Scope, component: &LogicalComponent) -> String {
    let tag = match component.kind {
        ComponentKind::Switch => "ls",
        ComponentKind::Router => "lr",
    };
    format!("{}:{}:{}", scope.key(), tag, component.name)
}

fn port_id(scope: &Scope, port: &LogicalPort) -> String {
    let tag = match port.kind {
        PortKind::SwitchPort => "lsp",
        PortKind::RouterPort => "lrp",
    };
    format!("{}:{}:{}", scope.key(), tag, port.name)
}

fn join_nonempty<T: fmt::Display>(items: impl Iterator<Item = T>) -> Option<String> {
    let joined: Vec<String> = items.map(|item| item.to_string()).collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use topology_api::NodeRole;

    fn switch(node: &str, name: &str, ports: &[&str]) -> LogicalComponent {
        LogicalComponent {
            kind: ComponentKind::Switch,
            node: node.to_string(),
            identity: format!("{}-{}", node, name),
            name: name.to_string(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    fn router(node: &str, name: &str, ports: &[&str]) -> LogicalComponent {
        LogicalComponent {
            kind: ComponentKind::Router,
            ..switch(node, name, ports)
        }
    }

    fn lsp(node: &str, name: &str, port_type: PortType, router_port: Option<&str>) -> LogicalPort {
        let mut options = BTreeMap::new();
        if let Some(peer) = router_port {
            options.insert("router-port".to_string(), peer.to_string());
        }
        LogicalPort {
            kind: PortKind::SwitchPort,
            node: node.to_string(),
            name: name.to_string(),
            address: String::new(),
            port_type,
            options,
        }
    }

    fn lrp(node: &str, name: &str, address: &str) -> LogicalPort {
        LogicalPort {
            kind: PortKind::RouterPort,
            node: node.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            port_type: PortType::Normal,
            options: BTreeMap::new(),
        }
    }

    fn one_node() -> Snapshot {
        let node_ip: IpAddr = "172.18.0.2".parse().unwrap();
        let mut node_switch = switch("n1", "n1", &["k8s-n1", "stor-n1", "default_web"]);
        node_switch
            .attributes
            .insert("other_config:subnet".to_string(), "10.244.0.0/24".to_string());
        let mut snapshot = Snapshot {
            nodes: vec![Node::new("n1", Some(node_ip), NodeRole::Worker)],
            switches: vec![
                node_switch,
                switch("n1", "ext_n1", &["etor-GR_n1", "breth0_n1"]),
            ],
            routers: vec![
                router("n1", CLUSTER_ROUTER, &["rtos-n1"]),
                router("n1", "GR_n1", &["rtoe-GR_n1"]),
            ],
            switch_ports: vec![
                lsp("n1", "k8s-n1", PortType::Normal, None),
                lsp("n1", "stor-n1", PortType::Router, Some("rtos-n1")),
                lsp("n1", "default_web", PortType::Normal, None),
                lsp("n1", "etor-GR_n1", PortType::Router, Some("rtoe-GR_n1")),
                lsp("n1", "breth0_n1", PortType::Localnet, None),
            ],
            router_ports: vec![
                lrp("n1", "rtos-n1", "0a:58:0a:f4:00:01 10.244.0.1/24"),
                lrp("n1", "rtoe-GR_n1", "02:42:ac:12:00:02 172.18.0.2/16"),
            ],
            pods: vec![
                Pod {
                    namespace: "default".to_string(),
                    name: "web".to_string(),
                    ip: "10.244.0.5".parse().unwrap(),
                    node: "n1".to_string(),
                },
                Pod {
                    namespace: "kube-system".to_string(),
                    name: "kube-proxy".to_string(),
                    ip: node_ip,
                    node: "n1".to_string(),
                },
            ],
            node_status: BTreeMap::new(),
        };
        snapshot
            .node_status
            .insert("n1".to_string(), NodeStatus::Complete);
        snapshot
    }

    fn build(snapshot: &Snapshot) -> TopologyGraph {
        let placement = PlacementMap::classify(snapshot.components());
        let options = BuildOptions::default();
        TopologyGraphBuilder::new(snapshot, &placement, &options).build()
    }

    #[test]
    fn test_role_from_name() {
        let nodes: BTreeSet<&str> = ["worker-a"].into_iter().collect();
        assert_eq!(Role::of("worker-a", ComponentKind::Switch, &nodes), Role::NodeSwitch);
        assert_eq!(Role::of("join_worker-a", ComponentKind::Switch, &nodes), Role::JoinSwitch);
        assert_eq!(Role::of("blue_transit_switch", ComponentKind::Switch, &nodes), Role::TransitSwitch);
        assert_eq!(Role::of("GR_worker-a", ComponentKind::Router, &nodes), Role::GatewayRouter);
        assert_eq!(Role::of("ext_ext_worker-a", ComponentKind::Switch, &nodes), Role::ExternalSwitch);
        assert_eq!(Role::of("GR_worker-a", ComponentKind::Switch, &nodes), Role::Other);
    }

    #[test]
    fn test_pod_port_rules() {
        assert!(is_pod_port(&lsp("n", "default_web", PortType::Normal, None)));
        assert!(!is_pod_port(&lsp("n", "k8s-n", PortType::Normal, None)));
        assert!(!is_pod_port(&lsp("n", "breth0_n", PortType::Normal, None)));
        assert!(!is_pod_port(&lsp("n", "default_web", PortType::Localnet, None)));
    }

    #[test]
    fn test_layers_follow_packet_path() {
        let graph = build(&one_node());
        let layer = |id: &str| graph.layer_of(id).map(|(_, l)| l).unwrap();
        assert_eq!(layer("n1:pod:default/web"), Layer::Pods);
        assert_eq!(layer("n1:lsp:default_web"), Layer::PodPorts);
        assert_eq!(layer("n1:lsp:k8s-n1"), Layer::PodPorts);
        assert_eq!(layer("n1:ls:n1"), Layer::NodeSwitch);
        assert_eq!(layer("n1:lsp:stor-n1"), Layer::NodeSwitchPorts);
        assert_eq!(layer("n1:lr:ovn_cluster_router"), Layer::ClusterRouter);
        assert_eq!(layer("n1:lr:GR_n1"), Layer::GatewayRouter);
        assert_eq!(layer("n1:ext-net:GR_n1"), Layer::ExternalNetwork);
    }

    #[test]
    fn test_flow_edges_point_upward() {
        let graph = build(&one_node());
        assert!(graph.has_edge(&Edge::flow("n1:pod:default/web", "n1:lsp:default_web")));
        assert!(graph.has_edge(&Edge::flow("n1:lsp:default_web", "n1:ls:n1")));
        assert!(graph.has_edge(&Edge::flow("n1:ls:n1", "n1:lsp:stor-n1")));
        assert!(graph.has_edge(&Edge::flow("n1:lrp:rtos-n1", "n1:lr:ovn_cluster_router")));
        assert!(graph.has_edge(&Edge::peer("n1:lsp:stor-n1", "n1:lrp:rtos-n1")));
        assert!(graph.has_edge(&Edge::flow("n1:lr:GR_n1", "n1:lrp:rtoe-GR_n1")));
        assert!(graph.has_edge(&Edge::flow("n1:ls:ext_n1", "n1:lsp:breth0_n1")));
        assert!(graph.has_edge(&Edge::flow("n1:lsp:breth0_n1", "n1:ext-net:GR_n1")));
    }

    #[test]
    fn test_external_marker_uses_uplink_ip() {
        let graph = build(&one_node());
        let marker = graph.node("n1:ext-net:GR_n1").unwrap();
        assert_eq!(marker.label, "172.18.0.2");
        assert_eq!(marker.kind, GraphNodeKind::ExternalNetwork);
    }

    #[test]
    fn test_host_network_pod_uses_management_port() {
        let graph = build(&one_node());
        assert!(graph.has_edge(&Edge::flow("n1:pod:kube-system/kube-proxy", "n1:lsp:k8s-n1")));
        assert_eq!(graph.unmatched_pods(), 0);
    }

    #[test]
    fn test_pod_without_port_is_kept_and_flagged() {
        let mut snapshot = one_node();
        snapshot.pods.push(Pod {
            namespace: "default".to_string(),
            name: "ghost".to_string(),
            ip: "10.244.0.9".parse().unwrap(),
            node: "n1".to_string(),
        });
        let graph = build(&snapshot);
        let ghost = graph.node("n1:pod:default/ghost").unwrap();
        assert!(ghost.warning.as_deref().unwrap().contains("default_ghost"));
        assert_eq!(graph.unmatched_pods(), 1);
        assert!(!graph.edges.iter().any(|e| e.from == ghost.id));
    }

    #[test]
    fn test_pod_on_failed_node_is_unmatched() {
        let mut snapshot = one_node();
        snapshot.node_status.insert(
            "n1".to_string(),
            NodeStatus::Failed {
                error: "timed out".to_string(),
            },
        );
        let graph = build(&snapshot);
        assert_eq!(graph.unmatched_pods(), 2);
        assert!(graph
            .issues
            .iter()
            .any(|i| matches!(i, Issue::NodeDegraded { node, .. } if node == "n1")));
        assert_eq!(graph.partitions[0].title, "n1 [failed]");
    }

    #[test]
    fn test_missing_placement_is_an_issue() {
        let snapshot = one_node();
        let placement = PlacementMap::classify(snapshot.switches.iter());
        let options = BuildOptions::default();
        let graph = TopologyGraphBuilder::new(&snapshot, &placement, &options).build();
        assert!(graph.node("n1:lr:GR_n1").is_none());
        assert!(graph.issues.contains(&Issue::UnresolvedPlacement {
            component: "GR_n1".to_string()
        }));
    }

    #[test]
    fn test_cluster_wide_components_are_drawn_once() {
        let mut snapshot = one_node();
        snapshot.nodes.push(Node::new("n2", None, NodeRole::Worker));
        snapshot
            .node_status
            .insert("n2".to_string(), NodeStatus::Complete);
        for node in ["n1", "n2"] {
            let mut shared = router(node, "shared_router", &["rtox"]);
            shared.identity = "same".to_string();
            snapshot.routers.push(shared);
            snapshot.router_ports.push(lrp(node, "rtox", ""));
        }
        let graph = build(&snapshot);

        assert!(graph.node("@cluster:lr:shared_router").is_some());
        assert!(graph.node("n1:lr:shared_router").is_none());
        let cluster = graph.partitions.last().unwrap();
        assert_eq!(cluster.scope, Scope::Cluster);
        assert_eq!(cluster.nodes().filter(|n| n.label == "rtox").count(), 1);
    }
}

//! End-to-end pipeline tests over an in-memory interconnect cluster

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use topology_api::{
    ComponentKind, LogicalComponent, LogicalPort, Node, NodeRole, Pod, PortKind, PortType,
    RecordStore, Snapshot,
};
use topology_core::graph::{Edge, Scope};
use topology_core::{
    render_snapshot, BuildOptions, ClusterSource, CollectorConfig, DiagramFormat, NetworkMode,
    NodeRecords, Placement, Result, TopologyCollector, TopologyError,
};

struct FixtureCluster {
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    failing: BTreeSet<String>,
    /// Share identities across nodes, as a centralized NBDB would
    centralized: bool,
}

impl FixtureCluster {
    fn new(nodes: &[(&str, NodeRole)]) -> Self {
        let nodes = nodes
            .iter()
            .enumerate()
            .map(|(i, (name, role))| {
                let ip: IpAddr = format!("172.18.0.{}", i + 2).parse().unwrap();
                Node::new(*name, Some(ip), *role)
            })
            .collect();
        Self {
            nodes,
            pods: Vec::new(),
            failing: BTreeSet::new(),
            centralized: false,
        }
    }

    fn three_nodes() -> Self {
        Self::new(&[
            ("control-plane", NodeRole::ControlPlane),
            ("worker-a", NodeRole::Worker),
            ("worker-b", NodeRole::Worker),
        ])
    }

    fn node_index(&self, name: &str) -> usize {
        self.nodes.iter().position(|n| n.name == name).unwrap()
    }

    fn subnet(&self, name: &str) -> String {
        format!("10.244.{}.0/24", self.node_index(name))
    }

    fn with_pod(mut self, namespace: &str, name: &str, node: &str, host_network: bool) -> Self {
        let index = self.node_index(node);
        let ip = if host_network {
            self.nodes[index].ip.unwrap()
        } else {
            format!("10.244.{}.{}", index, self.pods.len() + 10)
                .parse()
                .unwrap()
        };
        self.pods.push(Pod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ip,
            node: node.to_string(),
        });
        self
    }

    fn failing(mut self, node: &str) -> Self {
        self.failing.insert(node.to_string());
        self
    }

    fn identity(&self, node: &str, name: &str) -> String {
        if self.centralized {
            format!("shared-{}", name)
        } else {
            format!("{}-{}", node, name)
        }
    }

    fn component(&self, kind: ComponentKind, node: &str, name: &str, ports: Vec<String>) -> LogicalComponent {
        LogicalComponent {
            kind,
            node: node.to_string(),
            identity: self.identity(node, name),
            name: name.to_string(),
            ports,
            attributes: BTreeMap::new(),
        }
    }

    /// What one node's NBDB holds in interconnect mode
    fn records_for(&self, node: &str) -> NodeRecords {
        let lsp = |name: String, port_type: PortType, router_port: Option<String>| {
            let mut options = BTreeMap::new();
            if let Some(peer) = router_port {
                options.insert("router-port".to_string(), peer);
            }
            LogicalPort {
                kind: PortKind::SwitchPort,
                node: node.to_string(),
                name,
                address: String::new(),
                port_type,
                options,
            }
        };
        let lrp = |name: String, address: String| LogicalPort {
            kind: PortKind::RouterPort,
            node: node.to_string(),
            name,
            address,
            port_type: PortType::Normal,
            options: BTreeMap::new(),
        };
        let index = self.node_index(node);
        let gr = format!("GR_{}", node);

        let mut records = NodeRecords::default();

        let mut node_ports = vec![format!("k8s-{}", node), format!("stor-{}", node)];
        records.switch_ports.push(lsp(format!("k8s-{}", node), PortType::Normal, None));
        records.switch_ports.push(lsp(
            format!("stor-{}", node),
            PortType::Router,
            Some(format!("rtos-{}", node)),
        ));
        for pod in self.pods.iter().filter(|p| p.node == node) {
            if Some(pod.ip) != self.nodes[index].ip {
                node_ports.push(pod.port_name());
                records
                    .switch_ports
                    .push(lsp(pod.port_name(), PortType::Normal, None));
            }
        }
        let mut node_switch = self.component(ComponentKind::Switch, node, node, node_ports);
        node_switch
            .attributes
            .insert("other_config:subnet".to_string(), self.subnet(node));
        records.switches.push(node_switch);

        records.switches.push(self.component(
            ComponentKind::Switch,
            node,
            "join",
            vec!["jtor-ovn_cluster_router".to_string(), format!("jtor-{}", gr)],
        ));
        records.switch_ports.push(lsp(
            "jtor-ovn_cluster_router".to_string(),
            PortType::Router,
            Some("rtoj-ovn_cluster_router".to_string()),
        ));
        records.switch_ports.push(lsp(
            format!("jtor-{}", gr),
            PortType::Router,
            Some(format!("rtoj-{}", gr)),
        ));

        let mut transit_ports = Vec::new();
        for other in &self.nodes {
            let name = format!("tstor-{}", other.name);
            transit_ports.push(name.clone());
            if other.name == node {
                records.switch_ports.push(lsp(
                    name,
                    PortType::Router,
                    Some(format!("rtots-{}", node)),
                ));
            } else {
                records
                    .switch_ports
                    .push(lsp(name, PortType::Other("remote".to_string()), None));
            }
        }
        records.switches.push(self.component(
            ComponentKind::Switch,
            node,
            "transit_switch",
            transit_ports,
        ));

        records.switches.push(self.component(
            ComponentKind::Switch,
            node,
            &format!("ext_{}", node),
            vec![format!("etor-{}", gr), format!("breth0_{}", node)],
        ));
        records.switch_ports.push(lsp(
            format!("etor-{}", gr),
            PortType::Router,
            Some(format!("rtoe-{}", gr)),
        ));
        records
            .switch_ports
            .push(lsp(format!("breth0_{}", node), PortType::Localnet, None));

        records.routers.push(self.component(
            ComponentKind::Router,
            node,
            "ovn_cluster_router",
            vec![
                format!("rtos-{}", node),
                "rtoj-ovn_cluster_router".to_string(),
                format!("rtots-{}", node),
            ],
        ));
        records.router_ports.push(lrp(
            format!("rtos-{}", node),
            format!("0a:58:0a:f4:0{}:01 10.244.{}.1/24", index, index),
        ));
        records.router_ports.push(lrp(
            "rtoj-ovn_cluster_router".to_string(),
            "0a:58:64:40:00:01 100.64.0.1/16".to_string(),
        ));
        records.router_ports.push(lrp(
            format!("rtots-{}", node),
            format!("0a:58:64:58:00:0{} 100.88.0.{}/16", index + 2, index + 2),
        ));

        records.routers.push(self.component(
            ComponentKind::Router,
            node,
            &gr,
            vec![format!("rtoj-{}", gr), format!("rtoe-{}", gr)],
        ));
        records.router_ports.push(lrp(
            format!("rtoj-{}", gr),
            format!("0a:58:64:40:00:0{} 100.64.0.{}/16", index + 2, index + 2),
        ));
        let external = self.nodes[index].ip.unwrap();
        records.router_ports.push(lrp(
            format!("rtoe-{}", gr),
            format!("02:42:ac:12:00:0{} {}/16", index + 2, external),
        ));

        records
    }
}

#[async_trait]
impl ClusterSource for FixtureCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods.clone())
    }

    async fn query_node(&self, node: &Node) -> Result<NodeRecords> {
        if self.failing.contains(&node.name) {
            return Err(TopologyError::Source(format!(
                "no NBDB container reachable on {}",
                node.name
            )));
        }
        Ok(self.records_for(&node.name))
    }
}

async fn collect(cluster: FixtureCluster) -> Snapshot {
    TopologyCollector::new(Arc::new(cluster), CollectorConfig::default())
        .collect()
        .await
        .unwrap()
}

fn partition_titles(snapshot: &Snapshot) -> Vec<String> {
    let output = render_snapshot(snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);
    output
        .graph
        .partitions
        .iter()
        .map(|p| p.title.clone())
        .collect()
}

#[tokio::test]
async fn test_interconnect_placement() {
    let snapshot = collect(FixtureCluster::three_nodes()).await;
    let output = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);

    let join = output.placement.get("join").unwrap();
    assert_eq!(join.effective, Placement::PerNode);
    assert_eq!(join.reporters.len(), 3);

    let transit = output.placement.get("transit_switch").unwrap();
    assert_eq!(transit.effective, Placement::ClusterWideVisual);
    assert_eq!(transit.structural, Placement::PerNode);
    assert_eq!(
        output.placement.require("ovn_cluster_router").unwrap(),
        Placement::PerNode
    );
    assert_eq!(output.placement.mode(), NetworkMode::Interconnect);

    // the transit switch is drawn exactly once, outside all nodes
    let transit_nodes: Vec<_> = output
        .graph
        .nodes()
        .filter(|n| n.label == "transit_switch")
        .collect();
    assert_eq!(transit_nodes.len(), 1);
    assert_eq!(transit_nodes[0].id, "@cluster:ls:transit_switch");
    assert_eq!(output.graph.partitions.len(), 4);
    assert_eq!(output.graph.partitions[3].scope, Scope::Cluster);
    assert!(output.diagram.contains("transit_switch: drawn cluster-wide-visual"));
}

#[tokio::test]
async fn test_transit_ports_link_to_each_node() {
    let snapshot = collect(FixtureCluster::three_nodes()).await;
    let output = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);
    for node in ["control-plane", "worker-a", "worker-b"] {
        let edge = Edge::peer(
            &format!("@cluster:lsp:tstor-{}", node),
            &format!("{}:lrp:rtots-{}", node, node),
        );
        assert!(output.graph.has_edge(&edge), "missing transit link for {}", node);
    }
}

#[tokio::test]
async fn test_one_node_is_all_per_node() {
    let cluster = FixtureCluster::new(&[("solo", NodeRole::ControlPlane)]);
    let snapshot = collect(cluster).await;
    let output = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);

    for record in output.placement.records() {
        assert_eq!(record.structural, Placement::PerNode, "{}", record.name);
    }
    assert_eq!(output.placement.mode(), NetworkMode::Undetermined);
}

#[tokio::test]
async fn test_centralized_components_are_cluster_wide() {
    let mut cluster = FixtureCluster::three_nodes();
    cluster.centralized = true;
    let snapshot = collect(cluster).await;
    let output = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);

    assert_eq!(output.placement.require("join").unwrap(), Placement::ClusterWide);
    assert_eq!(output.placement.mode(), NetworkMode::Centralized);
    assert!(output.graph.node("@cluster:ls:join").is_some());
}

#[tokio::test]
async fn test_node_order_control_plane_first() {
    let cluster = FixtureCluster::new(&[
        ("worker-b", NodeRole::Worker),
        ("control-plane", NodeRole::ControlPlane),
        ("worker-a", NodeRole::Worker),
    ]);
    let snapshot = collect(cluster).await;
    let titles = partition_titles(&snapshot);
    assert_eq!(
        &titles[..3],
        &["control-plane", "worker-a", "worker-b"].map(String::from)
    );
}

#[tokio::test]
async fn test_node_order_shared_prefixes() {
    let cluster = FixtureCluster::new(&[
        ("worker-2", NodeRole::Worker),
        ("worker-10", NodeRole::Worker),
        ("worker-1", NodeRole::Worker),
    ]);
    let snapshot = collect(cluster).await;
    let titles = partition_titles(&snapshot);
    assert_eq!(
        &titles[..3],
        &["worker-1", "worker-10", "worker-2"].map(String::from)
    );
}

#[tokio::test]
async fn test_pod_attachment() {
    let cluster = FixtureCluster::three_nodes()
        .with_pod("kube-system", "kube-proxy-abc", "worker-a", true)
        .with_pod("default", "web-1", "worker-a", false);
    let snapshot = collect(cluster).await;
    let output = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);

    assert!(output.graph.has_edge(&Edge::flow(
        "worker-a:pod:kube-system/kube-proxy-abc",
        "worker-a:lsp:k8s-worker-a"
    )));
    assert!(output.graph.has_edge(&Edge::flow(
        "worker-a:pod:default/web-1",
        "worker-a:lsp:default_web-1"
    )));
    assert_eq!(output.graph.unmatched_pods(), 0);
}

#[tokio::test]
async fn test_output_is_idempotent() {
    let build = || {
        FixtureCluster::three_nodes()
            .with_pod("default", "web-1", "worker-b", false)
            .with_pod("kube-system", "etcd", "control-plane", true)
    };
    for format in [DiagramFormat::Mermaid, DiagramFormat::Dot] {
        let first = render_snapshot(&collect(build()).await, &BuildOptions::default(), format);
        let second = render_snapshot(&collect(build()).await, &BuildOptions::default(), format);
        assert_eq!(first.diagram, second.diagram);
    }
}

#[tokio::test]
async fn test_partial_failure_renders_remaining_nodes() {
    let cluster = FixtureCluster::three_nodes()
        .with_pod("default", "web-1", "worker-b", false)
        .failing("worker-b");
    let snapshot = collect(cluster).await;
    assert!(snapshot.status("worker-b").unwrap().is_failed());

    let output = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);
    assert!(output.graph.node("control-plane:ls:join").is_some());
    assert!(output.graph.node("worker-a:ls:join").is_some());
    assert!(output.graph.node("worker-b:ls:join").is_none());
    assert_eq!(output.graph.partitions[2].title, "worker-b [failed]");
    assert_eq!(output.graph.unmatched_pods(), 1);
    assert!(output.diagram.contains("node data unavailable"));
}

#[tokio::test]
async fn test_all_nodes_failing_is_fatal() {
    let cluster = FixtureCluster::new(&[("a", NodeRole::Worker), ("b", NodeRole::Worker)])
        .failing("a")
        .failing("b");
    let err = TopologyCollector::new(Arc::new(cluster), CollectorConfig::default())
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("no NBDB container reachable on a"));
}

#[tokio::test]
async fn test_replay_from_records_matches_live_run() {
    let cluster = FixtureCluster::three_nodes().with_pod("default", "web-1", "worker-a", false);
    let snapshot = collect(cluster).await;
    let live = render_snapshot(&snapshot, &BuildOptions::default(), DiagramFormat::Mermaid);

    let dir = tempfile::tempdir().unwrap();
    RecordStore::from_snapshot(&snapshot).write_dir(dir.path()).unwrap();
    let replayed = RecordStore::read_dir(dir.path()).unwrap().to_snapshot().unwrap();
    let offline = render_snapshot(&replayed, &BuildOptions::default(), DiagramFormat::Mermaid);

    assert_eq!(live.diagram, offline.diagram);
}

//! Live `ClusterSource` backed by the Kubernetes API
//!
//! Nodes and pods come from the core API. NBDB state is read by exec-ing
//! `ovn-nbctl ... list <Table>` in the NBDB container of the OVN pod running
//! on each node, or in the central database pod when nodes carry no NBDB of
//! their own.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node as K8sNode, Pod as K8sPod};
use kube::api::{Api, AttachParams, ListParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use topology_api::{Node, NodeRole, Pod};
use topology_core::{ClusterSource, NodeRecords};

use crate::error::{KubeSourceError, Result};
use crate::nbdb::{decode_components, decode_ports, parse_table, NbTable, Row};

pub const DEFAULT_NBDB_CONTAINERS: &[&str] = &["nbdb", "nb-ovsdb"];

/// Name prefixes of pods hosting a cluster-wide NBDB
const CENTRAL_DB_PREFIXES: &[&str] = &["ovnkube-db", "ovnkube-master"];

#[derive(Clone, Debug)]
pub struct KubeSourceConfig {
    /// Namespace the OVN pods run in
    pub namespace: String,
    /// Container names that may host the NBDB, in preference order
    pub nbdb_containers: Vec<String>,
}

impl Default for KubeSourceConfig {
    fn default() -> Self {
        Self {
            namespace: "ovn-kubernetes".to_string(),
            nbdb_containers: DEFAULT_NBDB_CONTAINERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The parts of an OVN pod that matter for finding an NBDB
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OvnPod {
    pub name: String,
    pub node: Option<String>,
    pub running: bool,
    pub containers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecTarget {
    pub pod: String,
    pub container: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NbdbTargets {
    pub per_node: BTreeMap<String, ExecTarget>,
    pub central: Option<ExecTarget>,
}

impl NbdbTargets {
    /// The node's own NBDB, else the central one
    pub fn for_node(&self, node: &str) -> Option<&ExecTarget> {
        self.per_node.get(node).or(self.central.as_ref())
    }
}

/// Pick one NBDB container per node among running pods, plus the central
/// database pod if there is one. Pods are considered in name order.
pub fn resolve_targets(pods: &[OvnPod], containers: &[String]) -> NbdbTargets {
    let mut sorted: Vec<&OvnPod> = pods.iter().filter(|p| p.running).collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut targets = NbdbTargets::default();
    for pod in sorted {
        let Some(container) = containers.iter().find(|c| pod.containers.contains(c)) else {
            continue;
        };
        let target = ExecTarget {
            pod: pod.name.clone(),
            container: container.clone(),
        };
        if targets.central.is_none()
            && CENTRAL_DB_PREFIXES
                .iter()
                .any(|prefix| pod.name.starts_with(prefix))
        {
            targets.central = Some(target.clone());
        }
        if let Some(node) = &pod.node {
            targets.per_node.entry(node.clone()).or_insert(target);
        }
    }
    targets
}

pub fn ovn_pod_from_k8s(pod: &K8sPod) -> Option<OvnPod> {
    let spec = pod.spec.as_ref();
    Some(OvnPod {
        name: pod.metadata.name.clone()?,
        node: spec.and_then(|s| s.node_name.clone()),
        running: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            == Some("Running"),
        containers: spec
            .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default(),
    })
}

pub fn node_from_k8s(node: &K8sNode) -> Option<Node> {
    let name = node.metadata.name.clone()?;
    let labels = node.metadata.labels.clone().unwrap_or_default();
    let ip = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| addresses.iter().find(|a| a.type_ == "InternalIP"))
        .and_then(|a| a.address.parse().ok());
    let role = NodeRole::from_labels(&labels, &name);
    Some(Node::new(name, ip, role))
}

/// Pods without an IP or a node are not part of the diagram
pub fn pod_from_k8s(pod: &K8sPod) -> Option<Pod> {
    Some(Pod {
        namespace: pod.metadata.namespace.clone()?,
        name: pod.metadata.name.clone()?,
        ip: pod.status.as_ref()?.pod_ip.as_ref()?.parse().ok()?,
        node: pod.spec.as_ref()?.node_name.clone()?,
    })
}

pub struct KubeSource {
    client: Client,
    config: KubeSourceConfig,
    targets: OnceCell<NbdbTargets>,
}

impl KubeSource {
    pub fn new(client: Client, config: KubeSourceConfig) -> Self {
        Self {
            client,
            config,
            targets: OnceCell::new(),
        }
    }

    async fn targets(&self) -> Result<&NbdbTargets> {
        self.targets
            .get_or_try_init(|| async {
                let pods: Api<K8sPod> = Api::namespaced(self.client.clone(), &self.config.namespace);
                let list = pods.list(&ListParams::default()).await?;
                let ovn_pods: Vec<OvnPod> = list.items.iter().filter_map(ovn_pod_from_k8s).collect();
                let targets = resolve_targets(&ovn_pods, &self.config.nbdb_containers);
                info!(
                    namespace = %self.config.namespace,
                    nodes = targets.per_node.len(),
                    central = targets.central.is_some(),
                    "Resolved NBDB containers"
                );
                Ok::<_, KubeSourceError>(targets)
            })
            .await
    }

    async fn exec(&self, target: &ExecTarget, command: Vec<String>) -> Result<String> {
        let exec_error = |reason: String| KubeSourceError::Exec {
            pod: target.pod.clone(),
            container: target.container.clone(),
            reason,
        };

        let pods: Api<K8sPod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let params = AttachParams::default()
            .container(target.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut process = pods.exec(&target.pod, command, &params).await?;

        let stdout = process.stdout();
        let stderr = process.stderr();
        let status = process.take_status();
        let (stdout, stderr, status) = tokio::join!(read_all(stdout), read_all(stderr), async {
            match status {
                Some(status) => status.await,
                None => None,
            }
        });
        process
            .join()
            .await
            .map_err(|e| exec_error(e.to_string()))?;

        let stdout = stdout.map_err(|e| exec_error(e.to_string()))?;
        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                let stderr = stderr.unwrap_or_default();
                let reason = match stderr.trim() {
                    "" => status.message.unwrap_or_else(|| "command failed".to_string()),
                    text => text.to_string(),
                };
                return Err(exec_error(reason));
            }
        }
        Ok(stdout)
    }

    async fn query_table(&self, target: &ExecTarget, table: NbTable) -> Result<Vec<Row>> {
        let output = self.exec(target, table.command()).await?;
        parse_table(table, &output)
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut text = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut text).await?;
    }
    Ok(text)
}

#[async_trait]
impl ClusterSource for KubeSource {
    async fn list_nodes(&self) -> topology_core::Result<Vec<Node>> {
        let nodes: Api<K8sNode> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(KubeSourceError::from)?;
        let nodes: Vec<Node> = list.items.iter().filter_map(node_from_k8s).collect();
        debug!("Listed {} nodes", nodes.len());
        Ok(nodes)
    }

    async fn list_pods(&self) -> topology_core::Result<Vec<Pod>> {
        let pods: Api<K8sPod> = Api::all(self.client.clone());
        let params = ListParams::default().fields("status.phase=Running");
        let list = pods.list(&params).await.map_err(KubeSourceError::from)?;
        let pods: Vec<Pod> = list.items.iter().filter_map(pod_from_k8s).collect();
        debug!("Listed {} running pods with an IP", pods.len());
        Ok(pods)
    }

    async fn query_node(&self, node: &Node) -> topology_core::Result<NodeRecords> {
        let targets = self.targets().await?;
        let target = targets
            .for_node(&node.name)
            .ok_or_else(|| KubeSourceError::NoNbdbContainer {
                node: node.name.clone(),
                containers: self.config.nbdb_containers.join(", "),
            })?;
        debug!(node = %node.name, pod = %target.pod, container = %target.container, "Querying NBDB");

        let (switch_ports, router_ports, switches, routers) = tokio::join!(
            self.query_table(target, NbTable::LogicalSwitchPort),
            self.query_table(target, NbTable::LogicalRouterPort),
            self.query_table(target, NbTable::LogicalSwitch),
            self.query_table(target, NbTable::LogicalRouter),
        );

        let mut records = NodeRecords::default();
        let mut port_names = BTreeMap::new();
        for (table, rows) in [
            (NbTable::LogicalSwitchPort, switch_ports),
            (NbTable::LogicalRouterPort, router_ports),
        ] {
            match rows {
                Ok(rows) => {
                    let (ports, names) = decode_ports(table, &node.name, &rows);
                    match table {
                        NbTable::LogicalSwitchPort => records.switch_ports = ports,
                        _ => records.router_ports = ports,
                    }
                    port_names.insert(table, names);
                }
                Err(e) => records.failures.push((table.record_kind(), e.to_string())),
            }
        }

        let empty = BTreeMap::new();
        for (table, ports_table, rows) in [
            (NbTable::LogicalSwitch, NbTable::LogicalSwitchPort, switches),
            (NbTable::LogicalRouter, NbTable::LogicalRouterPort, routers),
        ] {
            match rows {
                Ok(rows) => {
                    let names = port_names.get(&ports_table).unwrap_or(&empty);
                    let components = decode_components(table, &node.name, &rows, names);
                    match table {
                        NbTable::LogicalSwitch => records.switches = components,
                        _ => records.routers = components,
                    }
                }
                Err(e) => records.failures.push((table.record_kind(), e.to_string())),
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ovn_pod(name: &str, node: &str, running: bool, containers: &[&str]) -> OvnPod {
        OvnPod {
            name: name.to_string(),
            node: Some(node.to_string()),
            running,
            containers: containers.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn containers() -> Vec<String> {
        KubeSourceConfig::default().nbdb_containers
    }

    #[test]
    fn test_interconnect_targets_per_node() {
        let pods = vec![
            ovn_pod("ovnkube-node-b2", "worker-b", true, &["ovnkube-controller", "nbdb", "sbdb"]),
            ovn_pod("ovnkube-node-a1", "worker-a", true, &["ovnkube-controller", "nbdb"]),
            ovn_pod("ovnkube-node-c3", "worker-c", false, &["nbdb"]),
            ovn_pod("ovs-node-x", "worker-a", true, &["ovs-daemons"]),
        ];
        let targets = resolve_targets(&pods, &containers());

        assert_eq!(targets.per_node.len(), 2);
        assert_eq!(targets.for_node("worker-a").unwrap().pod, "ovnkube-node-a1");
        assert_eq!(targets.for_node("worker-b").unwrap().container, "nbdb");
        assert!(targets.for_node("worker-c").is_none());
        assert!(targets.central.is_none());
    }

    #[test]
    fn test_centralized_falls_back_to_db_pod() {
        let pods = vec![
            ovn_pod("ovnkube-db-0", "control-plane", true, &["nb-ovsdb", "sb-ovsdb"]),
            ovn_pod("ovnkube-node-w1", "worker-1", true, &["ovnkube-node"]),
        ];
        let targets = resolve_targets(&pods, &containers());

        let central = targets.central.clone().unwrap();
        assert_eq!(central.container, "nb-ovsdb");
        assert_eq!(targets.for_node("worker-1"), Some(&central));
        assert_eq!(targets.for_node("control-plane"), Some(&central));
    }

    #[test]
    fn test_node_from_k8s() {
        let node: K8sNode = serde_json::from_value(json!({
            "metadata": {
                "name": "ovn-control-plane",
                "labels": {"node-role.kubernetes.io/control-plane": ""}
            },
            "status": {
                "addresses": [
                    {"type": "Hostname", "address": "ovn-control-plane"},
                    {"type": "InternalIP", "address": "172.18.0.2"}
                ]
            }
        }))
        .unwrap();
        let node = node_from_k8s(&node).unwrap();
        assert_eq!(node.role, NodeRole::ControlPlane);
        assert_eq!(node.ip, Some("172.18.0.2".parse().unwrap()));
    }

    #[test]
    fn test_pod_from_k8s_requires_ip_and_node() {
        let mut value = json!({
            "metadata": {"name": "web-1", "namespace": "default"},
            "spec": {"nodeName": "worker-a", "containers": [{"name": "web"}]},
            "status": {"phase": "Running", "podIP": "10.244.1.5"}
        });
        let pod: K8sPod = serde_json::from_value(value.clone()).unwrap();
        let converted = pod_from_k8s(&pod).unwrap();
        assert_eq!(converted.port_name(), "default_web-1");
        assert_eq!(converted.node, "worker-a");

        let ovn = ovn_pod_from_k8s(&pod).unwrap();
        assert!(ovn.running);
        assert_eq!(ovn.containers, vec!["web"]);

        value["status"] = json!({"phase": "Pending"});
        let pending: K8sPod = serde_json::from_value(value).unwrap();
        assert!(pod_from_k8s(&pending).is_none());
    }
}

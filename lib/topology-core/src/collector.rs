//! Concurrent per-node NBDB collection
//!
//! Each node is queried by its own task, bounded by a semaphore. Tasks send
//! their outcome over a channel and a single merge loop owns the snapshot
//! being assembled. Classification only starts after every task reported.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time;
use tracing::{debug, info, warn};
use topology_api::{Node, NodeStatus, Pod, Snapshot};

use crate::source::{ClusterSource, NodeRecords};
use crate::{Result, TopologyError};

/// Collector configuration
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Maximum number of nodes queried at once
    pub max_concurrency: usize,
    /// Timeout for one node's queries
    pub node_timeout: Duration,
    /// Timeout for the whole collection
    pub overall_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            node_timeout: Duration::from_secs(60),
            overall_timeout: Duration::from_secs(300),
        }
    }
}

type NodeOutcome = std::result::Result<NodeRecords, String>;

pub struct TopologyCollector {
    source: Arc<dyn ClusterSource>,
    config: CollectorConfig,
}

impl TopologyCollector {
    pub fn new(source: Arc<dyn ClusterSource>, config: CollectorConfig) -> Self {
        Self { source, config }
    }

    /// List nodes, then collect everything
    pub async fn collect(&self) -> Result<Snapshot> {
        let overall = self.config.overall_timeout;
        match time::timeout(overall, async {
            let nodes = self.source.list_nodes().await?;
            self.collect_inner(nodes).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TopologyError::CollectionTimeout(overall)),
        }
    }

    /// Collect for an already listed set of nodes
    pub async fn collect_nodes(&self, nodes: Vec<Node>) -> Result<Snapshot> {
        let overall = self.config.overall_timeout;
        match time::timeout(overall, self.collect_inner(nodes)).await {
            Ok(result) => result,
            Err(_) => Err(TopologyError::CollectionTimeout(overall)),
        }
    }

    async fn collect_inner(&self, nodes: Vec<Node>) -> Result<Snapshot> {
        if nodes.is_empty() {
            return Err(TopologyError::TotalCollectionFailure {
                failures: vec!["the cluster reported no nodes".to_string()],
            });
        }

        let pods = self.source.list_pods().await?;
        info!("Collecting NBDB state from {} nodes ({} pods)", nodes.len(), pods.len());

        let (tx, mut rx) = mpsc::channel::<(String, NodeOutcome)>(nodes.len());
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        for node in nodes.iter().cloned() {
            let tx = tx.clone();
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            let node_timeout = self.config.node_timeout;

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                debug!(node = %node.name, "Querying NBDB");
                let outcome = match time::timeout(node_timeout, source.query_node(&node)).await {
                    Ok(Ok(records)) => Ok(records),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", node_timeout)),
                };
                if tx.send((node.name.clone(), outcome)).await.is_err() {
                    debug!(node = %node.name, "Merge loop gone, dropping result");
                }
            });
        }
        drop(tx);

        let mut merge = SnapshotMerge::new(nodes, pods);
        while let Some((node, outcome)) = rx.recv().await {
            merge.absorb(node, outcome);
        }
        merge.finish()
    }
}

/// Single writer for the snapshot under construction
struct SnapshotMerge {
    snapshot: Snapshot,
}

impl SnapshotMerge {
    fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
        let snapshot = Snapshot {
            nodes,
            pods,
            ..Default::default()
        };
        Self { snapshot }
    }

    fn absorb(&mut self, node: String, outcome: NodeOutcome) {
        let status = match outcome {
            Ok(records) => {
                let status = records.status();
                let NodeRecords {
                    switches,
                    routers,
                    switch_ports,
                    router_ports,
                    ..
                } = records;
                debug!(
                    node = %node,
                    switches = switches.len(),
                    routers = routers.len(),
                    switch_ports = switch_ports.len(),
                    router_ports = router_ports.len(),
                    "Merged node records"
                );
                self.snapshot.switches.extend(switches);
                self.snapshot.routers.extend(routers);
                self.snapshot.switch_ports.extend(switch_ports);
                self.snapshot.router_ports.extend(router_ports);
                status
            }
            Err(error) => NodeStatus::Failed { error },
        };

        match &status {
            NodeStatus::Complete => {}
            NodeStatus::Partial { errors } => {
                warn!(node = %node, "Partial NBDB data: {}", errors.join("; "));
            }
            NodeStatus::Failed { error } => {
                let failure = TopologyError::NodeQueryFailed {
                    node: node.clone(),
                    reason: error.clone(),
                };
                warn!(node = %node, "{}", failure);
            }
        }
        self.snapshot.node_status.insert(node, status);
    }

    fn finish(mut self) -> Result<Snapshot> {
        let missing: Vec<String> = self
            .snapshot
            .nodes
            .iter()
            .filter(|n| !self.snapshot.node_status.contains_key(&n.name))
            .map(|n| n.name.clone())
            .collect();
        for node in missing {
            warn!(node = %node, "Query task ended without a result");
            self.snapshot.node_status.insert(
                node,
                NodeStatus::Failed {
                    error: "query task ended without a result".to_string(),
                },
            );
        }

        let statuses: &BTreeMap<String, NodeStatus> = &self.snapshot.node_status;
        if statuses.values().all(NodeStatus::is_failed) {
            let failures = statuses
                .iter()
                .map(|(node, status)| match status {
                    NodeStatus::Failed { error } => format!("{}: {}", node, error),
                    _ => node.clone(),
                })
                .collect();
            return Err(TopologyError::TotalCollectionFailure { failures });
        }

        let degraded = self.snapshot.degraded_nodes().len();
        if degraded > 0 {
            warn!(
                "{} of {} nodes returned incomplete data",
                degraded,
                self.snapshot.nodes.len()
            );
        }
        Ok(self.snapshot)
    }
}

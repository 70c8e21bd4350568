//! Seam between the pipeline and wherever cluster state comes from

use async_trait::async_trait;
use topology_api::{LogicalComponent, LogicalPort, Node, NodeStatus, Pod, RecordKind};

use crate::Result;

/// Read-only access to cluster state.
///
/// Implementations must never mutate the cluster.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// All running pods that have an IP and a node
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    /// Query one node's NBDB. Kinds that fail are reported in
    /// `NodeRecords::failures`; an `Err` means nothing could be read.
    async fn query_node(&self, node: &Node) -> Result<NodeRecords>;
}

/// Records from one node's NBDB
#[derive(Clone, Debug, Default)]
pub struct NodeRecords {
    pub switches: Vec<LogicalComponent>,
    pub routers: Vec<LogicalComponent>,
    pub switch_ports: Vec<LogicalPort>,
    pub router_ports: Vec<LogicalPort>,
    pub failures: Vec<(RecordKind, String)>,
}

/// Number of NBDB record kinds queried per node
pub const NODE_RECORD_KINDS: usize = 4;

impl NodeRecords {
    pub fn status(&self) -> NodeStatus {
        if self.failures.is_empty() {
            return NodeStatus::Complete;
        }
        let errors: Vec<String> = self
            .failures
            .iter()
            .map(|(kind, error)| format!("{}: {}", kind, error))
            .collect();
        if self.failures.len() >= NODE_RECORD_KINDS {
            NodeStatus::Failed {
                error: errors.join("; "),
            }
        } else {
            NodeStatus::Partial { errors }
        }
    }
}

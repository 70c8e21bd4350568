use std::time::Duration;

use thiserror::Error;
use topology_api::RecordError;

pub type Result<T> = std::result::Result<T, TopologyError>;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("{}", no_cluster_message(.searched, .failures))]
    NoClusterFound {
        searched: Vec<String>,
        failures: Vec<String>,
    },

    #[error("Context '{requested}' is not an OVN-Kubernetes cluster; candidates: {}", .available.join(", "))]
    ContextNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("Multiple OVN-Kubernetes clusters found, pass --context to pick one:\n  {}", .candidates.join("\n  "))]
    AmbiguousCluster { candidates: Vec<String> },

    #[error("Credentials allow write operations ({}); re-run with --yes to acknowledge", .capabilities.join(", "))]
    PermissionElevated { capabilities: Vec<String> },

    #[error("NBDB query failed on node {node}: {reason}")]
    NodeQueryFailed { node: String, reason: String },

    #[error("No node returned NBDB data:\n  {}", .failures.join("\n  "))]
    TotalCollectionFailure { failures: Vec<String> },

    #[error("Collection did not finish within {0:?}")]
    CollectionTimeout(Duration),

    #[error("No placement classification for component '{0}'")]
    UnresolvedPlacement(String),

    #[error("Pod {pod} is not connected: {reason}")]
    UnmatchedPod { pod: String, reason: String },

    #[error("Cluster source error: {0}")]
    Source(String),

    #[error("Record error: {0}")]
    Records(#[from] RecordError),
}

impl TopologyError {
    /// Process exit code for errors that end a run
    pub fn exit_code(&self) -> i32 {
        match self {
            TopologyError::NoClusterFound { .. } | TopologyError::ContextNotFound { .. } => 2,
            TopologyError::AmbiguousCluster { .. } => 3,
            TopologyError::TotalCollectionFailure { .. } | TopologyError::CollectionTimeout(_) => 4,
            TopologyError::PermissionElevated { .. } => 5,
            _ => 1,
        }
    }
}

fn no_cluster_message(searched: &[String], failures: &[String]) -> String {
    let mut message = String::from("No OVN-Kubernetes cluster found.\nSearched kubeconfig sources:");
    if searched.is_empty() {
        message.push_str("\n  (none found)");
    }
    for source in searched {
        message.push_str(&format!("\n  {}", source));
    }
    if !failures.is_empty() {
        message.push_str("\nContexts that could not be probed:");
        for failure in failures {
            message.push_str(&format!("\n  {}", failure));
        }
    }
    message.push_str(
        "\nHints:\n  set KUBECONFIG or pass --kubeconfig\n  check that the ovn-kubernetes or openshift-ovn-kubernetes namespace exists\n  check that the credentials can list nodes and get namespaces",
    );
    message
}

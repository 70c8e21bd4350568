use std::time::Duration;

use thiserror::Error;
use topology_core::TopologyError;

pub type Result<T> = std::result::Result<T, KubeSourceError>;

#[derive(Error, Debug)]
pub enum KubeSourceError {
    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::Error),

    #[error("Cannot load kubeconfig {path}: {reason}")]
    Kubeconfig { path: String, reason: String },

    #[error("No NBDB container ({containers}) found for node {node}")]
    NoNbdbContainer { node: String, containers: String },

    #[error("Exec in {pod}/{container} failed: {reason}")]
    Exec {
        pod: String,
        container: String,
        reason: String,
    },

    #[error("Malformed ovn-nbctl output for {table}: {reason}")]
    Decode { table: String, reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl From<KubeSourceError> for TopologyError {
    fn from(err: KubeSourceError) -> Self {
        TopologyError::Source(err.to_string())
    }
}

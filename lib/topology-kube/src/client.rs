//! Kubernetes client bound to one kubeconfig context

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::error::{KubeSourceError, Result};

/// ClusterClient wraps the Kubernetes client for a specific context
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Build a client for `context` in the kubeconfig at `path`
    pub async fn connect(path: &Path, context: &str) -> Result<Self> {
        let kubeconfig = read_kubeconfig(path)?;
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| KubeSourceError::Kubeconfig {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let client = Client::try_from(config)?;
        debug!(path = %path.display(), context, "Connected");

        Ok(Self { client })
    }

    /// Get a clone of the Kubernetes client
    pub fn clone_client(&self) -> Client {
        self.client.clone()
    }
}

pub fn read_kubeconfig(path: &Path) -> Result<Kubeconfig> {
    Kubeconfig::read_from(path).map_err(|e| KubeSourceError::Kubeconfig {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

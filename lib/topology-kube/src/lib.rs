//! Kubernetes access for topology collection
//!
//! Finds clusters running OVN-Kubernetes across kubeconfig sources, audits
//! the selected credentials for write access, and reads NBDB state from the
//! OVN pods through exec.
pub mod auditor;
pub mod client;
pub mod error;
pub mod locator;
pub mod nbdb;
pub mod source;

pub use auditor::{Capability, PermissionAuditor, PermissionReport};
pub use client::ClusterClient;
pub use error::{KubeSourceError, Result};
pub use locator::{ClusterCandidate, ClusterLocator, Location, LocatorConfig};
pub use source::{KubeSource, KubeSourceConfig};

//! Discovery of OVN-Kubernetes clusters across kubeconfig sources
//!
//! Every context of every readable kubeconfig is probed concurrently. A
//! context is a candidate when one of the OVN control-plane namespaces
//! exists. Probes only get a namespace and list node metadata.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{Api, ListParams};
use serde::Serialize;
use tokio::time;
use tracing::{debug, info};
use topology_core::TopologyError;

use crate::client::{read_kubeconfig, ClusterClient};
use crate::error::KubeSourceError;

pub const DEFAULT_NAMESPACES: &[&str] = &["ovn-kubernetes", "openshift-ovn-kubernetes"];
pub const SYSTEM_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

const KUBECONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "kubeconfig"];

/// Locator configuration
#[derive(Clone, Debug)]
pub struct LocatorConfig {
    /// Explicit kubeconfig paths; when set, nothing else is searched
    pub explicit: Vec<PathBuf>,
    /// Value of `KUBECONFIG`
    pub kubeconfig_env: Option<OsString>,
    pub home: Option<PathBuf>,
    pub system_paths: Vec<PathBuf>,
    /// OVN control-plane namespaces, in the order they are tried
    pub namespaces: Vec<String>,
    pub probe_timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            explicit: Vec::new(),
            kubeconfig_env: None,
            home: None,
            system_paths: vec![PathBuf::from(SYSTEM_KUBECONFIG)],
            namespaces: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl LocatorConfig {
    /// Default configuration with `KUBECONFIG` and the home directory
    /// taken from the environment
    pub fn from_env() -> Self {
        Self {
            kubeconfig_env: std::env::var_os("KUBECONFIG"),
            home: dirs::home_dir(),
            ..Default::default()
        }
    }

    /// Kubeconfig files to search, in priority order
    pub fn sources(&self) -> Sources {
        let mut considered = Vec::new();
        if !self.explicit.is_empty() {
            considered.extend(self.explicit.iter().cloned());
        } else {
            if let Some(env) = &self.kubeconfig_env {
                considered.extend(std::env::split_paths(env).filter(|p| !p.as_os_str().is_empty()));
            }
            if let Some(home) = &self.home {
                let kube_dir = home.join(".kube");
                considered.push(kube_dir.join("config"));
                considered.extend(extra_kubeconfigs(&kube_dir));
            }
            considered.extend(self.system_paths.iter().cloned());
        }

        let mut seen = BTreeSet::new();
        let mut sources = Sources::default();
        for path in considered {
            if !path.is_file() {
                sources.searched.push(format!("{} (not found)", path.display()));
                continue;
            }
            let canonical = fs::canonicalize(&path).unwrap_or(path);
            if seen.insert(canonical.clone()) {
                sources.searched.push(canonical.display().to_string());
                sources.readable.push(canonical);
            }
        }
        sources
    }
}

/// `*.yaml`, `*.yml` and `*.kubeconfig` files in `~/.kube`, sorted
fn extra_kubeconfigs(kube_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(kube_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| KUBECONFIG_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sources {
    /// Every location considered, for error messages
    pub searched: Vec<String>,
    /// Existing files, canonicalized and deduplicated
    pub readable: Vec<PathBuf>,
}

/// A context that reaches an OVN-Kubernetes cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClusterCandidate {
    pub path: PathBuf,
    pub context: String,
    pub cluster: String,
    pub namespace: String,
    pub node_count: usize,
}

impl fmt::Display for ClusterCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (cluster {}, {} nodes, namespace {}) in {}",
            self.context,
            self.cluster,
            self.node_count,
            self.namespace,
            self.path.display()
        )
    }
}

/// Outcome of a search
#[derive(Clone, Debug, Default)]
pub struct Location {
    pub candidates: Vec<ClusterCandidate>,
    pub searched: Vec<String>,
    /// `path:context: reason` for every context that did not qualify
    pub failures: Vec<String>,
}

pub struct ClusterLocator {
    config: LocatorConfig,
}

impl ClusterLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    pub async fn locate(&self) -> Location {
        let sources = self.config.sources();
        let mut failures = Vec::new();
        let mut probes = Vec::new();

        for path in &sources.readable {
            match read_kubeconfig(path) {
                Ok(kubeconfig) => {
                    for named in kubeconfig.contexts {
                        let cluster = named
                            .context
                            .as_ref()
                            .map(|c| c.cluster.clone())
                            .unwrap_or_default();
                        probes.push(self.probe(path.clone(), named.name, cluster));
                    }
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        debug!("Probing {} contexts", probes.len());
        let mut candidates = Vec::new();
        for result in join_all(probes).await {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(failure) => {
                    debug!("{}", failure);
                    failures.push(failure);
                }
            }
        }
        let candidates = dedupe_candidates(candidates);
        info!("Found {} OVN-Kubernetes contexts", candidates.len());

        Location {
            candidates,
            searched: sources.searched,
            failures,
        }
    }

    /// Locate, then pick exactly one candidate
    pub async fn select(&self, requested: Option<&str>) -> topology_core::Result<ClusterCandidate> {
        select_candidate(self.locate().await, requested)
    }

    async fn probe(
        &self,
        path: PathBuf,
        context: String,
        cluster: String,
    ) -> std::result::Result<ClusterCandidate, String> {
        let label = format!("{}:{}", path.display(), context);
        let lookup = async {
            let client = ClusterClient::connect(&path, &context).await?;
            let namespaces: Api<Namespace> = Api::all(client.clone_client());
            let mut found = None;
            for namespace in &self.config.namespaces {
                if namespaces.get_opt(namespace).await?.is_some() {
                    found = Some(namespace.clone());
                    break;
                }
            }
            let Some(namespace) = found else {
                return Ok(None);
            };
            let nodes: Api<Node> = Api::all(client.clone_client());
            let node_count = nodes.list_metadata(&ListParams::default()).await?.items.len();
            Ok::<_, KubeSourceError>(Some((namespace, node_count)))
        };

        match time::timeout(self.config.probe_timeout, lookup).await {
            Err(_) => Err(format!(
                "{}: {}",
                label,
                KubeSourceError::Timeout(self.config.probe_timeout)
            )),
            Ok(Err(e)) => Err(format!("{}: {}", label, e)),
            Ok(Ok(None)) => Err(format!(
                "{}: no OVN-Kubernetes namespace ({})",
                label,
                self.config.namespaces.join(", ")
            )),
            Ok(Ok(Some((namespace, node_count)))) => Ok(ClusterCandidate {
                path,
                context,
                cluster,
                namespace,
                node_count,
            }),
        }
    }
}

/// Sort by (path, context) and drop duplicates
pub fn dedupe_candidates(mut candidates: Vec<ClusterCandidate>) -> Vec<ClusterCandidate> {
    candidates.sort_by(|a, b| (&a.path, &a.context).cmp(&(&b.path, &b.context)));
    candidates.dedup_by(|a, b| a.path == b.path && a.context == b.context);
    candidates
}

pub fn select_candidate(
    location: Location,
    requested: Option<&str>,
) -> topology_core::Result<ClusterCandidate> {
    if location.candidates.is_empty() {
        return Err(TopologyError::NoClusterFound {
            searched: location.searched,
            failures: location.failures,
        });
    }

    let available: Vec<String> = location
        .candidates
        .iter()
        .map(|c| c.context.clone())
        .collect();
    let mut matching: Vec<ClusterCandidate> = match requested {
        Some(context) => location
            .candidates
            .into_iter()
            .filter(|c| c.context == context)
            .collect(),
        None => location.candidates,
    };

    match matching.len() {
        0 => Err(TopologyError::ContextNotFound {
            requested: requested.unwrap_or_default().to_string(),
            available,
        }),
        1 => Ok(matching.remove(0)),
        _ => Err(TopologyError::AmbiguousCluster {
            candidates: matching.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(path: &str, context: &str) -> ClusterCandidate {
        ClusterCandidate {
            path: PathBuf::from(path),
            context: context.to_string(),
            cluster: format!("{}-cluster", context),
            namespace: "ovn-kubernetes".to_string(),
            node_count: 3,
        }
    }

    fn location(candidates: Vec<ClusterCandidate>) -> Location {
        Location {
            candidates,
            searched: vec!["/home/u/.kube/config".to_string()],
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_sources_search_order() {
        let home = tempfile::tempdir().unwrap();
        let kube_dir = home.path().join(".kube");
        fs::create_dir(&kube_dir).unwrap();
        for name in ["config", "zeta.yaml", "alpha.kubeconfig", "notes.txt"] {
            fs::write(kube_dir.join(name), "apiVersion: v1\n").unwrap();
        }
        let other = tempfile::NamedTempFile::new().unwrap();

        let config = LocatorConfig {
            kubeconfig_env: Some(other.path().as_os_str().to_owned()),
            home: Some(home.path().to_path_buf()),
            system_paths: vec![home.path().join("missing.conf")],
            ..Default::default()
        };
        let sources = config.sources();
        let names: Vec<String> = sources
            .readable
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names.len(), 4);
        assert_eq!(sources.readable[0], fs::canonicalize(other.path()).unwrap());
        assert_eq!(&names[1..], &["config", "alpha.kubeconfig", "zeta.yaml"]);
        assert!(sources.searched.last().unwrap().ends_with("missing.conf (not found)"));
    }

    #[test]
    fn test_explicit_paths_replace_defaults() {
        let home = tempfile::tempdir().unwrap();
        let kube_dir = home.path().join(".kube");
        fs::create_dir(&kube_dir).unwrap();
        fs::write(kube_dir.join("config"), "apiVersion: v1\n").unwrap();
        let explicit = home.path().join("ovn.yaml");
        fs::write(&explicit, "apiVersion: v1\n").unwrap();

        let config = LocatorConfig {
            explicit: vec![explicit.clone(), explicit.clone()],
            home: Some(home.path().to_path_buf()),
            ..Default::default()
        };
        let sources = config.sources();
        assert_eq!(sources.readable, vec![fs::canonicalize(&explicit).unwrap()]);
    }

    #[test]
    fn test_single_candidate_is_selected() {
        let selected = select_candidate(location(vec![candidate("/k", "kind-ovn")]), None).unwrap();
        assert_eq!(selected.context, "kind-ovn");
    }

    #[test]
    fn test_multiple_candidates_are_ambiguous() {
        let err = select_candidate(
            location(vec![candidate("/k", "kind-ovn"), candidate("/k", "prod")]),
            None,
        )
        .unwrap_err();
        match err {
            TopologyError::AmbiguousCluster { candidates } => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].starts_with("kind-ovn (cluster kind-ovn-cluster"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_narrows_candidates() {
        let candidates = vec![candidate("/k", "kind-ovn"), candidate("/k", "prod")];
        let selected = select_candidate(location(candidates.clone()), Some("prod")).unwrap();
        assert_eq!(selected.context, "prod");

        let err = select_candidate(location(candidates), Some("staging")).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::ContextNotFound { ref available, .. } if available.len() == 2
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_no_candidates() {
        let mut empty = location(Vec::new());
        empty.failures.push("/k:kind-a: connection refused".to_string());
        let err = select_candidate(empty, Some("kind-a")).unwrap_err();
        assert!(matches!(err, TopologyError::NoClusterFound { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_dedupe_candidates() {
        let deduped = dedupe_candidates(vec![
            candidate("/b", "x"),
            candidate("/a", "x"),
            candidate("/b", "x"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].path, PathBuf::from("/a"));
    }
}

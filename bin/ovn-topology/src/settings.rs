//! Optional YAML settings file
//!
//! Every field has a default, so an absent file or a partial one is fine.
//! Command line flags override what is read here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use topology_core::{CollectorConfig, DiagramFormat};
use topology_kube::locator::DEFAULT_NAMESPACES;
use topology_kube::source::DEFAULT_NBDB_CONTAINERS;
use tracing::debug;

/// Default settings location: ~/.config/ovn-topology/config.yaml
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ovn-topology").join("config.yaml"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// OVN control-plane namespaces, in the order they are tried
    pub namespaces: Vec<String>,
    /// Container names that may host the NBDB
    pub nbdb_containers: Vec<String>,
    pub max_concurrency: usize,
    pub node_timeout_secs: u64,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub pod_cidrs: Vec<IpNetwork>,
    pub format: DiagramFormat,
}

impl Default for Settings {
    fn default() -> Self {
        let collector = CollectorConfig::default();
        Self {
            namespaces: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            nbdb_containers: DEFAULT_NBDB_CONTAINERS.iter().map(|s| s.to_string()).collect(),
            max_concurrency: collector.max_concurrency,
            node_timeout_secs: collector.node_timeout.as_secs(),
            timeout_secs: collector.overall_timeout.as_secs(),
            probe_timeout_secs: 10,
            pod_cidrs: Vec::new(),
            format: DiagramFormat::default(),
        }
    }
}

impl Settings {
    /// Load from an explicit path, which must exist, or from the default
    /// location when present
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_settings_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let settings = Self::parse(&text)
            .with_context(|| format!("Failed to parse settings {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

//! Record store keyed by `(node, kind)`
//!
//! The store is an export and replay format for a `Snapshot`. Pipeline
//! stages pass typed values to each other; the store only exists when a
//! snapshot is written out for debugging or read back for offline rendering.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::model::{ComponentKind, PortKind, Snapshot};
use crate::records::{self, RecordKind, Result};

const FILE_EXTENSION: &str = "records";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordStore {
    records: BTreeMap<(String, RecordKind), Vec<String>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: &str, kind: RecordKind, line: String) {
        self.records
            .entry((node.to_string(), kind))
            .or_default()
            .push(line);
    }

    pub fn lines(&self, node: &str, kind: RecordKind) -> &[String] {
        self.records
            .get(&(node.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode every entity of a snapshot
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut store = Self::new();
        for node in &snapshot.nodes {
            store.push(&node.name, RecordKind::Nodes, records::encode_node(node));
        }
        for switch in &snapshot.switches {
            store.push(&switch.node, RecordKind::Switches, records::encode_component(switch));
        }
        for router in &snapshot.routers {
            store.push(&router.node, RecordKind::Routers, records::encode_component(router));
        }
        for port in &snapshot.switch_ports {
            store.push(&port.node, RecordKind::SwitchPorts, records::encode_port(port));
        }
        for port in &snapshot.router_ports {
            store.push(&port.node, RecordKind::RouterPorts, records::encode_port(port));
        }
        for pod in &snapshot.pods {
            store.push(&pod.node, RecordKind::Pods, records::encode_pod(pod));
        }
        for (node, status) in &snapshot.node_status {
            for line in records::encode_status(node, status) {
                store.push(node, RecordKind::Status, line);
            }
        }
        store
    }

    /// Decode the store back into a snapshot
    pub fn to_snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        for ((node, kind), lines) in &self.records {
            match kind {
                RecordKind::Nodes => {
                    for line in lines {
                        snapshot.nodes.push(records::decode_node(line)?);
                    }
                }
                RecordKind::Switches => {
                    for line in lines {
                        snapshot
                            .switches
                            .push(records::decode_component(ComponentKind::Switch, line)?);
                    }
                }
                RecordKind::Routers => {
                    for line in lines {
                        snapshot
                            .routers
                            .push(records::decode_component(ComponentKind::Router, line)?);
                    }
                }
                RecordKind::SwitchPorts => {
                    for line in lines {
                        snapshot
                            .switch_ports
                            .push(records::decode_port(PortKind::SwitchPort, line)?);
                    }
                }
                RecordKind::RouterPorts => {
                    for line in lines {
                        snapshot
                            .router_ports
                            .push(records::decode_port(PortKind::RouterPort, line)?);
                    }
                }
                RecordKind::Pods => {
                    for line in lines {
                        snapshot.pods.push(records::decode_pod(line)?);
                    }
                }
                RecordKind::Status => {
                    if let Some((name, status)) =
                        records::decode_status(lines.iter().map(String::as_str))?
                    {
                        snapshot.node_status.insert(name, status);
                    } else {
                        debug!(node = %node, "Empty status record set");
                    }
                }
            }
        }
        Ok(snapshot)
    }

    /// Write `<dir>/<node>/<kind>.records`
    pub fn write_dir(&self, dir: &Path) -> Result<()> {
        for ((node, kind), lines) in &self.records {
            let node_dir = dir.join(node);
            fs::create_dir_all(&node_dir)?;
            let path = node_dir.join(format!("{}.{}", kind.file_stem(), FILE_EXTENSION));
            let mut content = lines.join("\n");
            content.push('\n');
            fs::write(&path, content)?;
        }
        debug!("Wrote {} records to {}", self.len(), dir.display());
        Ok(())
    }

    /// Read a directory previously produced by `write_dir`.
    /// Unknown files are ignored.
    pub fn read_dir(dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        let mut node_dirs: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        node_dirs.sort();

        for node_dir in node_dirs {
            let Some(node) = node_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for kind in RecordKind::ALL {
                let path = node_dir.join(format!("{}.{}", kind.file_stem(), FILE_EXTENSION));
                if !path.exists() {
                    continue;
                }
                let content = fs::read_to_string(&path)?;
                // Split on '\n' only; a trailing '\r' belongs to the record
                for line in content.split('\n').filter(|l| !l.is_empty()) {
                    store.push(node, kind, line.to_string());
                }
            }
        }
        debug!("Read {} records from {}", store.len(), dir.display());
        Ok(store)
    }
}

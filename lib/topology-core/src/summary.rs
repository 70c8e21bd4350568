//! Run summary
//!
//! Printed on stderr after every run, or as JSON with `--summary-json`.
//! The diagram digest makes runs and clusters easy to compare.

use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use topology_api::{LogicalComponent, LogicalPort, NodeStatus, PodClass, Snapshot};

use crate::pipeline::PipelineOutput;
use crate::placement::NetworkMode;
use crate::render::DiagramFormat;

/// Record count and distinct names for one kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub records: usize,
    pub names: usize,
}

impl Counts {
    fn of_components(components: &[LogicalComponent]) -> Self {
        let names: BTreeSet<&str> = components.iter().map(|c| c.name.as_str()).collect();
        Self {
            records: components.len(),
            names: names.len(),
        }
    }

    fn of_ports(ports: &[LogicalPort]) -> Self {
        let names: BTreeSet<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        Self {
            records: ports.len(),
            names: names.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PodCounts {
    pub total: usize,
    pub host_network: usize,
    pub pod_network: usize,
    /// Outside the node IP and every known pod CIDR
    pub outside: usize,
    pub unmatched: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DegradedNode {
    pub node: String,
    pub status: NodeStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub nodes: usize,
    pub switches: Counts,
    pub routers: Counts,
    pub switch_ports: Counts,
    pub router_ports: Counts,
    pub pods: PodCounts,
    pub mode: NetworkMode,
    pub degraded: Vec<DegradedNode>,
    pub issues: Vec<String>,
    pub notes: Vec<String>,
    pub format: DiagramFormat,
    pub diagram_sha256: String,
    pub collected_at: DateTime<Utc>,
}

pub fn diagram_digest(diagram: &str) -> String {
    hex::encode(Sha256::digest(diagram.as_bytes()))
}

impl RunSummary {
    pub fn new(
        snapshot: &Snapshot,
        output: &PipelineOutput,
        format: DiagramFormat,
        collected_at: DateTime<Utc>,
    ) -> Self {
        let mut pods = PodCounts {
            total: snapshot.pods.len(),
            unmatched: output.graph.unmatched_pods(),
            ..Default::default()
        };
        for pod in &snapshot.pods {
            match output.options.pod_class(snapshot, pod) {
                PodClass::HostNetwork => pods.host_network += 1,
                PodClass::PodNetwork => pods.pod_network += 1,
                PodClass::Outside => pods.outside += 1,
            }
        }

        Self {
            context: None,
            nodes: snapshot.nodes.len(),
            switches: Counts::of_components(&snapshot.switches),
            routers: Counts::of_components(&snapshot.routers),
            switch_ports: Counts::of_ports(&snapshot.switch_ports),
            router_ports: Counts::of_ports(&snapshot.router_ports),
            pods,
            mode: output.placement.mode(),
            degraded: snapshot
                .degraded_nodes()
                .into_iter()
                .map(|(node, status)| DegradedNode {
                    node: node.to_string(),
                    status: status.clone(),
                })
                .collect(),
            issues: output.graph.issues.iter().map(|i| i.to_string()).collect(),
            notes: output.graph.notes.clone(),
            format,
            diagram_sha256: diagram_digest(&output.diagram),
            collected_at,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Multi-line text for stderr
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "Topology summary")?;
        if let Some(context) = &self.context {
            writeln!(out, "  context:       {}", context)?;
        }
        writeln!(out, "  nodes:         {}", self.nodes)?;
        writeln!(out, "  mode:          {}", self.mode)?;
        for (label, counts) in [
            ("switches:", self.switches),
            ("routers:", self.routers),
            ("switch ports:", self.switch_ports),
            ("router ports:", self.router_ports),
        ] {
            writeln!(
                out,
                "  {:<14} {} records, {} names",
                label, counts.records, counts.names
            )?;
        }
        writeln!(
            out,
            "  pods:          {} ({} host-network, {} pod-network, {} outside, {} unmatched)",
            self.pods.total,
            self.pods.host_network,
            self.pods.pod_network,
            self.pods.outside,
            self.pods.unmatched
        )?;
        for degraded in &self.degraded {
            match &degraded.status {
                NodeStatus::Complete => {}
                NodeStatus::Partial { errors } => {
                    writeln!(out, "  partial node:  {} ({})", degraded.node, errors.join("; "))?
                }
                NodeStatus::Failed { error } => {
                    writeln!(out, "  failed node:   {} ({})", degraded.node, error)?
                }
            }
        }
        for issue in &self.issues {
            writeln!(out, "  issue:         {}", issue)?;
        }
        for note in &self.notes {
            writeln!(out, "  note:          {}", note)?;
        }
        writeln!(out, "  diagram:       {} sha256:{}", self.format, self.diagram_sha256)?;
        writeln!(out, "  collected at:  {}", self.collected_at.to_rfc3339())
    }
}

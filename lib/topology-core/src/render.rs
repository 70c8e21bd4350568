//! Deterministic diagram serialization
//!
//! Graph nodes get short ids (`n0`, `n1`, ...) in emission order: partitions
//! in graph order, layers bottom to top, nodes as sorted by the builder.
//! Edges are emitted in their sorted order, so identical graphs always yield
//! identical text.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::graph::{EdgeKind, GraphNode, GraphNodeKind, TopologyGraph};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFormat {
    #[default]
    Mermaid,
    Dot,
}

impl DiagramFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramFormat::Mermaid => "mermaid",
            DiagramFormat::Dot => "dot",
        }
    }
}

impl fmt::Display for DiagramFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagramFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mermaid" | "mmd" => Ok(DiagramFormat::Mermaid),
            "dot" | "graphviz" => Ok(DiagramFormat::Dot),
            other => Err(format!("unknown diagram format '{}' (expected mermaid or dot)", other)),
        }
    }
}

pub struct DiagramRenderer {
    format: DiagramFormat,
}

impl DiagramRenderer {
    pub fn new(format: DiagramFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> DiagramFormat {
        self.format
    }

    pub fn render(&self, graph: &TopologyGraph) -> String {
        let ids = short_ids(graph);
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = match self.format {
            DiagramFormat::Mermaid => write_mermaid(&mut out, graph, &ids),
            DiagramFormat::Dot => write_dot(&mut out, graph, &ids),
        };
        out
    }
}

fn short_ids(graph: &TopologyGraph) -> BTreeMap<&str, String> {
    graph
        .nodes()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), format!("n{}", i)))
        .collect()
}

fn mermaid_text(text: &str) -> String {
    text.replace('"', "#quot;")
}

fn mermaid_label(node: &GraphNode) -> String {
    let mut label = mermaid_text(&node.label);
    if let Some(detail) = &node.detail {
        label.push_str("<br/>");
        label.push_str(&mermaid_text(detail));
    }
    if let Some(warning) = &node.warning {
        label.push_str("<br/>unmatched: ");
        label.push_str(&mermaid_text(warning));
    }
    label
}

fn write_mermaid(
    out: &mut String,
    graph: &TopologyGraph,
    ids: &BTreeMap<&str, String>,
) -> fmt::Result {
    writeln!(out, "flowchart BT")?;
    for note in &graph.notes {
        writeln!(out, "    %% {}", note.replace('\n', " "))?;
    }

    let mut unmatched = Vec::new();
    for (index, partition) in graph.partitions.iter().enumerate() {
        writeln!(
            out,
            "    subgraph p{}[\"{}\"]",
            index,
            mermaid_text(&partition.title)
        )?;
        writeln!(out, "        direction BT")?;
        for node in partition.nodes() {
            let Some(id) = ids.get(node.id.as_str()) else {
                continue;
            };
            let label = mermaid_label(node);
            let shape = match node.kind {
                GraphNodeKind::Pod => format!("[\"{}\"]", label),
                GraphNodeKind::SwitchPort | GraphNodeKind::RouterPort => {
                    format!("([\"{}\"])", label)
                }
                GraphNodeKind::Switch => format!("[[\"{}\"]]", label),
                GraphNodeKind::Router => format!("{{{{\"{}\"}}}}", label),
                GraphNodeKind::ExternalNetwork => format!("((\"{}\"))", label),
            };
            writeln!(out, "        {}{}", id, shape)?;
            if node.warning.is_some() {
                unmatched.push(id.as_str());
            }
        }
        writeln!(out, "    end")?;
    }

    for edge in &graph.edges {
        let (Some(from), Some(to)) = (ids.get(edge.from.as_str()), ids.get(edge.to.as_str()))
        else {
            continue;
        };
        let arrow = match edge.kind {
            EdgeKind::Flow => "-->",
            EdgeKind::Peer => "-.-",
        };
        writeln!(out, "    {} {} {}", from, arrow, to)?;
    }

    if !unmatched.is_empty() {
        writeln!(out, "    classDef unmatched stroke:#d33,stroke-dasharray:5 5")?;
        writeln!(out, "    class {} unmatched", unmatched.join(","))?;
    }
    Ok(())
}

fn dot_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn write_dot(out: &mut String, graph: &TopologyGraph, ids: &BTreeMap<&str, String>) -> fmt::Result {
    writeln!(out, "digraph ovn_topology {{")?;
    writeln!(out, "    rankdir=BT;")?;
    writeln!(out, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    for note in &graph.notes {
        writeln!(out, "    // {}", note.replace('\n', " "))?;
    }

    for (index, partition) in graph.partitions.iter().enumerate() {
        writeln!(out, "    subgraph cluster_{} {{", index)?;
        writeln!(out, "        label=\"{}\";", dot_text(&partition.title))?;
        for node in partition.nodes() {
            let Some(id) = ids.get(node.id.as_str()) else {
                continue;
            };
            let mut label = dot_text(&node.label);
            if let Some(detail) = &node.detail {
                label.push_str("\\n");
                label.push_str(&dot_text(detail));
            }
            let shape = match node.kind {
                GraphNodeKind::Pod => "box",
                GraphNodeKind::SwitchPort | GraphNodeKind::RouterPort => "ellipse",
                GraphNodeKind::Switch => "box3d",
                GraphNodeKind::Router => "hexagon",
                GraphNodeKind::ExternalNetwork => "doublecircle",
            };
            match &node.warning {
                Some(warning) => writeln!(
                    out,
                    "        {} [label=\"{}\\nunmatched: {}\", shape={}, color=red, style=dashed];",
                    id,
                    label,
                    dot_text(warning),
                    shape
                )?,
                None => writeln!(out, "        {} [label=\"{}\", shape={}];", id, label, shape)?,
            }
        }
        writeln!(out, "    }}")?;
    }

    for edge in &graph.edges {
        let (Some(from), Some(to)) = (ids.get(edge.from.as_str()), ids.get(edge.to.as_str()))
        else {
            continue;
        };
        match edge.kind {
            EdgeKind::Flow => writeln!(out, "    {} -> {};", from, to)?,
            EdgeKind::Peer => writeln!(out, "    {} -> {} [dir=none, style=dashed];", from, to)?,
        }
    }
    writeln!(out, "}}")
}

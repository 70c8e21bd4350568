//! Topology reconstruction pipeline
//!
//! This library provides:
//! - TopologyCollector: concurrent per-node collection over a `ClusterSource`
//! - PlacementMap: per-node vs cluster-wide inference from identities
//! - TopologyGraphBuilder: layered graph following the packet path
//! - DiagramRenderer: deterministic Mermaid / DOT output
//! - RunSummary: human and JSON summaries of a run

pub mod collector;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod placement;
pub mod render;
pub mod source;
pub mod summary;

pub use collector::{CollectorConfig, TopologyCollector};
pub use error::{Result, TopologyError};
pub use graph::{BuildOptions, TopologyGraph, TopologyGraphBuilder};
pub use pipeline::{render_snapshot, PipelineOutput};
pub use placement::{NetworkMode, Placement, PlacementMap, PlacementRecord};
pub use render::{DiagramFormat, DiagramRenderer};
pub use source::{ClusterSource, NodeRecords};
pub use summary::RunSummary;

//! Snapshot to diagram, after collection

use topology_api::Snapshot;
use tracing::info;

use crate::graph::{BuildOptions, TopologyGraph, TopologyGraphBuilder};
use crate::placement::PlacementMap;
use crate::render::{DiagramFormat, DiagramRenderer};

/// Everything derived from one snapshot
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub placement: PlacementMap,
    /// Options the graph was built with
    pub options: BuildOptions,
    pub graph: TopologyGraph,
    pub diagram: String,
}

/// Classify, build and render. Pure: the same snapshot always yields the
/// same output.
pub fn render_snapshot(
    snapshot: &Snapshot,
    options: &BuildOptions,
    format: DiagramFormat,
) -> PipelineOutput {
    let placement = PlacementMap::classify(snapshot.components());
    info!(
        "Classified {} component names, mode {}",
        placement.len(),
        placement.mode()
    );

    let graph = TopologyGraphBuilder::new(snapshot, &placement, options).build();
    let diagram = DiagramRenderer::new(format).render(&graph);

    PipelineOutput {
        placement,
        options: options.clone(),
        graph,
        diagram,
    }
}

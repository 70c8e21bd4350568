//! OVN-Kubernetes topology data model and interchange records
//!
//! This library defines the typed view of collected control-plane state:
//! - Node, Pod: Kubernetes objects relevant to the diagram
//! - LogicalComponent: logical switches and routers from a node's NBDB
//! - LogicalPort: logical switch ports and logical router ports
//! - Snapshot: everything collected in one invocation
//!
//! It also owns the pipe-delimited interchange record format and the
//! `RecordStore` used for export and offline replay.

pub mod model;
pub mod records;
pub mod store;

pub use model::{
    ComponentKind, LogicalComponent, LogicalPort, Node, NodeRole, NodeStatus, Pod, PodClass,
    PortKind, PortType, Snapshot, sort_nodes,
};
pub use records::{RecordError, RecordKind};
pub use store::RecordStore;

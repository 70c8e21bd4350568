//! Command line for ovn-topology
//!
//! - `ovn-topology locate` - list contexts that reach an OVN-Kubernetes cluster
//! - `ovn-topology diagram` - collect NBDB state and print the layered diagram
//! - `ovn-topology placement` - collect NBDB state and print component placement

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use ipnetwork::IpNetwork;
use topology_core::DiagramFormat;

#[derive(Parser, Debug)]
#[command(name = "ovn-topology")]
#[command(about = "Reconstruct the OVN-Kubernetes logical topology as a layered diagram")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to settings file (default: ~/.config/ovn-topology/config.yaml)
    #[arg(long, global = true, env = "OVN_TOPOLOGY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List kubeconfig contexts that reach an OVN-Kubernetes cluster
    Locate(ClusterArgs),

    /// Collect NBDB state and print the layered diagram
    Diagram(DiagramArgs),

    /// Collect NBDB state and print where each component is drawn
    Placement(PlacementArgs),
}

/// Where to look for clusters
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Kubeconfig file to search instead of the default locations (repeatable)
    #[arg(long = "kubeconfig", value_name = "FILE")]
    pub kubeconfigs: Vec<PathBuf>,

    /// Context to use when more than one cluster is found
    #[arg(long, env = "OVN_TOPOLOGY_CONTEXT")]
    pub context: Option<String>,

    /// Per-context probe timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub probe_timeout: Option<u64>,
}

/// How to obtain a snapshot
#[derive(Args, Debug, Clone, Default)]
pub struct CollectArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Render from an exported record directory instead of a live cluster
    #[arg(long, value_name = "DIR", conflicts_with_all = ["kubeconfigs", "context"])]
    pub from_records: Option<PathBuf>,

    /// Write the collected records to a directory
    #[arg(long, value_name = "DIR")]
    pub export_records: Option<PathBuf>,

    /// Proceed even when the credentials allow cluster writes
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Maximum number of nodes queried at once
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Per-node query timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub node_timeout: Option<u64>,

    /// Overall collection timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Pod CIDR used to tell pod-network pods apart (repeatable)
    #[arg(long = "pod-cidr", value_name = "CIDR")]
    pub pod_cidrs: Vec<IpNetwork>,
}

#[derive(Args, Debug, Clone)]
pub struct DiagramArgs {
    #[command(flatten)]
    pub collect: CollectArgs,

    /// Diagram format: mermaid or dot
    #[arg(short, long)]
    pub format: Option<DiagramFormat>,

    /// Write the diagram to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub summary_json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlacementArgs {
    #[command(flatten)]
    pub collect: CollectArgs,

    /// Print placement records as JSON
    #[arg(long)]
    pub json: bool,
}

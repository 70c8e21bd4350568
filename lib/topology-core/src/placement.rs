//! Per-node vs cluster-wide placement inference
//!
//! Placement is inferred from identities alone: a component name whose
//! `_uuid` differs between reporting nodes lives in each node's own NBDB,
//! one whose `_uuid` is the same everywhere is a single shared row.
//!
//! The override table is applied afterwards. It only changes how a component
//! is drawn: `cluster-wide-visual` components are shown once outside all
//! nodes even though every node owns a copy. Consumers that need real
//! ownership must read `PlacementRecord::structural`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};
use topology_api::{ComponentKind, LogicalComponent};

use crate::{Result, TopologyError};

/// Bump whenever `OVERRIDE_TABLE` changes
pub const OVERRIDE_TABLE_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    PerNode,
    ClusterWide,
    ClusterWideVisual,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::PerNode => "per-node",
            Placement::ClusterWide => "cluster-wide",
            Placement::ClusterWideVisual => "cluster-wide-visual",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameMatch {
    Exact(&'static str),
    Suffix(&'static str),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Exact(exact) => name == *exact,
            NameMatch::Suffix(suffix) => name.ends_with(suffix),
        }
    }
}

/// One entry of the override table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverrideRule {
    pub id: &'static str,
    pub pattern: NameMatch,
    pub placement: Placement,
    pub note: &'static str,
}

pub const OVERRIDE_TABLE: &[OverrideRule] = &[
    OverrideRule {
        id: "transit-switch",
        pattern: NameMatch::Exact("transit_switch"),
        placement: Placement::ClusterWideVisual,
        note: "drawn once; each node holds its own transit_switch in interconnect mode",
    },
    OverrideRule {
        id: "network-transit-switch",
        pattern: NameMatch::Suffix("_transit_switch"),
        placement: Placement::ClusterWideVisual,
        note: "drawn once; each node holds its own copy in interconnect mode",
    },
];

pub fn override_for<'a>(name: &str, table: &'a [OverrideRule]) -> Option<&'a OverrideRule> {
    table.iter().find(|rule| rule.pattern.matches(name))
}

/// Structural placement from the identities reported for one name
pub fn structural_placement(reporters: usize, distinct_identities: usize) -> Placement {
    if reporters <= 1 || distinct_identities > 1 {
        Placement::PerNode
    } else {
        Placement::ClusterWide
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlacementRecord {
    pub name: String,
    pub kind: ComponentKind,
    /// What the identities say
    pub structural: Placement,
    /// What the diagram uses
    pub effective: Placement,
    /// Override rule that changed `effective`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Nodes that reported the name, sorted
    pub reporters: Vec<String>,
    pub distinct_identities: usize,
}

impl PlacementRecord {
    pub fn is_overridden(&self) -> bool {
        self.override_rule.is_some()
    }
}

/// Result of the cluster-wide deployment inference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    Interconnect,
    Centralized,
    Undetermined,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Interconnect => f.write_str("interconnect"),
            NetworkMode::Centralized => f.write_str("centralized"),
            NetworkMode::Undetermined => f.write_str("undetermined"),
        }
    }
}

/// Total mapping from observed component name to placement
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlacementMap {
    #[serde(rename = "override_table_version")]
    table_version: u32,
    records: BTreeMap<String, PlacementRecord>,
}

#[derive(Default)]
struct Observation<'a> {
    kind: Option<ComponentKind>,
    identities_by_node: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl PlacementMap {
    /// Classify with the built-in override table
    pub fn classify<'a>(components: impl IntoIterator<Item = &'a LogicalComponent>) -> Self {
        Self::classify_with(components, OVERRIDE_TABLE)
    }

    pub fn classify_with<'a>(
        components: impl IntoIterator<Item = &'a LogicalComponent>,
        overrides: &[OverrideRule],
    ) -> Self {
        let mut observations: BTreeMap<&str, Observation> = BTreeMap::new();
        for component in components {
            let observation = observations.entry(component.name.as_str()).or_default();
            match observation.kind {
                None => observation.kind = Some(component.kind),
                Some(kind) if kind != component.kind => {
                    warn!(
                        "Name {} is used by both a {} and a {}; classifying them together",
                        component.name, kind, component.kind
                    );
                }
                Some(_) => {}
            }
            let identities = observation
                .identities_by_node
                .entry(component.node.as_str())
                .or_default();
            identities.insert(component.identity.as_str());
            if identities.len() > 1 {
                warn!(
                    node = %component.node,
                    "Node reports {} rows named {}",
                    identities.len(),
                    component.name
                );
            }
        }

        let mut records = BTreeMap::new();
        for (name, observation) in observations {
            let reporters: Vec<String> = observation
                .identities_by_node
                .keys()
                .map(|n| n.to_string())
                .collect();
            let distinct: BTreeSet<&str> = observation
                .identities_by_node
                .values()
                .flatten()
                .copied()
                .collect();
            let structural = structural_placement(reporters.len(), distinct.len());
            let rule = override_for(name, overrides);
            let effective = rule.map(|r| r.placement).unwrap_or(structural);
            if let Some(rule) = rule {
                debug!(
                    "{} is {} by structure, {} by override {}",
                    name, structural, effective, rule.id
                );
            }

            records.insert(
                name.to_string(),
                PlacementRecord {
                    name: name.to_string(),
                    kind: observation.kind.unwrap_or(ComponentKind::Switch),
                    structural,
                    effective,
                    override_rule: rule.map(|r| r.id.to_string()),
                    note: rule.map(|r| r.note.to_string()),
                    reporters,
                    distinct_identities: distinct.len(),
                },
            );
        }

        Self {
            table_version: OVERRIDE_TABLE_VERSION,
            records,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PlacementRecord> {
        self.records.get(name)
    }

    /// Effective placement, failing when the name was never classified
    pub fn require(&self, name: &str) -> Result<Placement> {
        self.records
            .get(name)
            .map(|r| r.effective)
            .ok_or_else(|| TopologyError::UnresolvedPlacement(name.to_string()))
    }

    pub fn records(&self) -> impl Iterator<Item = &PlacementRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn table_version(&self) -> u32 {
        self.table_version
    }

    /// Interconnect when any name seen on two or more nodes has distinct
    /// identities, centralized when all such names share one identity
    pub fn mode(&self) -> NetworkMode {
        let shared: Vec<&PlacementRecord> = self
            .records
            .values()
            .filter(|r| r.reporters.len() >= 2)
            .collect();
        if shared.is_empty() {
            NetworkMode::Undetermined
        } else if shared.iter().any(|r| r.structural == Placement::PerNode) {
            NetworkMode::Interconnect
        } else {
            NetworkMode::Centralized
        }
    }
}

//! Write-permission audit for the selected context
//!
//! Uses SelfSubjectAccessReview, which asks the API server whether a verb
//! would be allowed without persisting anything. The audited verbs are never
//! invoked.

use std::fmt;

use futures::future::join_all;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use kube::Client;
use serde::Serialize;
use tracing::{debug, warn};
use topology_core::TopologyError;

pub const WRITE_VERBS: &[&str] = &["create", "delete", "patch"];

/// (API group, resource) pairs representative of cluster mutation
pub const AUDITED_RESOURCES: &[(&str, &str)] = &[
    ("", "pods"),
    ("", "nodes"),
    ("", "namespaces"),
    ("", "services"),
    ("", "configmaps"),
    ("apps", "deployments"),
];

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Capability {
    pub verb: String,
    pub group: String,
    pub resource: String,
}

impl Capability {
    pub fn new(verb: &str, group: &str, resource: &str) -> Self {
        Self {
            verb: verb.to_string(),
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Every verb/resource pair the auditor asks about
    pub fn audited() -> Vec<Self> {
        AUDITED_RESOURCES
            .iter()
            .flat_map(|(group, resource)| {
                WRITE_VERBS
                    .iter()
                    .map(move |verb| Capability::new(verb, group, resource))
            })
            .collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{} {}", self.verb, self.resource)
        } else {
            write!(f, "{} {}.{}", self.verb, self.resource, self.group)
        }
    }
}

/// Write capabilities held by the current credentials
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PermissionReport {
    pub context: String,
    pub capabilities: Vec<Capability>,
    /// Checks the API server could not answer
    pub unevaluated: Vec<String>,
}

impl PermissionReport {
    /// Classify access decisions. Unanswered checks count as denied.
    pub fn from_decisions(
        context: &str,
        decisions: impl IntoIterator<Item = (Capability, std::result::Result<bool, String>)>,
    ) -> Self {
        let mut report = Self {
            context: context.to_string(),
            ..Default::default()
        };
        for (capability, decision) in decisions {
            match decision {
                Ok(true) => report.capabilities.push(capability),
                Ok(false) => {}
                Err(e) => report.unevaluated.push(format!("{}: {}", capability, e)),
            }
        }
        report.capabilities.sort();
        report
    }

    pub fn is_read_only(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Allow collection unless write access is held and not acknowledged
    pub fn gate(&self, acknowledged: bool) -> topology_core::Result<()> {
        if self.is_read_only() || acknowledged {
            return Ok(());
        }
        Err(TopologyError::PermissionElevated {
            capabilities: self.capabilities.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn render_text(&self) -> String {
        let mut text = format!(
            "Credentials for context '{}' allow write operations:",
            self.context
        );
        for capability in &self.capabilities {
            text.push_str(&format!("\n  {}", capability));
        }
        text.push_str("\nThis tool only reads cluster state; nothing will be modified.");
        text
    }
}

pub struct PermissionAuditor {
    client: Client,
}

impl PermissionAuditor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn audit(&self, context: &str) -> PermissionReport {
        let checks = Capability::audited()
            .into_iter()
            .map(|capability| async move {
                let decision = self.allowed(&capability).await;
                (capability, decision)
            });
        let report = PermissionReport::from_decisions(context, join_all(checks).await);

        for check in &report.unevaluated {
            warn!("Permission check could not be evaluated, assuming denied: {}", check);
        }
        debug!(
            context,
            writable = report.capabilities.len(),
            "Permission audit finished"
        );
        report
    }

    async fn allowed(&self, capability: &Capability) -> std::result::Result<bool, String> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some(capability.verb.clone()),
                    group: Some(capability.group.clone()),
                    resource: Some(capability.resource.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let reviews: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = reviews
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status.map(|s| s.allowed).unwrap_or(false))
    }
}

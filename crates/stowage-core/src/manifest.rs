//! Manifest tracking primitives
//!
//! A manifest-kind component renders into a set of concrete objects. Only a
//! minimal identity record is kept for each of them, enough to find the
//! object again when it has to be updated or deleted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of one concrete object produced by rendering a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackedObject {
    /// Full API version (e.g. "apps/v1", "v1")
    pub api_version: String,

    /// Object kind
    pub kind: String,

    /// Object name
    pub name: String,

    /// Namespace (None for cluster-scoped objects)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// API group ("" for the core group)
    #[serde(default)]
    pub group: String,
}

impl TrackedObject {
    /// Create a tracked object, deriving the group from the API version
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: Option<String>,
    ) -> Self {
        let api_version = api_version.into();
        let group = api_version
            .rsplit_once('/')
            .map(|(group, _)| group.to_string())
            .unwrap_or_default();
        Self {
            api_version,
            kind: kind.into(),
            name: name.into(),
            namespace,
            group,
        }
    }

    /// Same object, regardless of the API version it was rendered with
    pub fn same_identity(&self, other: &TrackedObject) -> bool {
        self.group == other.group
            && self.kind == other.kind
            && self.name == other.name
            && self.namespace == other.namespace
    }

    /// Get display name for logging
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.kind, self.name),
            None => format!("{}/{}", self.kind, self.name),
        }
    }
}

impl std::fmt::Display for TrackedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// What to do when a manifest component stays unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum FailurePolicy {
    /// Remove and re-apply once the timeout has elapsed
    Retry,
    /// Leave the component as it is
    #[default]
    Ignore,
}

/// Content-addressed fingerprint of a rendered manifest (hex SHA-256)
pub fn fingerprint(rendered: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rendered);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_derived_from_api_version() {
        let deploy = TrackedObject::new("apps/v1", "Deployment", "web", Some("default".into()));
        assert_eq!(deploy.group, "apps");

        let cm = TrackedObject::new("v1", "ConfigMap", "cfg", Some("default".into()));
        assert_eq!(cm.group, "");

        let crd = TrackedObject::new(
            "apiextensions.k8s.io/v1",
            "CustomResourceDefinition",
            "things.example.com",
            None,
        );
        assert_eq!(crd.group, "apiextensions.k8s.io");
    }

    #[test]
    fn test_same_identity_ignores_version() {
        let a = TrackedObject::new("policy/v1beta1", "PodDisruptionBudget", "pdb", Some("ns".into()));
        let b = TrackedObject::new("policy/v1", "PodDisruptionBudget", "pdb", Some("ns".into()));
        assert!(a.same_identity(&b));

        let other_ns = TrackedObject::new("policy/v1", "PodDisruptionBudget", "pdb", Some("other".into()));
        assert!(!a.same_identity(&other_ns));
    }

    #[test]
    fn test_display_name() {
        let ns = TrackedObject::new("v1", "Namespace", "addons", None);
        assert_eq!(ns.display_name(), "Namespace/addons");

        let svc = TrackedObject::new("v1", "Service", "web", Some("addons".into()));
        assert_eq!(svc.to_string(), "addons/Service/web");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(b"kind: ConfigMap\n");
        let b = fingerprint(b"kind: ConfigMap\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint(b"kind: Secret\n"));
    }

    #[test]
    fn test_failure_policy_default() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::Ignore);
        let parsed: FailurePolicy = serde_json::from_str("\"Retry\"").unwrap();
        assert_eq!(parsed, FailurePolicy::Retry);
    }
}

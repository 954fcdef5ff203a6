use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stowage_core::ComponentStatus;

use super::{HelmAddonSpec, IssuerConfig, ManifestAddonSpec};

/// Top-level declaration of the components a cluster should carry
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stowage.io",
    version = "v1alpha1",
    kind = "AddonSet",
    namespaced,
    status = "AddonSetStatus",
    shortname = "addons",
    printcolumn = r#"{"name":"Components","type":"integer","jsonPath":".status.components"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AddonSetSpec {
    /// Chart-based releases
    #[serde(default)]
    pub helm: Vec<ComponentSpec<HelmAddonSpec>>,

    /// Raw manifest bundles
    #[serde(default)]
    pub manifests: Vec<ComponentSpec<ManifestAddonSpec>>,

    /// Certificate issuers
    #[serde(default)]
    pub issuers: Vec<ComponentSpec<IssuerConfig>>,
}

impl AddonSetSpec {
    /// Number of declared components across all kinds
    pub fn component_count(&self) -> usize {
        self.helm.len() + self.manifests.len() + self.issuers.len()
    }
}

/// Desired state of one managed unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec<P> {
    /// Component name, unique per kind
    pub name: String,

    /// Target namespace (defaults to the composite's namespace)
    #[serde(default)]
    pub namespace: String,

    /// Whether the component produces cluster-scoped objects
    #[serde(default)]
    pub cluster_scoped: bool,

    /// Kind-specific payload
    pub spec: P,
}

impl<P> ComponentSpec<P> {
    pub fn new(name: impl Into<String>, spec: P) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            cluster_scoped: false,
            spec,
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn cluster_scoped(mut self) -> Self {
        self.cluster_scoped = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonSetStatus {
    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Number of components materialized
    #[serde(default)]
    pub components: usize,

    /// Reconcile outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ComponentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let yaml = r#"
manifests:
  - name: metrics-server
    spec:
      url: https://example.com/metrics-server.yaml
issuers:
  - name: selfsigned
    clusterScoped: true
    spec:
      issuer:
        selfSigned: {}
"#;
        let spec: AddonSetSpec = serde_yaml::from_str(yaml).unwrap();
        assert!(spec.helm.is_empty());
        assert_eq!(spec.manifests[0].namespace, "");
        assert!(!spec.manifests[0].cluster_scoped);
        assert!(spec.issuers[0].cluster_scoped);
        assert_eq!(spec.component_count(), 2);
    }
}

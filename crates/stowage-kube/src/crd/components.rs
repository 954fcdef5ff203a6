//! Materialized component resources

use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use stowage_core::{ComponentStatus, FailurePolicy, ImageSubstitution, Patch};

/// A chart-based release
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stowage.io",
    version = "v1alpha1",
    kind = "HelmAddon",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Chart","type":"string","jsonPath":".spec.chart"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HelmAddonSpec {
    /// Chart name in the repository
    pub chart: String,

    /// Repository URL (`https://` or `oci://`)
    pub repository: String,

    /// Chart version (latest when empty)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Inline value overrides
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    #[schemars(schema_with = "stowage_core::schema::preserve_unknown_fields")]
    pub values: JsonValue,

    /// Namespace the chart installs into (defaults to the component namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Repository polling interval
    #[serde(default = "default_interval", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub interval: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(600)
}

/// A raw manifest bundle fetched from a URL
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stowage.io",
    version = "v1alpha1",
    kind = "ManifestAddon",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".spec.url"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAddonSpec {
    /// Manifest source (`https://`, `http://` or `file://`)
    pub url: String,

    /// Merge patches applied to the fetched documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// Image rewrites applied after patching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSubstitution>,

    /// What to do when the component stays unhealthy
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How long an unhealthy component is left alone before a retry
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,
}

impl ManifestAddonSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            patches: Vec::new(),
            images: Vec::new(),
            failure_policy: FailurePolicy::default(),
            timeout: None,
        }
    }
}

/// Issuer payload as declared on the composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IssuerConfig {
    /// cert-manager issuer spec (`acme`, `ca`, `selfSigned`, ...)
    #[schemars(schema_with = "stowage_core::schema::preserve_unknown_fields")]
    pub issuer: JsonValue,
}

/// A cert-manager Issuer or ClusterIssuer
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stowage.io",
    version = "v1alpha1",
    kind = "IssuerAddon",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Cluster","type":"boolean","jsonPath":".spec.clusterScoped"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerAddonSpec {
    /// Produce a ClusterIssuer instead of an Issuer
    #[serde(default)]
    pub cluster_scoped: bool,

    #[schemars(schema_with = "stowage_core::schema::preserve_unknown_fields")]
    pub issuer: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helm_interval_default() {
        let spec: HelmAddonSpec = serde_json::from_value(serde_json::json!({
            "chart": "cert-manager",
            "repository": "https://charts.jetstack.io",
        }))
        .unwrap();
        assert_eq!(spec.interval, Duration::from_secs(600));
        assert!(spec.values.is_null());

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["interval"], "10m");
        assert!(json.get("values").is_none());
    }

    #[test]
    fn test_manifest_timeout_parsing() {
        let spec: ManifestAddonSpec = serde_yaml::from_str(
            "url: https://example.com/x.yaml\nfailurePolicy: Retry\ntimeout: 5m\n",
        )
        .unwrap();
        assert_eq!(spec.failure_policy, FailurePolicy::Retry);
        assert_eq!(spec.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_manifest_defaults() {
        let spec: ManifestAddonSpec = serde_yaml::from_str("url: file:///tmp/x.yaml\n").unwrap();
        assert_eq!(spec, ManifestAddonSpec::new("file:///tmp/x.yaml"));
    }
}

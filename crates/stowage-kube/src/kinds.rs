//! Per-kind handling of rendered objects
//!
//! One table answers every kind-specific question the manifest pipeline asks:
//! whether the kind is namespaced and whether its health is observable.
//! Kinds missing from the table are namespaced iff the document declares a
//! namespace.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::Value as JsonValue;
use stowage_core::TrackedObject;

use crate::error::{KubeError, Result};
use crate::store::{ObjectKey, dynamic_from_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Workload classes whose health the aggregator inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Deployment,
    DaemonSet,
}

/// Handling of one known kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindHandler {
    pub group: &'static str,
    pub kind: &'static str,
    pub scope: Scope,
    pub workload: Option<Workload>,
}

const fn namespaced(group: &'static str, kind: &'static str) -> KindHandler {
    KindHandler {
        group,
        kind,
        scope: Scope::Namespaced,
        workload: None,
    }
}

const fn cluster(group: &'static str, kind: &'static str) -> KindHandler {
    KindHandler {
        group,
        kind,
        scope: Scope::Cluster,
        workload: None,
    }
}

const fn workload(kind: &'static str, workload: Workload) -> KindHandler {
    KindHandler {
        group: "apps",
        kind,
        scope: Scope::Namespaced,
        workload: Some(workload),
    }
}

static HANDLERS: &[KindHandler] = &[
    // Cluster-scoped
    cluster("", "Namespace"),
    cluster("", "PersistentVolume"),
    cluster("apiextensions.k8s.io", "CustomResourceDefinition"),
    cluster("apiregistration.k8s.io", "APIService"),
    cluster("rbac.authorization.k8s.io", "ClusterRole"),
    cluster("rbac.authorization.k8s.io", "ClusterRoleBinding"),
    cluster("admissionregistration.k8s.io", "MutatingWebhookConfiguration"),
    cluster("admissionregistration.k8s.io", "ValidatingWebhookConfiguration"),
    cluster("scheduling.k8s.io", "PriorityClass"),
    cluster("storage.k8s.io", "StorageClass"),
    cluster("storage.k8s.io", "CSIDriver"),
    cluster("networking.k8s.io", "IngressClass"),
    cluster("cert-manager.io", "ClusterIssuer"),
    // Workloads
    workload("Deployment", Workload::Deployment),
    workload("DaemonSet", Workload::DaemonSet),
    namespaced("apps", "StatefulSet"),
    namespaced("batch", "Job"),
    namespaced("batch", "CronJob"),
    // Namespaced
    namespaced("", "ConfigMap"),
    namespaced("", "Secret"),
    namespaced("", "Service"),
    namespaced("", "ServiceAccount"),
    namespaced("", "PersistentVolumeClaim"),
    namespaced("rbac.authorization.k8s.io", "Role"),
    namespaced("rbac.authorization.k8s.io", "RoleBinding"),
    namespaced("networking.k8s.io", "Ingress"),
    namespaced("networking.k8s.io", "NetworkPolicy"),
    namespaced("policy", "PodDisruptionBudget"),
    namespaced("autoscaling", "HorizontalPodAutoscaler"),
    namespaced("coordination.k8s.io", "Lease"),
    namespaced("cert-manager.io", "Issuer"),
    namespaced("cert-manager.io", "Certificate"),
];

/// Look up the handler of a known kind
pub fn handler_for(group: &str, kind: &str) -> Option<&'static KindHandler> {
    HANDLERS.iter().find(|h| h.group == group && h.kind == kind)
}

/// Scope of a kind, falling back to whether the document declares a namespace
pub fn scope_of(group: &str, kind: &str, declared_namespace: Option<&str>) -> Scope {
    match handler_for(group, kind) {
        Some(handler) => handler.scope,
        None if declared_namespace.is_some_and(|ns| !ns.is_empty()) => Scope::Namespaced,
        None => Scope::Cluster,
    }
}

/// Workload class of a tracked object, if its health is observable
pub fn workload_of(obj: &TrackedObject) -> Option<Workload> {
    handler_for(&obj.group, &obj.kind).and_then(|h| h.workload)
}

/// A rendered document ready to be written
#[derive(Debug, Clone)]
pub struct PreparedObject {
    pub object: DynamicObject,
    pub key: ObjectKey,
}

impl PreparedObject {
    pub fn tracked(&self) -> TrackedObject {
        self.key.to_tracked()
    }
}

/// Turn a rendered document into a writable object
///
/// Namespaced documents without a namespace land in `default_namespace`;
/// cluster-scoped documents lose any declared namespace. `labels` are merged
/// over the document's own labels.
pub fn prepare(
    doc: JsonValue,
    default_namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<PreparedObject> {
    let mut object = dynamic_from_value(doc)?;
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| KubeError::InvalidManifest("document has no apiVersion/kind".to_string()))?;
    if object.metadata.name.as_deref().is_none_or(str::is_empty) {
        return Err(KubeError::InvalidManifest(format!(
            "{} document has no metadata.name",
            types.kind
        )));
    }

    let group = types
        .api_version
        .rsplit_once('/')
        .map(|(group, _)| group)
        .unwrap_or("");
    let declared = object.metadata.namespace.as_deref().filter(|ns| !ns.is_empty());

    object.metadata.namespace = match scope_of(group, &types.kind, declared) {
        Scope::Namespaced => Some(declared.unwrap_or(default_namespace).to_string()),
        Scope::Cluster => None,
    };

    if !labels.is_empty() {
        object
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let key = ObjectKey::from_object(&object)?;
    Ok(PreparedObject { object, key })
}

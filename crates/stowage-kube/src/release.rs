//! Chart-kind components, delegated to Flux
//!
//! A [`HelmAddon`] becomes a `HelmRepository` plus a `HelmRelease`, both
//! named after the component and owned by it.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde_json::{Value as JsonValue, json};
use stowage_core::ComponentStatus;
use tracing::{debug, info};

use crate::crd::{HelmAddon, MANAGED_BY, MANAGED_BY_LABEL};
use crate::error::{KubeError, Result};
use crate::store::{ObjectKey, ObjectStore, Propagation, TypeRef, create_or_update, dynamic_from_value};

pub const REPOSITORY_API_VERSION: &str = "source.toolkit.fluxcd.io/v1";
pub const REPOSITORY_KIND: &str = "HelmRepository";
pub const RELEASE_API_VERSION: &str = "helm.toolkit.fluxcd.io/v2";
pub const RELEASE_KIND: &str = "HelmRelease";

/// Remediation attempts on install and upgrade
const REMEDIATION_RETRIES: u32 = 3;

/// Condition reasons that mean the release failed for good
const FAILED_REASONS: &[&str] = &["InstallFailed", "UpgradeFailed", "RollbackFailed", "UninstallFailed"];

/// Classification of a release's reported state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success,
    Failed { reason: String, message: String },
    Progressing,
}

/// Classify a `HelmRelease` from its `Released` condition
pub fn determine_status(release: &DynamicObject) -> ReleaseOutcome {
    let conditions = release.data["status"]["conditions"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    let Some(released) = conditions.iter().find(|c| c["type"] == "Released") else {
        return ReleaseOutcome::Progressing;
    };

    let reason = released["reason"].as_str().unwrap_or_default();
    match released["status"].as_str() {
        Some("True") => ReleaseOutcome::Success,
        Some("False") if FAILED_REASONS.contains(&reason) => ReleaseOutcome::Failed {
            reason: reason.to_string(),
            message: released["message"].as_str().unwrap_or_default().to_string(),
        },
        _ => ReleaseOutcome::Progressing,
    }
}

/// Component health for a release outcome
pub fn release_health(outcome: &ReleaseOutcome) -> ComponentStatus {
    match outcome {
        ReleaseOutcome::Success => ComponentStatus::available("", "release succeeded"),
        ReleaseOutcome::Failed { reason, message } => ComponentStatus::unhealthy(reason.as_str(), message.as_str()),
        ReleaseOutcome::Progressing => ComponentStatus::progressing("", "release in progress"),
    }
}

fn identity(addon: &HelmAddon) -> Result<(String, String)> {
    let namespace = addon
        .namespace()
        .ok_or_else(|| KubeError::InvalidObject("helm component needs a namespace".to_string()))?;
    Ok((namespace, addon.name_any()))
}

fn owner_ref(addon: &HelmAddon) -> Result<OwnerReference> {
    addon
        .controller_owner_ref(&())
        .ok_or_else(|| KubeError::InvalidObject(format!("helm component {} has no uid", addon.name_any())))
}

fn flux_interval(addon: &HelmAddon) -> String {
    format!("{}s", addon.spec.interval.as_secs())
}

/// The `HelmRepository` a component pulls its chart from
pub fn repository_object(addon: &HelmAddon) -> Result<DynamicObject> {
    let (namespace, name) = identity(addon)?;
    let mut spec = json!({
        "url": addon.spec.repository,
        "interval": flux_interval(addon),
    });
    if addon.spec.repository.starts_with("oci://") {
        spec["type"] = json!("oci");
    }

    dynamic_from_value(json!({
        "apiVersion": REPOSITORY_API_VERSION,
        "kind": REPOSITORY_KIND,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { MANAGED_BY_LABEL: MANAGED_BY },
            "ownerReferences": [owner_ref(addon)?],
        },
        "spec": spec,
    }))
}

/// The `HelmRelease` installing a component's chart into `target_namespace`
pub fn release_object(addon: &HelmAddon, target_namespace: &str) -> Result<DynamicObject> {
    let (namespace, name) = identity(addon)?;
    let mut chart = json!({
        "chart": addon.spec.chart,
        "sourceRef": {
            "kind": REPOSITORY_KIND,
            "name": name,
            "namespace": namespace,
        },
        "interval": flux_interval(addon),
    });
    if !addon.spec.version.is_empty() {
        chart["version"] = json!(addon.spec.version);
    }

    let mut spec = json!({
        "interval": flux_interval(addon),
        "targetNamespace": target_namespace,
        "releaseName": name,
        "chart": { "spec": chart },
        "install": {
            "createNamespace": true,
            "disableWait": true,
            "remediation": { "retries": REMEDIATION_RETRIES },
        },
        "upgrade": {
            "remediation": {
                "retries": REMEDIATION_RETRIES,
                "remediateLastFailure": true,
                "strategy": "rollback",
            },
        },
        "driftDetection": { "mode": "enabled" },
    });
    if !matches!(addon.spec.values, JsonValue::Null) {
        spec["values"] = addon.spec.values.clone();
    }

    dynamic_from_value(json!({
        "apiVersion": RELEASE_API_VERSION,
        "kind": RELEASE_KIND,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { MANAGED_BY_LABEL: MANAGED_BY },
            "ownerReferences": [owner_ref(addon)?],
        },
        "spec": spec,
    }))
}

/// Installs, inspects and removes Flux releases
pub struct ReleaseController {
    store: Arc<dyn ObjectStore>,
}

impl ReleaseController {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn keys(addon: &HelmAddon) -> Result<(ObjectKey, ObjectKey)> {
        let (namespace, name) = identity(addon)?;
        Ok((
            ObjectKey::namespaced(TypeRef::new(RELEASE_API_VERSION, RELEASE_KIND), &namespace, &name),
            ObjectKey::namespaced(TypeRef::new(REPOSITORY_API_VERSION, REPOSITORY_KIND), namespace, name),
        ))
    }

    /// Create or update the repository, then the release
    pub async fn create_release(&self, addon: &HelmAddon, target_namespace: &str) -> Result<()> {
        let repository = repository_object(addon)?;
        let release = release_object(addon, target_namespace)?;

        let repo_outcome = create_or_update(self.store.as_ref(), &repository).await?;
        let release_outcome = create_or_update(self.store.as_ref(), &release).await?;
        info!(
            release = %addon.name_any(),
            target_namespace,
            repository = ?repo_outcome,
            release_outcome = ?release_outcome,
            "applied helm release"
        );
        Ok(())
    }

    /// Delete the release and its repository; missing objects are fine
    pub async fn delete_release(&self, addon: &HelmAddon) -> Result<()> {
        let (release, repository) = Self::keys(addon)?;
        for key in [release, repository] {
            if self.store.delete_if_exists(&key, Propagation::Background).await? {
                info!(object = %key, "deleted");
            } else {
                debug!(object = %key, "already gone");
            }
        }
        Ok(())
    }

    /// Current outcome of a component's release
    pub async fn release_status(&self, addon: &HelmAddon) -> Result<ReleaseOutcome> {
        let (release, _) = Self::keys(addon)?;
        Ok(match self.store.get_opt(&release).await? {
            Some(obj) => determine_status(&obj),
            None => ReleaseOutcome::Progressing,
        })
    }
}

//! Issuer-kind components, backed by cert-manager

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde_json::json;
use stowage_core::ComponentStatus;
use tracing::{debug, info};

use crate::crd::{IssuerAddon, MANAGED_BY, MANAGED_BY_LABEL};
use crate::error::{KubeError, Result};
use crate::store::{ApplyOutcome, ObjectKey, ObjectStore, Propagation, TypeRef, create_or_update, dynamic_from_value};

pub const ISSUER_API_VERSION: &str = "cert-manager.io/v1";

fn issuer_kind(addon: &IssuerAddon) -> &'static str {
    if addon.spec.cluster_scoped {
        "ClusterIssuer"
    } else {
        "Issuer"
    }
}

/// The cert-manager object a component materializes into
///
/// A `ClusterIssuer` has no namespace and cannot be owned by a namespaced
/// component, so only the namespaced `Issuer` carries an owner reference.
pub fn issuer_object(addon: &IssuerAddon) -> Result<DynamicObject> {
    if !addon.spec.issuer.is_object() {
        return Err(KubeError::InvalidObject(format!(
            "issuer component {} needs an issuer object",
            addon.name_any()
        )));
    }

    let mut metadata = json!({
        "name": addon.name_any(),
        "labels": { MANAGED_BY_LABEL: MANAGED_BY },
    });
    if !addon.spec.cluster_scoped {
        let namespace = addon
            .namespace()
            .ok_or_else(|| KubeError::InvalidObject("issuer component needs a namespace".to_string()))?;
        metadata["namespace"] = json!(namespace);
        if let Some(owner) = addon.controller_owner_ref(&()) {
            metadata["ownerReferences"] = json!([owner]);
        }
    }

    dynamic_from_value(json!({
        "apiVersion": ISSUER_API_VERSION,
        "kind": issuer_kind(addon),
        "metadata": metadata,
        "spec": addon.spec.issuer,
    }))
}

/// Component health from the issuer's `Ready` condition
pub fn issuer_health(issuer: &DynamicObject) -> ComponentStatus {
    let ready = issuer.data["status"]["conditions"]
        .as_array()
        .and_then(|conditions| conditions.iter().find(|c| c["type"] == "Ready"));
    let Some(ready) = ready else {
        return ComponentStatus::progressing("", "issuer has not reported readiness");
    };

    let reason = ready["reason"].as_str().unwrap_or_default();
    let message = ready["message"].as_str().unwrap_or_default();
    match ready["status"].as_str() {
        Some("True") => ComponentStatus::ready(reason, message),
        Some("False") => ComponentStatus::degraded(reason, message),
        _ => ComponentStatus::progressing(reason, message),
    }
}

/// Applies, inspects and removes cert-manager issuers
pub struct IssuerController {
    store: Arc<dyn ObjectStore>,
}

impl IssuerController {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn key(addon: &IssuerAddon) -> Result<ObjectKey> {
        let type_ = TypeRef::new(ISSUER_API_VERSION, issuer_kind(addon));
        if addon.spec.cluster_scoped {
            return Ok(ObjectKey::cluster(type_, addon.name_any()));
        }
        let namespace = addon
            .namespace()
            .ok_or_else(|| KubeError::InvalidObject("issuer component needs a namespace".to_string()))?;
        Ok(ObjectKey::namespaced(type_, namespace, addon.name_any()))
    }

    pub async fn apply(&self, addon: &IssuerAddon) -> Result<ApplyOutcome> {
        let desired = issuer_object(addon)?;
        let outcome = create_or_update(self.store.as_ref(), &desired).await?;
        match outcome {
            ApplyOutcome::Unchanged => debug!(issuer = %addon.name_any(), "issuer unchanged"),
            _ => info!(issuer = %addon.name_any(), kind = issuer_kind(addon), ?outcome, "applied issuer"),
        }
        Ok(outcome)
    }

    pub async fn delete(&self, addon: &IssuerAddon) -> Result<bool> {
        let key = Self::key(addon)?;
        let deleted = self.store.delete_if_exists(&key, Propagation::Background).await?;
        if deleted {
            info!(object = %key, "deleted issuer");
        }
        Ok(deleted)
    }

    /// Health of the issuer; a missing issuer is still progressing
    pub async fn status(&self, addon: &IssuerAddon) -> Result<ComponentStatus> {
        Ok(match self.store.get_opt(&Self::key(addon)?).await? {
            Some(issuer) => issuer_health(&issuer),
            None => ComponentStatus::progressing("", "issuer not created yet"),
        })
    }
}

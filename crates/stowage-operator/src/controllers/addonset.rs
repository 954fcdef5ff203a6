//! Composite controller
//!
//! Converges the components an [`AddonSet`] declares and rolls their health
//! up into the composite's status.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::{Controller, watcher};
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use stowage_core::{ComponentStatus, StatusType};
use stowage_kube::crd::{AddonSet, AddonSetStatus, HelmAddon, IssuerAddon, ManifestAddon};
use stowage_kube::store::TypeRef;
use stowage_kube::{Owner, ReconcileSummary};
use tracing::{debug, info, warn};

use super::{Context, Services, error_policy, namespace_of, with_finalizer};
use crate::error::ControllerError;

pub async fn run(ctx: Arc<Context>) {
    let api = ctx.watched::<AddonSet>();
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "reconciled addon set"),
                Err(e) => warn!(error = %e, "addon set controller error"),
            }
        })
        .await;
}

async fn reconcile(set: Arc<AddonSet>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    with_finalizer(set, ctx, apply, cleanup).await
}

async fn apply(set: Arc<AddonSet>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    install(&ctx.services, &set).await?;
    let health = rollup(&component_statuses(&ctx.services, &owner_of(&set)?).await?);

    let next = AddonSetStatus {
        observed_generation: set.meta().generation,
        components: set.spec.component_count(),
        status: Some(health.with_transition_from(set.status.as_ref().and_then(|s| s.status.as_ref()))),
    };
    if !status_changed(set.status.as_ref(), &next) {
        return Ok(ctx.requeue());
    }

    let api: Api<AddonSet> = Api::namespaced(ctx.client.clone(), &namespace_of(set.as_ref())?);
    api.patch_status(
        &set.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": next })),
    )
    .await?;
    Ok(ctx.requeue())
}

async fn cleanup(set: Arc<AddonSet>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    uninstall(&ctx.services, &set).await?;
    Ok(Action::await_change())
}

fn owner_of(set: &AddonSet) -> Result<Owner, ControllerError> {
    Ok(Owner::new(set.name_any(), namespace_of(set)?))
}

/// Converge the declared components
pub(crate) async fn install(services: &Services, set: &AddonSet) -> Result<ReconcileSummary, ControllerError> {
    let owner = owner_of(set)?;
    let summary = services
        .reconciler
        .reconcile_all(&owner, &set.spec.helm, &set.spec.manifests, &set.spec.issuers)
        .await?;
    if !summary.is_noop() {
        info!(addonset = %owner.name, namespace = %owner.namespace, summary = %summary.summary(), "reconciled components");
    }
    Ok(summary)
}

/// Remove every component of a deleted composite
pub(crate) async fn uninstall(services: &Services, set: &AddonSet) -> Result<ReconcileSummary, ControllerError> {
    let owner = owner_of(set)?;
    let summary = services.reconciler.reconcile_all(&owner, &[], &[], &[]).await?;
    info!(addonset = %owner.name, namespace = %owner.namespace, deleted = summary.deleted.len(), "removed components");
    Ok(summary)
}

/// Stored status of every component an owner has
pub(crate) async fn component_statuses(
    services: &Services,
    owner: &Owner,
) -> Result<Vec<(String, Option<ComponentStatus>)>, ControllerError> {
    let selector = owner.selector();
    let mut statuses = Vec::new();
    for type_ in [TypeRef::of::<HelmAddon>(), TypeRef::of::<ManifestAddon>(), TypeRef::of::<IssuerAddon>()] {
        for obj in services.store.list(&type_, None, Some(&selector)).await? {
            let status = obj
                .data
                .get("status")
                .and_then(|s| serde_json::from_value::<ComponentStatus>(s.clone()).ok());
            statuses.push((format!("{}/{}", type_.kind, obj.name_any()), status));
        }
    }
    Ok(statuses)
}

/// Composite health from its components
///
/// The worst component wins: Unhealthy, then Degraded, then anything not yet
/// up. An empty composite is Available.
pub(crate) fn rollup(components: &[(String, Option<ComponentStatus>)]) -> ComponentStatus {
    let worst = |wanted: StatusType| {
        components
            .iter()
            .find(|(_, s)| s.as_ref().is_some_and(|s| s.type_ == wanted))
    };

    if let Some((name, Some(status))) = worst(StatusType::Unhealthy) {
        return ComponentStatus::unhealthy("ComponentUnhealthy", format!("{}: {}", name, status.message));
    }
    if let Some((name, Some(status))) = worst(StatusType::Degraded) {
        return ComponentStatus::degraded("ComponentDegraded", format!("{}: {}", name, status.message));
    }

    let pending: Vec<&str> = components
        .iter()
        .filter(|(_, s)| !s.as_ref().is_some_and(|s| s.type_.is_up()))
        .map(|(name, _)| name.as_str())
        .collect();
    if !pending.is_empty() {
        return ComponentStatus::progressing("ComponentsProgressing", format!("waiting for {}", pending.join(", ")));
    }

    ComponentStatus::available("Reconciled", format!("{} components available", components.len()))
}

fn status_changed(previous: Option<&AddonSetStatus>, next: &AddonSetStatus) -> bool {
    let Some(prev) = previous else {
        return true;
    };
    let same_health = match (&prev.status, &next.status) {
        (Some(a), Some(b)) => a.same_as(b),
        (None, None) => true,
        _ => false,
    };
    !(same_health && prev.observed_generation == next.observed_generation && prev.components == next.components)
}

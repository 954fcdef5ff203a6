//! Chart component controller

use std::sync::Arc;

use futures::StreamExt;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::{Controller, watcher};
use stowage_core::ComponentStatus;
use stowage_kube::crd::HelmAddon;
use stowage_kube::release::release_health;
use stowage_kube::{LifecycleOperation, LifecycleTimer};
use tracing::{debug, warn};

use super::{Context, Services, error_policy, namespace_of, with_finalizer, write_status};
use crate::error::ControllerError;

pub async fn run(ctx: Arc<Context>) {
    let api = ctx.watched::<HelmAddon>();
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "reconciled helm release"),
                Err(e) => warn!(error = %e, "helm controller error"),
            }
        })
        .await;
}

async fn reconcile(addon: Arc<HelmAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    with_finalizer(addon, ctx, apply, cleanup).await
}

async fn apply(addon: Arc<HelmAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let status = install(&ctx.services, &addon).await?;
    write_status(&ctx.client, addon.as_ref(), addon.status.as_ref(), status).await?;
    Ok(ctx.requeue())
}

async fn cleanup(addon: Arc<HelmAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    uninstall(&ctx.services, &addon).await?;
    Ok(Action::await_change())
}

/// Namespace the chart installs into
fn target_namespace(addon: &HelmAddon) -> Result<String, ControllerError> {
    match addon.spec.target_namespace.as_deref().filter(|ns| !ns.is_empty()) {
        Some(ns) => Ok(ns.to_string()),
        None => namespace_of(addon),
    }
}

/// Apply the release and report its health
pub(crate) async fn install(services: &Services, addon: &HelmAddon) -> Result<ComponentStatus, ControllerError> {
    let target = target_namespace(addon)?;

    // Only the first install is timed; later passes re-assert the objects
    let first = addon.status.is_none();
    let timer = LifecycleTimer::start(services.observer.clone(), addon.name_any(), LifecycleOperation::Install);
    let result = services.releases.create_release(addon, &target).await;
    if first || result.is_err() {
        timer.finish(&result);
    }
    result?;

    let outcome = services.releases.release_status(addon).await?;
    Ok(release_health(&outcome))
}

pub(crate) async fn uninstall(services: &Services, addon: &HelmAddon) -> Result<(), ControllerError> {
    let timer = LifecycleTimer::start(services.observer.clone(), addon.name_any(), LifecycleOperation::Uninstall);
    let result = services.releases.delete_release(addon).await;
    timer.finish(&result);
    Ok(result?)
}

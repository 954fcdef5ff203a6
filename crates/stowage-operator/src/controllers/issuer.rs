//! Certificate issuer controller

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::{Controller, watcher};
use stowage_core::ComponentStatus;
use stowage_kube::crd::IssuerAddon;
use tracing::{debug, warn};

use super::{Context, Services, error_policy, with_finalizer, write_status};
use crate::error::ControllerError;

pub async fn run(ctx: Arc<Context>) {
    let api = ctx.watched::<IssuerAddon>();
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "reconciled issuer"),
                Err(e) => warn!(error = %e, "issuer controller error"),
            }
        })
        .await;
}

async fn reconcile(addon: Arc<IssuerAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    with_finalizer(addon, ctx, apply, cleanup).await
}

async fn apply(addon: Arc<IssuerAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let status = install(&ctx.services, &addon).await?;
    write_status(&ctx.client, addon.as_ref(), addon.status.as_ref(), status).await?;
    Ok(ctx.requeue())
}

async fn cleanup(addon: Arc<IssuerAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    ctx.services.issuers.delete(&addon).await?;
    Ok(Action::await_change())
}

pub(crate) async fn install(services: &Services, addon: &IssuerAddon) -> Result<ComponentStatus, ControllerError> {
    if let Err(e) = services.issuers.apply(addon).await {
        if let stowage_kube::KubeError::InvalidObject(message) = &e {
            return Ok(ComponentStatus::degraded("InvalidIssuer", message.as_str()));
        }
        return Err(e.into());
    }
    Ok(services.issuers.status(addon).await?)
}

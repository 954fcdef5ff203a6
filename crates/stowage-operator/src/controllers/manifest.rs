//! Manifest component controller

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::{Controller, watcher};
use kube::{Resource, ResourceExt};
use stowage_core::ComponentStatus;
use stowage_kube::crd::ManifestAddon;
use stowage_kube::manifest::{AWAIT_INTERVAL, await_available};
use stowage_kube::{KubeError, LifecycleOperation, LifecycleTimer, should_retry};
use tracing::{debug, warn};

use super::{Context, Services, error_policy, namespace_of, with_finalizer, write_status};
use crate::error::ControllerError;

pub async fn run(ctx: Arc<Context>) {
    let api = ctx.watched::<ManifestAddon>();
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "reconciled manifest"),
                Err(e) => warn!(error = %e, "manifest controller error"),
            }
        })
        .await;
}

async fn reconcile(addon: Arc<ManifestAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    with_finalizer(addon, ctx, apply, cleanup).await
}

async fn apply(addon: Arc<ManifestAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let status = install(&ctx.services, &addon).await?;
    write_status(&ctx.client, addon.as_ref(), addon.status.as_ref(), status).await?;
    Ok(ctx.requeue())
}

async fn cleanup(addon: Arc<ManifestAddon>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    uninstall(&ctx.services, &addon).await?;
    Ok(Action::await_change())
}

/// Apply the bundle (or retry it) and derive the component's health
///
/// Render failures are the user's to fix, so they become a Degraded status
/// instead of a reconcile error.
pub(crate) async fn install(services: &Services, addon: &ManifestAddon) -> Result<ComponentStatus, ControllerError> {
    let namespace = namespace_of(addon)?;
    let name = addon.name_any();
    let owner = addon.controller_owner_ref(&());

    if should_retry(addon, Utc::now()) {
        let timer = LifecycleTimer::start(services.observer.clone(), &name, LifecycleOperation::Install);
        let result = services.manifests.retry(addon, owner).await;
        timer.finish(&result);
        let report = match result {
            Ok(report) => report,
            Err(e) => return render_failed(&name, &namespace, e),
        };

        let aggregator = &services.aggregator;
        let (component, objects) = (name.as_str(), report.objects.as_slice());
        let awaited = await_available(services.config.await_timeout, AWAIT_INTERVAL, || async move {
            aggregator.check_status(component, objects).await.map(Some)
        })
        .await;
        return match awaited {
            Ok(status) => Ok(status),
            Err(KubeError::Timeout(after)) => {
                warn!(manifest = %name, %namespace, after = %after, "workloads still not available after retry");
                Ok(services.aggregator.check_status(&name, &report.objects).await?)
            }
            Err(e) => Err(e.into()),
        };
    }

    let timer = LifecycleTimer::start(services.observer.clone(), &name, LifecycleOperation::Install);
    let result = services.manifests.apply(&namespace, &name, &addon.spec, owner).await;
    match &result {
        Ok(report) if !report.changed => {}
        _ => timer.finish(&result),
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => return render_failed(&name, &namespace, e),
    };

    Ok(services.aggregator.check_status(&name, &report.objects).await?)
}

fn render_failed(name: &str, namespace: &str, err: KubeError) -> Result<ComponentStatus, ControllerError> {
    if !err.is_input_error() {
        return Err(err.into());
    }
    warn!(manifest = %name, %namespace, error = %err, "manifest cannot be rendered");
    Ok(ComponentStatus::degraded("RenderFailed", err.to_string()))
}

/// Delete everything the bundle produced
pub(crate) async fn uninstall(services: &Services, addon: &ManifestAddon) -> Result<usize, ControllerError> {
    let namespace = namespace_of(addon)?;
    let name = addon.name_any();

    let timer = LifecycleTimer::start(services.observer.clone(), &name, LifecycleOperation::Uninstall);
    let result = services.manifests.remove(&namespace, &name).await;
    timer.finish(&result);
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing;
    use std::io::Write;
    use std::time::Duration;
    use stowage_core::{FailurePolicy, StatusType};
    use stowage_kube::crd::{ManifestAddonSpec, RETRIED_AT_ANNOTATION};
    use stowage_kube::observe::Outcome;
    use stowage_kube::store::{from_dynamic, to_dynamic};
    use stowage_kube::ObjectKey;

    const BUNDLE: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: metrics-config
data:
  level: info
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: metrics-server
spec:
  replicas: 1
"#;

    fn bundle() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BUNDLE.as_bytes()).unwrap();
        file
    }

    fn addon(url: String) -> ManifestAddon {
        let mut addon = ManifestAddon::new("metrics", ManifestAddonSpec::new(url));
        addon.metadata.namespace = Some("addons".to_string());
        addon.metadata.uid = Some("uid-42".to_string());
        addon
    }

    fn file_url(file: &tempfile::NamedTempFile) -> String {
        format!("file://{}", file.path().display())
    }

    #[tokio::test]
    async fn test_install_applies_and_reports_progress() {
        let (store, observer, services) = testing::services();
        let file = bundle();
        let addon = addon(file_url(&file));

        let status = install(&services, &addon).await.unwrap();
        assert_eq!(status.type_, StatusType::Progressing);
        assert_eq!(store.objects_of("Deployment").len(), 1);
        assert_eq!(store.objects_of("ManifestRecord").len(), 1);

        // An unchanged bundle is not timed as an install
        install(&services, &addon).await.unwrap();
        let samples = observer.samples.lock().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1, LifecycleOperation::Install);
        assert_eq!(samples[0].2, Outcome::Success);
    }

    #[tokio::test]
    async fn test_render_failure_degrades() {
        let (store, observer, services) = testing::services();
        let addon = addon("ftp://example.com/metrics.yaml".to_string());

        let status = install(&services, &addon).await.unwrap();
        assert_eq!(status.type_, StatusType::Degraded);
        assert_eq!(status.reason, "RenderFailed");
        assert!(status.message.contains("ftp"));
        assert_eq!(store.object_count(), 0);
        assert_eq!(observer.samples.lock().unwrap()[0].2, Outcome::Failure);
    }

    #[tokio::test]
    async fn test_unreachable_source_degrades() {
        let (store, _observer, services) = testing::services();
        let dir = tempfile::tempdir().unwrap();
        let missing = format!("file://{}", dir.path().join("absent.yaml").display());

        for url in [missing, "http://127.0.0.1:1/metrics.yaml".to_string()] {
            let status = install(&services, &addon(url.clone())).await.unwrap();
            assert_eq!(status.type_, StatusType::Degraded);
            assert_eq!(status.reason, "RenderFailed");
            assert!(status.message.contains(&url));
        }
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_component_is_retried() {
        let (store, _, services) = testing::services();
        let file = bundle();
        let mut addon = addon(file_url(&file));
        addon.spec.failure_policy = FailurePolicy::Retry;
        addon.spec.timeout = Some(Duration::from_secs(60));
        addon.status = Some(ComponentStatus::unhealthy("DaemonSetUnavailable", "0/3 available"));
        store.insert(to_dynamic(&addon).unwrap());

        let status = install(&services, &addon).await.unwrap();
        assert_eq!(status.type_, StatusType::Progressing);

        let live: ManifestAddon = from_dynamic(
            &store
                .object(&ObjectKey::of::<ManifestAddon>(Some("addons"), "metrics"))
                .unwrap(),
        )
        .unwrap();
        assert!(live.annotations().contains_key(RETRIED_AT_ANNOTATION));
        assert_eq!(store.objects_of("Deployment").len(), 1);
    }

    #[tokio::test]
    async fn test_uninstall_removes_products() {
        let (store, observer, services) = testing::services();
        let file = bundle();
        let addon = addon(file_url(&file));
        install(&services, &addon).await.unwrap();

        assert_eq!(uninstall(&services, &addon).await.unwrap(), 2);
        assert!(store.objects_of("Deployment").is_empty());
        assert!(store.objects_of("ManifestRecord").is_empty());

        let samples = observer.samples.lock().unwrap();
        assert_eq!(samples.last().unwrap().1, LifecycleOperation::Uninstall);
    }
}

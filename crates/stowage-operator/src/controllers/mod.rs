//! kube-runtime controllers
//!
//! One controller per resource kind. Each reconcile goes through the
//! `stowage.io/cleanup` finalizer: `Apply` runs the install path and writes
//! the resulting status, `Cleanup` runs the uninstall path. The install and
//! uninstall paths only touch [`Services`], so they run unchanged against the
//! in-memory store in tests.

pub mod addonset;
pub mod helm;
pub mod issuer;
pub mod manifest;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event, finalizer};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use stowage_core::ComponentStatus;
use stowage_kube::crd::FINALIZER;
use stowage_kube::{
    ComponentReconciler, HttpOverlayRenderer, IssuerController, KubeStore, LifecycleObserver,
    ManifestController, ObjectStore, OverlayRenderer, ReleaseController, StatusAggregator,
    TracingObserver,
};
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::error::{ControllerError, Result};

/// Delay before retrying a failed reconcile
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Field manager for status patches
const STATUS_MANAGER: &str = "stowage";

/// Store-backed machinery shared by every controller
pub struct Services {
    pub store: Arc<dyn ObjectStore>,
    pub reconciler: ComponentReconciler,
    pub manifests: ManifestController,
    pub releases: ReleaseController,
    pub issuers: IssuerController,
    pub aggregator: StatusAggregator,
    pub observer: Arc<dyn LifecycleObserver>,
    pub config: OperatorConfig,
}

impl Services {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn OverlayRenderer>,
        observer: Arc<dyn LifecycleObserver>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            reconciler: ComponentReconciler::new(store.clone()),
            manifests: ManifestController::new(store.clone(), renderer),
            releases: ReleaseController::new(store.clone()),
            issuers: IssuerController::new(store.clone()),
            aggregator: StatusAggregator::new(store.clone()),
            store,
            observer,
            config,
        }
    }
}

/// Controller context
pub struct Context {
    pub client: Client,
    pub services: Services,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> =
            Arc::new(KubeStore::with_timeout(client.clone(), config.operation_timeout));
        let renderer: Arc<dyn OverlayRenderer> =
            Arc::new(HttpOverlayRenderer::new(config.operation_timeout)?);
        let services = Services::new(store, renderer, Arc::new(TracingObserver), config);
        Ok(Self { client, services })
    }

    /// Api over the watched namespace, or the whole cluster
    fn watched<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.services.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn requeue(&self) -> Action {
        Action::requeue(self.services.config.requeue_interval)
    }
}

/// Namespace of a namespaced resource
pub(crate) fn namespace_of<K: Resource<DynamicType = ()>>(obj: &K) -> std::result::Result<String, ControllerError> {
    obj.namespace().ok_or_else(|| ControllerError::MissingNamespace {
        kind: kind_of::<K>(),
        name: obj.name_any(),
    })
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

/// Run `apply` or `cleanup` through the finalizer
async fn with_finalizer<K, A, C, AF, CF>(
    obj: Arc<K>,
    ctx: Arc<Context>,
    apply: A,
    cleanup: C,
) -> std::result::Result<Action, ControllerError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
    A: FnOnce(Arc<K>, Arc<Context>) -> AF,
    C: FnOnce(Arc<K>, Arc<Context>) -> CF,
    AF: Future<Output = std::result::Result<Action, ControllerError>>,
    CF: Future<Output = std::result::Result<Action, ControllerError>>,
{
    let namespace = namespace_of(obj.as_ref())?;
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, obj, |event| async move {
        match event {
            Event::Apply(obj) => apply(obj, ctx).await,
            Event::Cleanup(obj) => cleanup(obj, ctx).await,
        }
    })
    .await
    .map_err(|e| ControllerError::Finalizer(Box::new(e)))
}

/// Patch a component's status when it says something new
pub(crate) async fn write_status<K>(
    client: &Client,
    obj: &K,
    previous: Option<&ComponentStatus>,
    next: ComponentStatus,
) -> std::result::Result<(), ControllerError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
{
    if previous.is_some_and(|prev| prev.same_as(&next)) {
        debug!(name = %obj.name_any(), status = %next.type_, "status unchanged");
        return Ok(());
    }
    let next = next.with_transition_from(previous);
    next.validate()?;

    let api: Api<K> = Api::namespaced(client.clone(), &namespace_of(obj)?);
    api.patch_status(
        &obj.name_any(),
        &PatchParams::apply(STATUS_MANAGER),
        &Patch::Merge(json!({ "status": next })),
    )
    .await?;
    info!(
        kind = %kind_of::<K>(),
        name = %obj.name_any(),
        status = %next.type_,
        reason = %next.reason,
        "status changed"
    );
    Ok(())
}

/// Requeue failed reconciles after a fixed delay
pub fn error_policy<K: Resource<DynamicType = ()>>(obj: Arc<K>, error: &ControllerError, _ctx: Arc<Context>) -> Action {
    warn!(
        kind = %kind_of::<K>(),
        name = %obj.name_any(),
        namespace = obj.namespace().unwrap_or_default(),
        error = %error,
        "reconcile failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Run every controller until shutdown
pub async fn run(client: Client, config: OperatorConfig) -> Result<()> {
    let ctx = Arc::new(Context::new(client, config)?);
    info!(
        namespace = ctx.services.config.namespace.as_deref().unwrap_or("<all>"),
        "starting controllers"
    );

    futures::join!(
        addonset::run(ctx.clone()),
        helm::run(ctx.clone()),
        manifest::run(ctx.clone()),
        issuer::run(ctx),
    );

    info!("controllers stopped");
    Ok(())
}

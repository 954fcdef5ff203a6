//! Object store backed by the Kubernetes API

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::{ApiResource, TypeMeta};
use kube::discovery::{self, Scope};
use kube::Client;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ObjectKey, ObjectStore, Propagation, TypeRef};
use crate::error::{KubeError, Result};

/// Field manager recorded on every write
const FIELD_MANAGER: &str = "stowage";

/// Per-operation deadline applied when none is configured
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Kubernetes-backed object store
///
/// API resources are resolved through discovery once per type and cached.
pub struct KubeStore {
    client: Client,
    timeout: Duration,
    resources: RwLock<HashMap<TypeRef, (ApiResource, bool)>>,
}

impl KubeStore {
    /// Create a store with the default 60s deadline
    pub fn new(client: Client) -> Self {
        Self::with_timeout(client, DEFAULT_OPERATION_TIMEOUT)
    }

    pub fn with_timeout(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Get the underlying Kubernetes client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run a client call under the operation deadline and classify its error
    async fn bounded<T, F>(&self, what: impl std::fmt::Display, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(KubeError::from_kube(e, what)),
            Err(_) => Err(KubeError::Timeout(format!("{}s", self.timeout.as_secs()))),
        }
    }

    /// Resolve the API resource and scope of a type
    async fn resolve(&self, type_: &TypeRef) -> Result<(ApiResource, bool)> {
        if let Some(found) = self.resources.read().await.get(type_) {
            return Ok(found.clone());
        }

        let gvk = type_.gvk();
        let (resource, caps) = self
            .bounded(type_, discovery::pinned_kind(&self.client, &gvk))
            .await?;
        let namespaced = caps.scope == Scope::Namespaced;
        debug!(kind = %type_, plural = %resource.plural, namespaced, "discovered API resource");

        self.resources
            .write()
            .await
            .insert(type_.clone(), (resource.clone(), namespaced));
        Ok((resource, namespaced))
    }

    async fn api(&self, type_: &TypeRef, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (resource, namespaced) = self.resolve(type_).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }

    /// Api scoped for a single object; namespaced kinds need a namespace
    async fn api_for(&self, key: &ObjectKey) -> Result<Api<DynamicObject>> {
        let (_, namespaced) = self.resolve(&key.type_).await?;
        if namespaced && key.namespace.is_none() {
            return Err(KubeError::InvalidObject(format!(
                "{} is namespaced but no namespace was given",
                key
            )));
        }
        self.api(&key.type_, key.namespace.as_deref()).await
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        let api = self.api_for(key).await?;
        self.bounded(key, api.get(&key.name)).await
    }

    async fn list(
        &self,
        type_: &TypeRef,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(type_, namespace).await?;
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }

        let list = self.bounded(type_, api.list(&params)).await?;
        // List items come back without apiVersion/kind
        Ok(list
            .items
            .into_iter()
            .map(|mut obj| {
                obj.types.get_or_insert_with(|| TypeMeta {
                    api_version: type_.api_version.clone(),
                    kind: type_.kind.clone(),
                });
                obj
            })
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        let api = self.api_for(&key).await?;
        self.bounded(&key, api.create(&post_params(), obj)).await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        if obj.metadata.resource_version.is_none() {
            return Err(KubeError::InvalidObject(format!(
                "update of {} requires a resourceVersion",
                key
            )));
        }
        let api = self.api_for(&key).await?;
        self.bounded(&key, api.replace(&key.name, &post_params(), obj)).await
    }

    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<()> {
        let api = self.api_for(key).await?;
        let params = match propagation {
            Propagation::Background => DeleteParams::background(),
            Propagation::Foreground => DeleteParams::foreground(),
        };
        self.bounded(key, api.delete(&key.name, &params)).await?;
        Ok(())
    }
}

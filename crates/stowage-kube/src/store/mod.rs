//! Object store seam
//!
//! Every cluster mutation in Stowage goes through [`ObjectStore`]:
//! - **KubeStore**: backed by the Kubernetes API, every call bounded by a deadline
//! - **MockStore**: in-memory, with operation counters and a mutation journal
//!
//! Objects travel untyped as [`DynamicObject`]s. [`to_dynamic`] and
//! [`from_dynamic`] convert to and from typed resources.

mod cluster;
mod mock;

pub use cluster::KubeStore;
pub use mock::{MockOp, MockStore, Mutation, OperationCounts};

use std::collections::BTreeMap;

use ::kube::Resource;
use ::kube::api::DynamicObject;
use ::kube::core::{ApiResource, GroupVersionKind};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use stowage_core::TrackedObject;
use tracing::debug;

use crate::error::{KubeError, Result};

/// API version and kind of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub api_version: String,
    pub kind: String,
}

impl TypeRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Type of a statically known resource
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(K::api_version(&()), K::kind(&()))
    }

    /// API group ("" for the core group)
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(_, version)| version)
            .unwrap_or(&self.api_version)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group(), self.version(), &self.kind)
    }

    /// API resource using the conventional plural of the kind
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.api_version)
    }
}

/// Identity of an object in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub type_: TypeRef,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(type_: TypeRef, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(type_: TypeRef, name: impl Into<String>) -> Self {
        Self {
            type_,
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a statically known resource
    pub fn of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            type_: TypeRef::of::<K>(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Identity of an untyped object
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| KubeError::InvalidObject("object has no apiVersion/kind".to_string()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidObject(format!("{} has no metadata.name", types.kind)))?;
        Ok(Self {
            type_: TypeRef::new(&types.api_version, &types.kind),
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }

    pub fn from_tracked(obj: &TrackedObject) -> Self {
        Self {
            type_: TypeRef::new(&obj.api_version, &obj.kind),
            namespace: obj.namespace.clone(),
            name: obj.name.clone(),
        }
    }

    pub fn to_tracked(&self) -> TrackedObject {
        TrackedObject::new(
            &self.type_.api_version,
            &self.type_.kind,
            &self.name,
            self.namespace.clone(),
        )
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.type_.kind, ns, self.name),
            None => write!(f, "{} {}", self.type_.kind, self.name),
        }
    }
}

/// Deletion propagation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Delete the object now, collect dependents afterwards
    #[default]
    Background,
    /// Delete dependents before the object disappears
    Foreground,
}

/// Create/get/update/delete/list against a cluster
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by identity
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject>;

    /// List objects of a type, optionally within one namespace and matching a label selector
    async fn list(
        &self,
        type_: &TypeRef,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; `metadata.resourceVersion` must be set
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object by identity
    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<()>;

    /// Get an object, mapping "not found" to None
    async fn get_opt(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        match self.get(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an object, tolerating "not found"; returns whether it existed
    async fn delete_if_exists(&self, key: &ObjectKey, propagation: Propagation) -> Result<bool> {
        match self.delete(key, propagation).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Convert a typed resource into an untyped object
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    Ok(serde_json::from_value(value)?)
}

/// Convert an untyped object into a typed resource
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Build an untyped object from a JSON document
pub fn dynamic_from_value(value: JsonValue) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value)?)
}

/// What [`create_or_update`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Apply an object idempotently
///
/// Creates the object when absent. When present, the update is skipped if
/// every desired field and label is already in place; otherwise the live
/// concurrency token and finalizers are copied onto the desired object and it
/// replaces the live one.
pub async fn create_or_update(store: &dyn ObjectStore, desired: &DynamicObject) -> Result<ApplyOutcome> {
    let key = ObjectKey::from_object(desired)?;

    let existing = match store.get_opt(&key).await? {
        Some(existing) => existing,
        None => match store.create(desired).await {
            Ok(_) => return Ok(ApplyOutcome::Created),
            // Lost a race with another writer
            Err(e) if e.is_already_exists() => store.get(&key).await?,
            Err(e) => return Err(e),
        },
    };

    if is_applied(desired, &existing) {
        debug!(object = %key, "already up to date");
        return Ok(ApplyOutcome::Unchanged);
    }

    store.update(&adopt(desired, &existing)).await?;
    Ok(ApplyOutcome::Updated)
}

/// Copy the live concurrency token, finalizers and annotations onto a desired object
///
/// Live annotations are kept unless the desired object sets the same key.
pub fn adopt(desired: &DynamicObject, existing: &DynamicObject) -> DynamicObject {
    let mut obj = desired.clone();
    obj.metadata.resource_version = existing.metadata.resource_version.clone();
    if obj.metadata.finalizers.is_none() {
        obj.metadata.finalizers = existing.metadata.finalizers.clone();
    }
    if let Some(live) = &existing.metadata.annotations {
        let annotations = obj.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (key, value) in live {
            annotations.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    obj
}

/// Whether the desired content, labels and annotations are present on the live object
pub fn is_applied(desired: &DynamicObject, existing: &DynamicObject) -> bool {
    let data_applied = match (desired.data.as_object(), existing.data.as_object()) {
        (Some(want), Some(have)) => want
            .iter()
            .filter(|(k, _)| k.as_str() != "status")
            .all(|(k, v)| have.get(k).is_some_and(|h| is_subset(v, h))),
        _ => desired.data == existing.data,
    };

    data_applied
        && map_is_subset(desired.metadata.labels.as_ref(), existing.metadata.labels.as_ref())
        && map_is_subset(
            desired.metadata.annotations.as_ref(),
            existing.metadata.annotations.as_ref(),
        )
}

fn map_is_subset(want: Option<&BTreeMap<String, String>>, have: Option<&BTreeMap<String, String>>) -> bool {
    let Some(want) = want else {
        return true;
    };
    want.iter()
        .all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
}

/// Every field of `want` is present in `have` with the same value
///
/// Objects may carry extra (server-defaulted) fields; arrays and scalars must match.
fn is_subset(want: &JsonValue, have: &JsonValue) -> bool {
    match (want, have) {
        (JsonValue::Object(want), JsonValue::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|h| is_subset(v, h))),
        (JsonValue::Array(want), JsonValue::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        _ => want == have,
    }
}

/// Parse a `k=v,k2=v2` label selector
pub(crate) fn parse_selector(selector: &str) -> Vec<(&str, &str)> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

/// Render labels as an equality selector
pub fn selector_for(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

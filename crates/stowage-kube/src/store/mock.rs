//! In-memory object store for testing
//!
//! Objects are keyed by API group (not version), kind, namespace and name, so
//! an object created as `apps/v1` is found again through `apps/v1beta2`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, Time};
use kube::api::DynamicObject;

use super::{ObjectKey, ObjectStore, Propagation, TypeRef, parse_selector};
use crate::error::{KubeError, Result};

type StoreKey = (String, String, String, String);

/// In-memory object store for testing
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    objects: BTreeMap<StoreKey, DynamicObject>,
    counts: OperationCounts,
    journal: Vec<Mutation>,
    version: u64,
    failures: Vec<(MockOp, String)>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl OperationCounts {
    /// Number of mutating calls
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

/// Store operation, for failure injection and the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// One successful mutation, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub op: MockOp,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            MockOp::Get => "get",
            MockOp::List => "list",
            MockOp::Create => "create",
            MockOp::Update => "update",
            MockOp::Delete => "delete",
        };
        match &self.namespace {
            Some(ns) => write!(f, "{} {} {}/{}", op, self.kind, ns, self.name),
            None => write!(f, "{} {} {}", op, self.kind, self.name),
        }
    }
}

fn store_key(key: &ObjectKey) -> StoreKey {
    (
        key.type_.group().to_string(),
        key.type_.kind.clone(),
        key.namespace.clone().unwrap_or_default(),
        key.name.clone(),
    )
}

fn managed_fields_now() -> Vec<ManagedFieldsEntry> {
    vec![ManagedFieldsEntry {
        manager: Some("stowage".to_string()),
        operation: Some("Update".to_string()),
        time: Some(Time(Utc::now())),
        ..Default::default()
    }]
}

impl MockStore {
    /// Create a new empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated objects (not counted as operations)
    pub fn with_objects(objects: Vec<DynamicObject>) -> Self {
        let store = Self::new();
        for obj in objects {
            store.insert(obj);
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Seed an object, assigning a resource version and uid
    pub fn insert(&self, mut obj: DynamicObject) -> DynamicObject {
        let mut state = self.state();
        state.version += 1;
        let version = state.version;
        obj.metadata.resource_version = Some(version.to_string());
        obj.metadata.uid.get_or_insert_with(|| format!("uid-{}", version));
        obj.metadata
            .creation_timestamp
            .get_or_insert_with(|| Time(Utc::now()));
        let key = ObjectKey::from_object(&obj).expect("seeded objects need apiVersion, kind and name");
        state.objects.insert(store_key(&key), obj.clone());
        obj
    }

    /// Make the next `op` on `kind` fail with a timeout
    pub fn fail_on(&self, op: MockOp, kind: &str) {
        self.state().failures.push((op, kind.to_string()));
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.state().counts.clone()
    }

    /// Reset operation counts and the journal
    pub fn reset_counts(&self) {
        let mut state = self.state();
        state.counts = OperationCounts::default();
        state.journal.clear();
    }

    /// Successful mutations, in call order
    pub fn journal(&self) -> Vec<Mutation> {
        self.state().journal.clone()
    }

    /// Journal entries rendered as "create Kind ns/name"
    pub fn journal_lines(&self) -> Vec<String> {
        self.journal().iter().map(ToString::to_string).collect()
    }

    /// Look up an object without counting a get
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.state().objects.get(&store_key(key)).cloned()
    }

    /// All stored objects of a kind
    pub fn objects_of(&self, kind: &str) -> Vec<DynamicObject> {
        self.state()
            .objects
            .iter()
            .filter(|((_, k, _, _), _)| k == kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Count total objects
    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }
}

impl MockState {
    fn take_failure(&mut self, op: MockOp, kind: &str) -> Result<()> {
        if let Some(pos) = self
            .failures
            .iter()
            .position(|(o, k)| *o == op && k == kind)
        {
            self.failures.remove(pos);
            return Err(KubeError::Timeout("injected".to_string()));
        }
        Ok(())
    }

    fn record(&mut self, op: MockOp, key: &ObjectKey) {
        self.journal.push(Mutation {
            op,
            kind: key.type_.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        let mut state = self.state();
        state.counts.gets += 1;
        state.take_failure(MockOp::Get, &key.type_.kind)?;

        state
            .objects
            .get(&store_key(key))
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(
        &self,
        type_: &TypeRef,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.state();
        state.counts.lists += 1;
        state.take_failure(MockOp::List, &type_.kind)?;

        let terms = selector.map(parse_selector).unwrap_or_default();
        Ok(state
            .objects
            .iter()
            .filter(|((group, kind, ns, _), _)| {
                group == type_.group()
                    && kind == &type_.kind
                    && namespace.is_none_or(|want| want == ns)
            })
            .map(|(_, obj)| obj)
            .filter(|obj| {
                terms.iter().all(|(k, v)| {
                    obj.metadata
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.get(*k))
                        .is_some_and(|label| label == v)
                })
            })
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        let mut state = self.state();
        state.counts.creates += 1;
        state.take_failure(MockOp::Create, &key.type_.kind)?;

        let skey = store_key(&key);
        if state.objects.contains_key(&skey) {
            return Err(KubeError::AlreadyExists {
                key: key.to_string(),
            });
        }

        let version = state.next_version();
        let mut stored = obj.clone();
        stored.metadata.uid = Some(format!("uid-{}", version));
        stored.metadata.resource_version = Some(version);
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.metadata.generation = Some(1);
        stored.metadata.managed_fields = Some(managed_fields_now());

        state.objects.insert(skey, stored.clone());
        state.record(MockOp::Create, &key);
        Ok(stored)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        let mut state = self.state();
        state.counts.updates += 1;
        state.take_failure(MockOp::Update, &key.type_.kind)?;

        let skey = store_key(&key);
        let Some(current) = state.objects.get(&skey).cloned() else {
            return Err(KubeError::NotFound {
                key: key.to_string(),
            });
        };

        match &obj.metadata.resource_version {
            None => {
                return Err(KubeError::InvalidObject(format!(
                    "update of {} requires a resourceVersion",
                    key
                )));
            }
            Some(rv) if Some(rv) != current.metadata.resource_version.as_ref() => {
                return Err(KubeError::Conflict {
                    key: key.to_string(),
                    message: format!("stale resourceVersion {}", rv),
                });
            }
            Some(_) => {}
        }

        let mut stored = obj.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.generation = Some(current.metadata.generation.unwrap_or(1) + 1);
        stored.metadata.managed_fields = Some(managed_fields_now());
        stored.metadata.resource_version = Some(state.next_version());

        state.objects.insert(skey, stored.clone());
        state.record(MockOp::Update, &key);
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey, _propagation: Propagation) -> Result<()> {
        let mut state = self.state();
        state.counts.deletes += 1;
        state.take_failure(MockOp::Delete, &key.type_.kind)?;

        if state.objects.remove(&store_key(key)).is_none() {
            return Err(KubeError::NotFound {
                key: key.to_string(),
            });
        }
        state.record(MockOp::Delete, key);
        Ok(())
    }
}

//! Generic component reconciliation
//!
//! Diffs the desired components declared on a composite against the installed
//! components of the same kind and drives create/update/delete until they
//! match. The same loop serves every component kind through the
//! [`Component`] trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::crd::{
    ComponentSpec, HelmAddon, HelmAddonSpec, IssuerAddon, IssuerAddonSpec, IssuerConfig,
    MANAGED_BY, MANAGED_BY_LABEL, ManifestAddon, ManifestAddonSpec, OWNER_NAME_LABEL,
    OWNER_NAMESPACE_LABEL,
};
use crate::error::Result;
use crate::store::{ObjectKey, ObjectStore, Propagation, TypeRef, adopt, selector_for, to_dynamic};

/// A resource kind the reconciler can materialize from a [`ComponentSpec`]
pub trait Component: Resource<DynamicType = ()> + Serialize + Send + Sync {
    /// Kind-specific payload declared on the composite
    type Payload: Send + Sync;

    /// Build the component object; name, namespace and labels are set by the caller
    fn materialize(entry: &ComponentSpec<Self::Payload>) -> Self;
}

impl Component for HelmAddon {
    type Payload = HelmAddonSpec;

    fn materialize(entry: &ComponentSpec<HelmAddonSpec>) -> Self {
        HelmAddon::new(&entry.name, entry.spec.clone())
    }
}

impl Component for ManifestAddon {
    type Payload = ManifestAddonSpec;

    fn materialize(entry: &ComponentSpec<ManifestAddonSpec>) -> Self {
        ManifestAddon::new(&entry.name, entry.spec.clone())
    }
}

impl Component for IssuerAddon {
    type Payload = IssuerConfig;

    fn materialize(entry: &ComponentSpec<IssuerConfig>) -> Self {
        IssuerAddon::new(
            &entry.name,
            IssuerAddonSpec {
                cluster_scoped: entry.cluster_scoped,
                issuer: entry.spec.issuer.clone(),
            },
        )
    }
}

/// The composite on whose behalf components are reconciled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub namespace: String,
}

impl Owner {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Labels stamped on every component of this owner
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
            (OWNER_NAME_LABEL.to_string(), self.name.clone()),
            (OWNER_NAMESPACE_LABEL.to_string(), self.namespace.clone()),
        ])
    }

    /// Selector listing every component of this owner
    pub fn selector(&self) -> String {
        selector_for(&self.labels())
    }

    /// Namespace a component lands in
    ///
    /// Cluster-scoped components are stored in the owner's namespace; their
    /// products are what is cluster-scoped.
    pub fn target_namespace<P>(&self, entry: &ComponentSpec<P>) -> String {
        if entry.cluster_scoped || entry.namespace.is_empty() {
            self.namespace.clone()
        } else {
            entry.namespace.clone()
        }
    }
}

/// What one reconcile pass did, by component display name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub moved: Vec<String>,
    pub deleted: Vec<String>,
}

impl ReconcileSummary {
    /// Whether the pass changed anything
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.moved.is_empty()
            && self.deleted.is_empty()
    }

    /// Number of components that remain declared
    pub fn declared(&self) -> usize {
        self.created.len() + self.updated.len() + self.unchanged.len() + self.moved.len()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            ("created", self.created.len()),
            ("updated", self.updated.len()),
            ("moved", self.moved.len()),
            ("deleted", self.deleted.len()),
            ("unchanged", self.unchanged.len()),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{} {}", n, label))
        .collect();

        if parts.is_empty() {
            "no components".to_string()
        } else {
            parts.join(", ")
        }
    }

    fn merge(&mut self, other: ReconcileSummary) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.unchanged.extend(other.unchanged);
        self.moved.extend(other.moved);
        self.deleted.extend(other.deleted);
    }
}

/// Ensure a namespace exists, tolerating a concurrent create
pub async fn ensure_namespace(store: &dyn ObjectStore, name: &str) -> Result<bool> {
    let key = ObjectKey::of::<Namespace>(None, name);
    if store.get_opt(&key).await?.is_some() {
        return Ok(false);
    }

    let mut ns = Namespace::default();
    ns.metadata.name = Some(name.to_string());
    match store.create(&to_dynamic(&ns)?).await {
        Ok(_) => {
            info!(namespace = name, "created namespace");
            Ok(true)
        }
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Reconciles desired components against installed ones
pub struct ComponentReconciler {
    store: Arc<dyn ObjectStore>,
    propagation: Propagation,
}

impl ComponentReconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            propagation: Propagation::Background,
        }
    }

    /// Propagation used when deleting components
    #[must_use]
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Reconcile every component kind of a composite
    pub async fn reconcile_all(
        &self,
        owner: &Owner,
        helm: &[ComponentSpec<HelmAddonSpec>],
        manifests: &[ComponentSpec<ManifestAddonSpec>],
        issuers: &[ComponentSpec<IssuerConfig>],
    ) -> Result<ReconcileSummary> {
        let mut summary = self.reconcile::<HelmAddon>(owner, helm).await?;
        summary.merge(self.reconcile::<ManifestAddon>(owner, manifests).await?);
        summary.merge(self.reconcile::<IssuerAddon>(owner, issuers).await?);
        Ok(summary)
    }

    /// Drive installed components of kind `C` to match `desired`
    ///
    /// Desired components are applied in input order; components no longer
    /// declared are deleted only after all of them have been applied. Any
    /// store error aborts the pass; re-running it is safe.
    pub async fn reconcile<C: Component>(
        &self,
        owner: &Owner,
        desired: &[ComponentSpec<C::Payload>],
    ) -> Result<ReconcileSummary> {
        let type_ = TypeRef::of::<C>();
        let mut summary = ReconcileSummary::default();

        // Removal candidates, indexed by name
        let installed = self
            .store
            .list(&type_, None, Some(&owner.selector()))
            .await?;
        let mut candidates: HashMap<String, Vec<DynamicObject>> = HashMap::new();
        for obj in installed {
            candidates.entry(obj.name_any()).or_default().push(obj);
        }

        for entry in desired {
            let namespace = owner.target_namespace(entry);
            ensure_namespace(self.store.as_ref(), &namespace).await?;

            let desired_obj = self.materialize::<C>(owner, entry, &namespace)?;
            let key = ObjectKey::namespaced(type_.clone(), &namespace, &entry.name);
            let label = key.to_string();

            let existing = match take_match(&mut candidates, &entry.name, &namespace) {
                Some(obj) => Some(obj),
                // Present in the target namespace but not labelled as ours
                None => self.store.get_opt(&key).await?,
            };

            match existing {
                None => {
                    self.store.create(&desired_obj).await?;
                    info!(component = %label, "created component");
                    summary.created.push(label);
                }
                Some(existing) if existing.namespace().as_deref() == Some(namespace.as_str()) => {
                    if spec_and_labels_match(&desired_obj, &existing) {
                        debug!(component = %label, "component unchanged");
                        summary.unchanged.push(label);
                    } else {
                        self.store.update(&adopt(&desired_obj, &existing)).await?;
                        info!(component = %label, "updated component");
                        summary.updated.push(label);
                    }
                }
                Some(existing) => {
                    // Updates cannot change a namespace: delete, then recreate
                    let old_key = ObjectKey::from_object(&existing)?;
                    self.store
                        .delete_if_exists(&old_key, self.propagation)
                        .await?;
                    self.store.create(&desired_obj).await?;
                    info!(from = %old_key, to = %label, "moved component");
                    summary.moved.push(label);
                }
            }
        }

        for obj in candidates.into_values().flatten() {
            let key = ObjectKey::from_object(&obj)?;
            if self.store.delete_if_exists(&key, self.propagation).await? {
                info!(component = %key, "deleted undeclared component");
            }
            summary.deleted.push(key.to_string());
        }

        info!(
            owner = %format!("{}/{}", owner.namespace, owner.name),
            kind = %type_.kind,
            summary = %summary.summary(),
            "reconciled components"
        );
        Ok(summary)
    }

    fn materialize<C: Component>(
        &self,
        owner: &Owner,
        entry: &ComponentSpec<C::Payload>,
        namespace: &str,
    ) -> Result<DynamicObject> {
        let mut component = C::materialize(entry);
        let meta = component.meta_mut();
        meta.name = Some(entry.name.clone());
        meta.namespace = Some(namespace.to_string());
        meta.labels = Some(owner.labels());
        to_dynamic(&component)
    }
}

/// Take the installed component matching a desired name
///
/// Prefers the one already in the target namespace; other installed objects
/// sharing the name stay removal candidates.
fn take_match(
    candidates: &mut HashMap<String, Vec<DynamicObject>>,
    name: &str,
    namespace: &str,
) -> Option<DynamicObject> {
    let objs = candidates.get_mut(name)?;
    let pos = objs
        .iter()
        .position(|o| o.metadata.namespace.as_deref() == Some(namespace))
        .unwrap_or(0);
    let found = (!objs.is_empty()).then(|| objs.remove(pos));
    if objs.is_empty() {
        candidates.remove(name);
    }
    found
}

fn spec_and_labels_match(desired: &DynamicObject, existing: &DynamicObject) -> bool {
    let labels_match = desired.labels().iter().all(|(k, v)| existing.labels().get(k) == Some(v));
    labels_match && desired.data.get("spec") == existing.data.get("spec")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RETRIED_AT_ANNOTATION;
    use crate::store::{MockOp, MockStore, Mutation, from_dynamic};

    fn manifest(name: &str, url: &str) -> ComponentSpec<ManifestAddonSpec> {
        ComponentSpec::new(name, ManifestAddonSpec::new(url))
    }

    fn setup() -> (MockStore, ComponentReconciler, Owner) {
        let store = MockStore::new();
        let mut ns = Namespace::default();
        ns.metadata.name = Some("ns1".to_string());
        store.insert(to_dynamic(&ns).unwrap());
        let reconciler = ComponentReconciler::new(Arc::new(store.clone()));
        (store, reconciler, Owner::new("platform", "ns1"))
    }

    fn installed_names(store: &MockStore) -> Vec<(String, String)> {
        let mut names: Vec<_> = store
            .objects_of("ManifestAddon")
            .iter()
            .map(|o| (o.namespace().unwrap_or_default(), o.name_any()))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_single_component_defaults_to_owner_namespace() {
        let (store, reconciler, owner) = setup();
        let desired = vec![manifest("a", "https://example.com/a.yaml")];

        let summary = reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.unwrap();

        assert_eq!(summary.created, vec!["ManifestAddon ns1/a"]);
        let creates: Vec<Mutation> = store
            .journal()
            .into_iter()
            .filter(|m| m.op == MockOp::Create)
            .collect();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].kind, "ManifestAddon");
        assert_eq!(creates[0].namespace.as_deref(), Some("ns1"));
        assert_eq!(creates[0].name, "a");
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let (store, reconciler, owner) = setup();
        let desired = vec![
            manifest("a", "https://example.com/a.yaml"),
            manifest("b", "https://example.com/b.yaml").in_namespace("other"),
        ];

        reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.unwrap();
        store.reset_counts();

        let summary = reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.unwrap();
        assert!(summary.is_noop());
        assert_eq!(summary.unchanged.len(), 2);
        assert_eq!(store.operation_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_converges_to_desired_names() {
        let (store, reconciler, owner) = setup();
        let first = vec![
            manifest("a", "https://example.com/a.yaml"),
            manifest("b", "https://example.com/b.yaml"),
            manifest("c", "https://example.com/c.yaml"),
        ];
        reconciler.reconcile::<ManifestAddon>(&owner, &first).await.unwrap();

        let second = vec![
            manifest("b", "https://example.com/b2.yaml"),
            manifest("d", "https://example.com/d.yaml"),
        ];
        let summary = reconciler.reconcile::<ManifestAddon>(&owner, &second).await.unwrap();

        assert_eq!(
            installed_names(&store),
            vec![("ns1".into(), "b".into()), ("ns1".into(), "d".into())]
        );
        assert_eq!(summary.updated, vec!["ManifestAddon ns1/b"]);
        assert_eq!(summary.created, vec!["ManifestAddon ns1/d"]);
        assert_eq!(summary.deleted.len(), 2);

        let b: ManifestAddon = from_dynamic(
            &store
                .object(&ObjectKey::of::<ManifestAddon>(Some("ns1"), "b"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(b.spec.url, "https://example.com/b2.yaml");
    }

    #[tokio::test]
    async fn test_deletes_happen_after_applies() {
        let (store, reconciler, owner) = setup();
        reconciler
            .reconcile::<ManifestAddon>(&owner, &[manifest("old", "https://example.com/old.yaml")])
            .await
            .unwrap();
        store.reset_counts();

        reconciler
            .reconcile::<ManifestAddon>(&owner, &[manifest("new", "https://example.com/new.yaml")])
            .await
            .unwrap();
        assert_eq!(
            store.journal_lines(),
            vec!["create ManifestAddon ns1/new", "delete ManifestAddon ns1/old"]
        );
    }

    #[tokio::test]
    async fn test_namespace_move_deletes_then_recreates() {
        let (store, reconciler, owner) = setup();
        let in_a = vec![manifest("a", "https://example.com/a.yaml").in_namespace("nsa")];
        reconciler.reconcile::<ManifestAddon>(&owner, &in_a).await.unwrap();
        let before = store
            .object(&ObjectKey::of::<ManifestAddon>(Some("nsa"), "a"))
            .unwrap();
        store.reset_counts();

        let in_b = vec![manifest("a", "https://example.com/a.yaml").in_namespace("nsb")];
        let summary = reconciler.reconcile::<ManifestAddon>(&owner, &in_b).await.unwrap();

        assert_eq!(summary.moved, vec!["ManifestAddon nsb/a"]);
        assert!(summary.deleted.is_empty());
        assert_eq!(installed_names(&store), vec![("nsb".into(), "a".into())]);

        let after = store
            .object(&ObjectKey::of::<ManifestAddon>(Some("nsb"), "a"))
            .unwrap();
        assert_ne!(after.metadata.resource_version, before.metadata.resource_version);
        assert_ne!(after.metadata.uid, before.metadata.uid);

        let lines = store.journal_lines();
        let delete = lines.iter().position(|l| l == "delete ManifestAddon nsa/a").unwrap();
        let create = lines.iter().position(|l| l == "create ManifestAddon nsb/a").unwrap();
        assert!(delete < create);
    }

    #[tokio::test]
    async fn test_creates_missing_namespace() {
        let (store, reconciler, owner) = setup();
        let desired = vec![manifest("a", "https://example.com/a.yaml").in_namespace("fresh")];
        reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.unwrap();

        assert!(store.object(&ObjectKey::of::<Namespace>(None, "fresh")).is_some());
        assert_eq!(
            store.journal_lines()[..2],
            ["create Namespace fresh", "create ManifestAddon fresh/a"]
        );
    }

    #[tokio::test]
    async fn test_cluster_scoped_component_lives_with_owner() {
        let (store, reconciler, owner) = setup();
        let desired = vec![
            ComponentSpec::new(
                "selfsigned",
                IssuerConfig {
                    issuer: serde_json::json!({"selfSigned": {}}),
                },
            )
            .in_namespace("ignored")
            .cluster_scoped(),
        ];
        reconciler.reconcile::<IssuerAddon>(&owner, &desired).await.unwrap();

        let obj = store
            .object(&ObjectKey::of::<IssuerAddon>(Some("ns1"), "selfsigned"))
            .unwrap();
        let issuer: IssuerAddon = from_dynamic(&obj).unwrap();
        assert!(issuer.spec.cluster_scoped);
        assert_eq!(issuer.labels()[OWNER_NAME_LABEL], "platform");
    }

    #[tokio::test]
    async fn test_adopts_unlabelled_existing_component() {
        let (store, reconciler, owner) = setup();
        let mut stray = ManifestAddon::new("a", ManifestAddonSpec::new("https://example.com/old.yaml"));
        stray.metadata.namespace = Some("ns1".to_string());
        store.insert(to_dynamic(&stray).unwrap());

        let desired = vec![manifest("a", "https://example.com/a.yaml")];
        let summary = reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.unwrap();

        assert_eq!(summary.updated, vec!["ManifestAddon ns1/a"]);
        let obj = store
            .object(&ObjectKey::of::<ManifestAddon>(Some("ns1"), "a"))
            .unwrap();
        assert_eq!(obj.labels()[MANAGED_BY_LABEL], MANAGED_BY);
    }

    #[tokio::test]
    async fn test_update_keeps_annotations() {
        let (store, reconciler, owner) = setup();
        reconciler
            .reconcile::<ManifestAddon>(&owner, &[manifest("a", "https://example.com/a.yaml")])
            .await
            .unwrap();

        let key = ObjectKey::of::<ManifestAddon>(Some("ns1"), "a");
        let mut live = store.object(&key).unwrap();
        live.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(RETRIED_AT_ANNOTATION.to_string(), "2026-01-01T00:00:00Z".to_string());
        store.update(&live).await.unwrap();

        let summary = reconciler
            .reconcile::<ManifestAddon>(&owner, &[manifest("a", "https://example.com/v2.yaml")])
            .await
            .unwrap();

        assert_eq!(summary.updated, vec!["ManifestAddon ns1/a"]);
        let updated: ManifestAddon = from_dynamic(&store.object(&key).unwrap()).unwrap();
        assert_eq!(updated.spec.url, "https://example.com/v2.yaml");
        assert_eq!(updated.annotations()[RETRIED_AT_ANNOTATION], "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_other_owners_untouched() {
        let (store, reconciler, owner) = setup();
        let other = Owner::new("other", "ns1");
        reconciler
            .reconcile::<ManifestAddon>(&other, &[manifest("theirs", "https://example.com/t.yaml")])
            .await
            .unwrap();

        reconciler.reconcile::<ManifestAddon>(&owner, &[]).await.unwrap();
        assert_eq!(installed_names(&store), vec![("ns1".into(), "theirs".into())]);
    }

    #[tokio::test]
    async fn test_store_error_aborts_pass() {
        let (store, reconciler, owner) = setup();
        store.fail_on(MockOp::Create, "ManifestAddon");

        let desired = vec![
            manifest("a", "https://example.com/a.yaml"),
            manifest("b", "https://example.com/b.yaml"),
        ];
        assert!(reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.is_err());
        assert!(installed_names(&store).is_empty());

        // Next pass converges
        reconciler.reconcile::<ManifestAddon>(&owner, &desired).await.unwrap();
        assert_eq!(installed_names(&store).len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_all_kinds() {
        let (store, reconciler, owner) = setup();
        let helm = vec![ComponentSpec::new(
            "cert-manager",
            HelmAddonSpec {
                chart: "cert-manager".to_string(),
                repository: "https://charts.jetstack.io".to_string(),
                version: "v1.16.0".to_string(),
                values: serde_json::Value::Null,
                target_namespace: None,
                interval: std::time::Duration::from_secs(600),
            },
        )];
        let manifests = vec![manifest("a", "https://example.com/a.yaml")];

        let summary = reconciler
            .reconcile_all(&owner, &helm, &manifests, &[])
            .await
            .unwrap();
        assert_eq!(summary.created.len(), 2);
        assert_eq!(summary.declared(), 2);
        assert_eq!(store.objects_of("HelmAddon").len(), 1);
        assert_eq!(summary.summary(), "2 created");
    }

    #[test]
    fn test_summary_formatting() {
        let summary = ReconcileSummary {
            created: vec!["a".into()],
            deleted: vec!["b".into(), "c".into()],
            ..Default::default()
        };
        assert_eq!(summary.summary(), "1 created, 2 deleted");
        assert_eq!(ReconcileSummary::default().summary(), "no components");
    }
}

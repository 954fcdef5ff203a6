//! Manifest lifecycle: render, fingerprint, apply, track, prune and remove
//!
//! Tracking state lives in a [`ManifestRecord`] next to the component, so a
//! restarted controller picks up exactly where the previous one stopped.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use stowage_core::{ComponentStatus, FailurePolicy, StatusType, TrackedObject, fingerprint};
use tracing::{debug, info, warn};

use crate::crd::{
    MANAGED_BY, MANAGED_BY_LABEL, MANIFEST_LABEL, ManifestAddon, ManifestAddonSpec,
    ManifestRecord, ManifestRecordSpec, RETRIED_AT_ANNOTATION,
};
use crate::error::{KubeError, Result};
use crate::kinds::{PreparedObject, prepare};
use crate::renderer::OverlayRenderer;
use crate::store::{ObjectKey, ObjectStore, Propagation, adopt, from_dynamic, to_dynamic};

/// Interval between health polls while awaiting availability
pub const AWAIT_INTERVAL: Duration = Duration::from_secs(5);

/// What an apply did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Fingerprint of the render
    pub fingerprint: String,
    /// Whether anything was written
    pub changed: bool,
    /// Objects created or adopted
    pub applied: usize,
    /// Stale objects deleted
    pub pruned: usize,
    /// Objects tracked after the apply
    pub objects: Vec<TrackedObject>,
}

/// Applies and removes manifest components
pub struct ManifestController {
    store: Arc<dyn ObjectStore>,
    renderer: Arc<dyn OverlayRenderer>,
}

impl ManifestController {
    pub fn new(store: Arc<dyn ObjectStore>, renderer: Arc<dyn OverlayRenderer>) -> Self {
        Self { store, renderer }
    }

    fn record_key(namespace: &str, name: &str) -> ObjectKey {
        ObjectKey::of::<ManifestRecord>(Some(namespace), name)
    }

    /// Current tracking record of a component
    pub async fn record(&self, namespace: &str, name: &str) -> Result<Option<ManifestRecord>> {
        self.store
            .get_opt(&Self::record_key(namespace, name))
            .await?
            .as_ref()
            .map(from_dynamic)
            .transpose()
    }

    /// Render a component and bring its objects in line with the render
    ///
    /// An unchanged render whose objects are all tracked performs no writes.
    /// Otherwise the record is marked pending, every rendered object is
    /// created (or adopted when it already exists) and tracked one by one,
    /// tracked objects the render no longer produces are deleted, and the
    /// pending checksum is promoted.
    pub async fn apply(
        &self,
        namespace: &str,
        name: &str,
        spec: &ManifestAddonSpec,
        owner: Option<OwnerReference>,
    ) -> Result<ApplyReport> {
        let rendered = self
            .renderer
            .render(&spec.url, &spec.patches, &spec.images)
            .await?;
        let fp = fingerprint(&rendered);

        let source = String::from_utf8(rendered)
            .map_err(|e| KubeError::InvalidManifest(format!("render is not UTF-8: {}", e)))?;
        let labels = BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
            (MANIFEST_LABEL.to_string(), name.to_string()),
        ]);
        let prepared = stowage_core::parse_documents(&source)?
            .into_iter()
            .map(|doc| prepare(doc, namespace, &labels))
            .collect::<Result<Vec<PreparedObject>>>()?;
        let identities: Vec<TrackedObject> = prepared.iter().map(PreparedObject::tracked).collect();

        let mut record = match self.record(namespace, name).await? {
            None => {
                let mut record = ManifestRecord::new(name, ManifestRecordSpec::from_addon(spec, &fp));
                record.metadata.namespace = Some(namespace.to_string());
                record.metadata.owner_references = owner.map(|o| vec![o]);
                let created = self.store.create(&to_dynamic(&record)?).await?;
                info!(manifest = name, namespace, checksum = %fp, "created manifest record");
                from_dynamic(&created)?
            }
            Some(record) if record.spec.is_current(&fp, &identities) => {
                debug!(manifest = name, namespace, "render unchanged");
                return Ok(ApplyReport {
                    fingerprint: fp,
                    changed: false,
                    objects: record.spec.objects,
                    ..Default::default()
                });
            }
            Some(mut record) => {
                let before = record.spec.clone();
                record.spec.begin_change(&fp, spec);
                if record.spec != before {
                    info!(
                        manifest = name,
                        namespace,
                        checksum = %record.spec.checksum,
                        pending = %record.spec.new_checksum,
                        "render changed"
                    );
                    record = self.save(&record).await?;
                }
                record
            }
        };

        let mut report = ApplyReport {
            fingerprint: fp,
            changed: true,
            ..Default::default()
        };

        for object in &prepared {
            self.create_or_adopt(object).await?;
            report.applied += 1;
            // Persist after each object so an interrupted apply never loses one
            if record.spec.track(object.tracked()) {
                record = self.save(&record).await?;
            }
        }

        for stale in record.spec.stale_objects(&identities) {
            let key = ObjectKey::from_tracked(&stale);
            if self.store.delete_if_exists(&key, Propagation::Background).await? {
                info!(object = %stale, manifest = name, "deleted object no longer rendered");
            }
            report.pruned += 1;
            record.spec.untrack(&stale);
            record = self.save(&record).await?;
        }

        if record.spec.promote() {
            record = self.save(&record).await?;
        }

        info!(
            manifest = name,
            namespace,
            applied = report.applied,
            pruned = report.pruned,
            "applied manifest"
        );
        report.objects = record.spec.objects;
        Ok(report)
    }

    /// Create an object, updating it to the rendered content if it already exists
    async fn create_or_adopt(&self, object: &PreparedObject) -> Result<()> {
        match self.store.create(&object.object).await {
            Ok(_) => {
                debug!(object = %object.key, "created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                let existing = self.store.get(&object.key).await?;
                self.store.update(&adopt(&object.object, &existing)).await?;
                debug!(object = %object.key, "adopted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, record: &ManifestRecord) -> Result<ManifestRecord> {
        let updated = self.store.update(&to_dynamic(record)?).await?;
        from_dynamic(&updated)
    }

    /// Delete every tracked object in list order, then the record
    pub async fn remove(&self, namespace: &str, name: &str) -> Result<usize> {
        let Some(record) = self.record(namespace, name).await? else {
            debug!(manifest = name, namespace, "no manifest record to remove");
            return Ok(0);
        };

        let mut deleted = 0;
        for obj in &record.spec.objects {
            if self
                .store
                .delete_if_exists(&ObjectKey::from_tracked(obj), Propagation::Background)
                .await?
            {
                deleted += 1;
            } else {
                warn!(object = %obj, manifest = name, "tracked object already gone");
            }
        }

        self.store
            .delete_if_exists(&Self::record_key(namespace, name), Propagation::Background)
            .await?;
        info!(manifest = name, namespace, deleted, "removed manifest");
        Ok(deleted)
    }

    /// Remove and re-apply a component, stamping it with the retry time
    ///
    /// The stamp is a spec-level mutation, so the retry timeout restarts.
    pub async fn retry(&self, addon: &ManifestAddon, owner: Option<OwnerReference>) -> Result<ApplyReport> {
        let (namespace, name) = identity(&addon.metadata)?;
        warn!(manifest = name, namespace, "retrying unhealthy manifest");

        self.remove(namespace, name).await?;
        let report = self.apply(namespace, name, &addon.spec, owner).await?;

        let key = ObjectKey::of::<ManifestAddon>(Some(namespace), name);
        let mut live: ManifestAddon = from_dynamic(&self.store.get(&key).await?)?;
        live.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(RETRIED_AT_ANNOTATION.to_string(), Utc::now().to_rfc3339());
        self.store.update(&to_dynamic(&live)?).await?;

        Ok(report)
    }

    /// Poll a component's stored status until it is Available
    pub async fn await_addon(&self, namespace: &str, name: &str, timeout: Duration) -> Result<ComponentStatus> {
        let key = ObjectKey::of::<ManifestAddon>(Some(namespace), name);
        let (store, key) = (&self.store, &key);
        await_available(timeout, AWAIT_INTERVAL, || async move {
            let addon: Option<ManifestAddon> = store.get_opt(key).await?.as_ref().map(from_dynamic).transpose()?;
            Ok(addon.and_then(|a| a.status))
        })
        .await
    }
}

fn identity(meta: &ObjectMeta) -> Result<(&str, &str)> {
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(ns), Some(name)) => Ok((ns, name)),
        _ => Err(KubeError::InvalidObject(
            "manifest component needs a name and namespace".to_string(),
        )),
    }
}

/// Last time anything other than the status changed
///
/// Taken from managed-field entries that are not for the status subresource,
/// falling back to the creation time.
pub fn last_spec_change(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    meta.managed_fields
        .iter()
        .flatten()
        .filter(|entry| entry.subresource.as_deref() != Some("status"))
        .filter_map(|entry| entry.time.as_ref().map(|t| t.0))
        .max()
        .or_else(|| meta.creation_timestamp.as_ref().map(|t| t.0))
}

/// Whether an unhealthy component should be removed and re-applied
///
/// Only `Retry` components that are `Unhealthy` and have a timeout qualify,
/// and only once the timeout has elapsed since the last spec change.
pub fn should_retry(addon: &ManifestAddon, now: DateTime<Utc>) -> bool {
    if addon.spec.failure_policy != FailurePolicy::Retry {
        return false;
    }
    if addon.status.as_ref().map(|s| s.type_) != Some(StatusType::Unhealthy) {
        return false;
    }
    let Some(timeout) = addon.spec.timeout else {
        return false;
    };
    let Ok(timeout) = chrono::Duration::from_std(timeout) else {
        return false;
    };

    match last_spec_change(&addon.metadata) {
        Some(changed) => now >= changed + timeout,
        None => true,
    }
}

/// Poll until `probe` reports Available or `timeout` elapses
///
/// `probe` returning `None` (no status yet) keeps polling.
pub async fn await_available<F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Result<ComponentStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<ComponentStatus>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = probe().await? {
            if status.type_ == StatusType::Available {
                return Ok(status);
            }
        }

        if tokio::time::Instant::now() + interval > deadline {
            return Err(KubeError::Timeout(format!("{}s", timeout.as_secs())));
        }
        tokio::time::sleep(interval).await;
    }
}

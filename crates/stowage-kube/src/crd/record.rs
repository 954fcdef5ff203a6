//! Persisted tracking state of a manifest component

use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stowage_core::{FailurePolicy, ImageSubstitution, Patch, TrackedObject};

use super::ManifestAddonSpec;

/// Tracking record for a manifest component
///
/// `checksum` is the fingerprint of the last render that was fully applied.
/// A non-empty `newChecksum` marks a render whose application has started
/// but not finished.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stowage.io",
    version = "v1alpha1",
    kind = "ManifestRecord",
    namespaced,
    printcolumn = r#"{"name":"Checksum","type":"string","jsonPath":".spec.checksum"}"#,
    printcolumn = r#"{"name":"Pending","type":"string","jsonPath":".spec.newChecksum"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecordSpec {
    pub url: String,

    #[serde(default)]
    pub checksum: String,

    #[serde(default)]
    pub new_checksum: String,

    /// Objects created from the render, in creation order
    #[serde(default)]
    pub objects: Vec<TrackedObject>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSubstitution>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,
}

impl ManifestRecordSpec {
    /// Fresh record for a first apply
    pub fn from_addon(addon: &ManifestAddonSpec, fingerprint: &str) -> Self {
        Self {
            url: addon.url.clone(),
            checksum: fingerprint.to_string(),
            new_checksum: String::new(),
            objects: Vec::new(),
            patches: addon.patches.clone(),
            images: addon.images.clone(),
            failure_policy: addon.failure_policy,
            timeout: addon.timeout,
        }
    }

    /// Nothing to do: the render was applied and every rendered object is tracked
    pub fn is_current(&self, fingerprint: &str, rendered: &[TrackedObject]) -> bool {
        self.checksum == fingerprint
            && self.new_checksum.is_empty()
            && rendered.iter().all(|obj| self.is_tracked(obj))
    }

    /// Mark a render as pending, keeping the last applied checksum
    pub fn begin_change(&mut self, fingerprint: &str, addon: &ManifestAddonSpec) {
        if self.checksum != fingerprint {
            self.new_checksum = fingerprint.to_string();
        }
        self.url = addon.url.clone();
        self.patches = addon.patches.clone();
        self.images = addon.images.clone();
        self.failure_policy = addon.failure_policy;
        self.timeout = addon.timeout;
    }

    pub fn is_tracked(&self, obj: &TrackedObject) -> bool {
        self.objects.iter().any(|o| o.same_identity(obj))
    }

    /// Record a created object; returns false if it was already tracked as-is
    pub fn track(&mut self, obj: TrackedObject) -> bool {
        match self.objects.iter_mut().find(|o| o.same_identity(&obj)) {
            Some(existing) if *existing == obj => false,
            Some(existing) => {
                *existing = obj;
                true
            }
            None => {
                self.objects.push(obj);
                true
            }
        }
    }

    pub fn untrack(&mut self, obj: &TrackedObject) {
        self.objects.retain(|o| !o.same_identity(obj));
    }

    /// Tracked objects the given render no longer produces
    pub fn stale_objects(&self, rendered: &[TrackedObject]) -> Vec<TrackedObject> {
        self.objects
            .iter()
            .filter(|o| !rendered.iter().any(|r| r.same_identity(o)))
            .cloned()
            .collect()
    }

    /// Promote the pending checksum; returns false if nothing was pending
    pub fn promote(&mut self) -> bool {
        if self.new_checksum.is_empty() {
            return false;
        }
        self.checksum = std::mem::take(&mut self.new_checksum);
        true
    }
}

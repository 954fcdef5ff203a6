//! Custom resources managed by Stowage
//!
//! All resources live in the `stowage.io/v1alpha1` API group:
//! - [`AddonSet`]: the composite listing every desired component
//! - [`HelmAddon`], [`ManifestAddon`], [`IssuerAddon`]: materialized components
//! - [`ManifestRecord`]: persisted tracking state of a manifest component

mod addonset;
mod components;
mod record;

pub use addonset::{AddonSet, AddonSetSpec, AddonSetStatus, ComponentSpec};
pub use components::{
    HelmAddon, HelmAddonSpec, IssuerAddon, IssuerAddonSpec, IssuerConfig, ManifestAddon,
    ManifestAddonSpec,
};
pub use record::{ManifestRecord, ManifestRecordSpec};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group of every Stowage resource
pub const GROUP: &str = "stowage.io";

/// Finalizer guarding cleanup of produced objects
pub const FINALIZER: &str = "stowage.io/cleanup";

/// Standard label marking objects written by Stowage
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "stowage";

/// Labels linking a component back to its composite
pub const OWNER_NAME_LABEL: &str = "stowage.io/owner-name";
pub const OWNER_NAMESPACE_LABEL: &str = "stowage.io/owner-namespace";

/// Label carried by every object rendered from a manifest component
pub const MANIFEST_LABEL: &str = "stowage.io/manifest";

/// Stamped on a manifest component each time it is removed and re-applied
pub const RETRIED_AT_ANNOTATION: &str = "stowage.io/retried-at";

/// All custom resource definitions, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        AddonSet::crd(),
        HelmAddon::crd(),
        ManifestAddon::crd(),
        IssuerAddon::crd(),
        ManifestRecord::crd(),
    ]
}

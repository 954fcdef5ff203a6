//! Stowage Kube - add-on reconciliation against a Kubernetes cluster
//!
//! This crate provides:
//! - **Custom resources**: the `AddonSet` composite, its three component
//!   kinds and the persisted manifest tracking record
//! - **Object store seam**: [`ObjectStore`] with a kube-backed and an
//!   in-memory implementation
//! - **Component reconciliation**: converge a composite's declared
//!   components onto the installed ones
//! - **Manifest lifecycle**: render, fingerprint, apply, prune and retry
//!   manifest bundles
//! - **Health**: aggregate workload readiness into a component status
//! - **Releases and issuers**: Flux-backed charts and cert-manager issuers
//! - **Lifecycle hooks**: install/uninstall timing for monitoring

pub mod crd;
pub mod error;
pub mod health;
pub mod issuer;
pub mod kinds;
pub mod manifest;
pub mod observe;
pub mod reconciler;
pub mod release;
pub mod renderer;
pub mod store;

pub use crd::{
    AddonSet, AddonSetSpec, AddonSetStatus, ComponentSpec, HelmAddon, HelmAddonSpec, IssuerAddon,
    IssuerAddonSpec, IssuerConfig, ManifestAddon, ManifestAddonSpec, ManifestRecord, ManifestRecordSpec,
};
pub use error::{KubeError, Result};
pub use health::{StatusAggregator, Verdict};
pub use issuer::IssuerController;
pub use manifest::{ApplyReport, ManifestController, should_retry};
pub use observe::{LifecycleObserver, LifecycleOperation, LifecycleTimer, Outcome, TracingObserver};
pub use reconciler::{Component, ComponentReconciler, Owner, ReconcileSummary};
pub use release::{ReleaseController, ReleaseOutcome};
pub use renderer::{HttpOverlayRenderer, OverlayRenderer};
pub use store::{KubeStore, MockStore, ObjectKey, ObjectStore, Propagation, TypeRef};

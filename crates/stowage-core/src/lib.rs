//! Stowage Core - Core types and utilities for the Kubernetes add-on controller
//!
//! This crate provides the cluster-independent building blocks used throughout Stowage:
//! - `ComponentStatus`: The single health value rolled up for every component
//! - `TrackedObject`: Identity records for objects produced from a manifest
//! - `Patch` / `ImageSubstitution`: Structural overlays applied to fetched manifests
//! - `fingerprint`: Content-addressed drift detection over rendered manifests

pub mod error;
pub mod manifest;
pub mod overlay;
pub mod schema;
pub mod status;

pub use error::{CoreError, Result};
pub use manifest::{FailurePolicy, TrackedObject, fingerprint};
pub use overlay::{ImageSubstitution, Patch, PatchTarget, parse_documents, render};
pub use status::{ComponentStatus, StatusType};

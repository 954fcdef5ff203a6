//! Operator error types
//!
//! [`ControllerError`] is what a single reconcile returns; kube-runtime logs
//! it and the error policy requeues. [`OperatorError`] covers failures of the
//! binary itself and renders through miette.

use kube::runtime::finalizer;
use miette::Diagnostic;
use stowage_kube::KubeError;
use thiserror::Error;

/// Error from one reconcile
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Kube(#[from] KubeError),

    #[error("Finalizer failed: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    #[error("{kind} {name} has no namespace")]
    MissingNamespace { kind: String, name: String },
}

impl From<kube::Error> for ControllerError {
    fn from(err: kube::Error) -> Self {
        Self::Kube(KubeError::from(err))
    }
}

impl From<stowage_core::CoreError> for ControllerError {
    fn from(err: stowage_core::CoreError) -> Self {
        Self::Kube(KubeError::from(err))
    }
}

/// Top-level failure of the `stowage` binary
#[derive(Error, Debug, Diagnostic)]
pub enum OperatorError {
    #[error("Failed to connect to the cluster: {0}")]
    #[diagnostic(
        code(stowage::operator::client),
        help("check KUBECONFIG or the in-cluster service account")
    )]
    Client(#[source] kube::Error),

    #[error("Failed to render CRDs: {message}")]
    #[diagnostic(code(stowage::operator::crdgen))]
    CrdGen { message: String },

    #[error("Failed to initialise logging: {message}")]
    #[diagnostic(code(stowage::operator::logging), help("RUST_LOG and --log-level take tracing filter directives, e.g. 'info,stowage_kube=debug'"))]
    Logging { message: String },

    #[error(transparent)]
    #[diagnostic(code(stowage::operator::kube))]
    Kube(#[from] KubeError),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

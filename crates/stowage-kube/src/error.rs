//! Error types for stowage-kube

use thiserror::Error;

/// Result type for stowage-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while driving the cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error that is neither a missing nor a conflicting object
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist
    #[error("{key} not found")]
    NotFound { key: String },

    /// Object already exists
    #[error("{key} already exists")]
    AlreadyExists { key: String },

    /// Stale concurrency token
    #[error("conflict updating {key}: {message}")]
    Conflict { key: String, message: String },

    /// Overlay rendering failed (bad patch, unparsable source)
    #[error("failed to render manifest '{url}': {message}")]
    Render { url: String, message: String },

    /// Manifest source answered with a non-200 status
    #[error("fetching '{url}' returned HTTP {status}")]
    Fetch { url: String, status: u16 },

    /// Transport error while fetching a manifest source
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Manifest source is not usable
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Object is missing identity fields
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deadline expired
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// IO error (local manifest sources)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the cluster-independent core
    #[error(transparent)]
    Core(#[from] stowage_core::CoreError),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        match self {
            KubeError::AlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Check if this is a stale-update conflict (409 other than AlreadyExists)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Errors caused by the declared input rather than the cluster
    ///
    /// These are reported on the component status so the user can fix them.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            KubeError::Render { .. }
                | KubeError::Fetch { .. }
                | KubeError::InvalidManifest(_)
                | KubeError::Core(_)
        )
    }

    /// Classify a kube client error against the object it was about
    pub(crate) fn from_kube(err: kube::Error, key: impl std::fmt::Display) -> Self {
        if let kube::Error::Api(resp) = &err {
            match resp.code {
                404 => return KubeError::NotFound { key: key.to_string() },
                409 if resp.reason == "AlreadyExists" => {
                    return KubeError::AlreadyExists { key: key.to_string() };
                }
                409 => {
                    return KubeError::Conflict {
                        key: key.to_string(),
                        message: resp.message.clone(),
                    };
                }
                _ => {}
            }
        }
        KubeError::Api(err)
    }
}

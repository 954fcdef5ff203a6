//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to parse manifest YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to convert JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid manifest document {index}: {message}")]
    InvalidDocument { index: usize, message: String },

    #[error("Invalid patch: {message}")]
    InvalidPatch { message: String },

    #[error("Status '{status}' requires a non-empty reason")]
    MissingReason { status: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;

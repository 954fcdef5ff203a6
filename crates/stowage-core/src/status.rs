//! Component health status
//!
//! Every managed component exposes exactly one health value in its `status`
//! block. `Unhealthy` and `Degraded` must always carry a reason so the
//! declaring user can tell what went wrong.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Health classification of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StatusType {
    /// All produced workloads are serving
    Available,
    /// Workloads are still rolling out
    Progressing,
    /// Partially working, or an input error the user must fix
    Degraded,
    /// The produced resource reports itself ready (issuers)
    Ready,
    /// A produced workload reported a hard failure
    Unhealthy,
}

impl StatusType {
    /// Human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Progressing => "Progressing",
            Self::Degraded => "Degraded",
            Self::Ready => "Ready",
            Self::Unhealthy => "Unhealthy",
        }
    }

    /// Whether this status must carry a reason
    pub fn requires_reason(&self) -> bool {
        matches!(self, Self::Degraded | Self::Unhealthy)
    }

    /// Whether the component is considered up
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Available | Self::Ready)
    }
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status block written onto every component resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Current health
    #[serde(rename = "type")]
    pub type_: StatusType,

    /// When `type` last changed
    pub last_transition_time: DateTime<Utc>,

    /// Machine-readable reason (required for Unhealthy/Degraded)
    ///
    /// Always serialized so that a merge patch clears a previous reason.
    #[serde(default)]
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,
}

impl ComponentStatus {
    fn new(type_: StatusType, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_,
            last_transition_time: Utc::now(),
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn available(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusType::Available, reason, message)
    }

    pub fn progressing(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusType::Progressing, reason, message)
    }

    pub fn ready(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusType::Ready, reason, message)
    }

    /// Unhealthy status; an empty reason falls back to `"Unhealthy"`
    pub fn unhealthy(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusType::Unhealthy, non_empty(reason.into(), "Unhealthy"), message)
    }

    /// Degraded status; an empty reason falls back to `"Degraded"`
    pub fn degraded(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusType::Degraded, non_empty(reason.into(), "Degraded"), message)
    }

    /// Check the reason invariant
    pub fn validate(&self) -> Result<()> {
        if self.type_.requires_reason() && self.reason.trim().is_empty() {
            return Err(CoreError::MissingReason {
                status: self.type_.to_string(),
            });
        }
        Ok(())
    }

    /// Keep the previous transition time when the type did not change
    #[must_use]
    pub fn with_transition_from(mut self, previous: Option<&ComponentStatus>) -> Self {
        if let Some(prev) = previous {
            if prev.type_ == self.type_ {
                self.last_transition_time = prev.last_transition_time;
            }
        }
        self
    }

    /// Whether two statuses say the same thing, ignoring timestamps
    pub fn same_as(&self, other: &ComponentStatus) -> bool {
        self.type_ == other.type_ && self.reason == other.reason && self.message == other.message
    }
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

//! Error taxonomy for control-plane and local-state access
//!
//! The engine never lets these cross its boundary; each strategy maps
//! them to a verdict through the policy table in `engine::fail_policy`.

use thiserror::Error;

/// Failures that can surface while gathering evidence for a verdict
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Identity or target service down, unreachable, or refusing us.
    /// Mapped to Healthy: an infrastructure outage must not restart agents.
    #[error("control plane unreachable: {0}")]
    Unreachable(String),

    /// The queried entity does not exist (ironic conductor lookup)
    #[error("not found: {0}")]
    NotFound(String),

    /// Local host state (netns directory) missing or unreadable.
    /// Mapped to Unhealthy: local readiness is fail-closed.
    #[error("local state unavailable: {0}")]
    LocalStateUnavailable(String),

    /// The control plane answered with a payload we cannot interpret
    #[error("invalid record from control plane: {0}")]
    InvalidRecord(String),
}

impl DirectoryError {
    /// Collapse transport-level reqwest failures into the unreachable class
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        DirectoryError::Unreachable(format!("{}: {}", context, err))
    }
}

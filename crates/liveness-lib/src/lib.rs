//! Liveness probe library for OpenStack control-plane agents
//!
//! This crate provides the core functionality for:
//! - Per-component liveness strategies (neutron, nova, cinder, manila, ironic)
//! - DHCP network-sync reconciliation against local kernel namespaces
//! - Cached keystone session handling
//! - Typed directory clients over the loose control-plane APIs

pub mod directory;
pub mod engine;
pub mod error;
pub mod models;
pub mod netns;
pub mod reconciler;
pub mod session;

pub use engine::LivenessEngine;
pub use error::DirectoryError;
pub use models::{
    AgentRecord, AgentState, CheckRequest, Component, NetworkAssignment, Verdict, VerdictCode,
};
pub use session::{AuthConfig, Session, SessionProvider, TokenCache};

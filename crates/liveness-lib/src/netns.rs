//! Local network-namespace observation
//!
//! The DHCP agent creates one kernel namespace per synced network, named
//! `qdhcp-<network-id>` under `/run/netns`. Listing that directory is the
//! ground truth the reconciler falls back to when the agent's
//! self-reported counter disagrees with the desired state.

use crate::error::DirectoryError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default namespace directory on a production host
pub const DEFAULT_NETNS_ROOT: &str = "/run/netns";

/// Namespace name prefix the DHCP agent uses
const QDHCP_PREFIX: &str = "qdhcp-";

/// Observes DHCP namespaces on the local host
#[derive(Debug, Clone)]
pub struct NamespaceObserver {
    root: PathBuf,
}

impl Default for NamespaceObserver {
    fn default() -> Self {
        Self::new(DEFAULT_NETNS_ROOT)
    }
}

impl NamespaceObserver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Network ids with a local DHCP namespace.
    ///
    /// An unreadable root (typically not yet created on a freshly booted
    /// host) is a local readiness failure, not a fail-open condition.
    pub fn observed_networks(&self) -> Result<HashSet<String>, DirectoryError> {
        let entries = std::fs::read_dir(&self.root).map_err(|err| {
            DirectoryError::LocalStateUnavailable(format!(
                "cannot list {}: {}",
                self.root.display(),
                err
            ))
        })?;

        let mut networks = HashSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_prefix(QDHCP_PREFIX)) {
                networks.insert(id.to_string());
            }
        }

        debug!(root = %self.root.display(), count = networks.len(), "Observed DHCP namespaces");
        Ok(networks)
    }
}

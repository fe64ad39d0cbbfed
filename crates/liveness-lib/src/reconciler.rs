//! DHCP network-synchronization reconciliation
//!
//! Cross-checks the networks the control plane believes are scheduled on
//! the local DHCP agent against the agent's own synced-network counter
//! and, when those disagree, against the kernel namespaces actually
//! present on the host.
//!
//! The two-tier structure is deliberate: the self-reported counter is
//! cheap but occasionally stale or inflated, the namespace listing is
//! ground truth but touches the filesystem, so the listing only runs when
//! the cheap comparison fails. Counts are canonically *network* counts,
//! filtered by the blacklist and admin state.

use crate::directory::ControlPlane;
use crate::error::DirectoryError;
use crate::models::{AgentRecord, NetworkAssignment, Verdict, NETWORK_BLACKLIST};
use crate::netns::NamespaceObserver;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Reconciles remote desired state with local observed state
pub struct NetworkSyncReconciler {
    observer: NamespaceObserver,
}

impl NetworkSyncReconciler {
    pub fn new(observer: NamespaceObserver) -> Self {
        Self { observer }
    }

    /// Decide whether the DHCP agent has synced its scheduled networks.
    ///
    /// Only called for an agent record that already reports itself alive.
    pub async fn reconcile(
        &self,
        plane: &ControlPlane,
        agent: &AgentRecord,
    ) -> Result<Verdict, DirectoryError> {
        let assignments = plane.list_networks_on_agent(&agent.id).await?;
        let enabled = enabled_networks(&assignments);
        let reported = agent.reported_synced_networks();

        debug!(
            agent_id = %agent.id,
            enabled = enabled.len(),
            reported = reported,
            "Comparing desired networks against self-reported sync count"
        );

        // Extra synced networks beyond the desired set are stale but
        // harmless, so <= is enough to pass without the expensive check.
        if enabled.len() as u64 <= reported {
            return Ok(Verdict::healthy(format!(
                "dhcp agent reports {} synced networks for {} desired",
                reported,
                enabled.len()
            )));
        }

        let observed = self.observer.observed_networks()?;
        Ok(judge_sync_gap(&enabled, &observed))
    }
}

/// Networks that count towards the sync comparison: admin-enabled and
/// not blacklisted as infra-only.
fn enabled_networks(assignments: &[NetworkAssignment]) -> Vec<&NetworkAssignment> {
    assignments
        .iter()
        .filter(|network| !NETWORK_BLACKLIST.contains(&network.id.as_str()))
        .filter(|network| network.admin_state_up)
        .collect()
}

/// Authoritative namespace cross-check.
///
/// A missing namespace for an external network is excused (external
/// routers may legitimately lack a local DHCP namespace); any other gap
/// means the agent has not synced and is unhealthy.
fn judge_sync_gap(enabled: &[&NetworkAssignment], observed: &HashSet<String>) -> Verdict {
    for network in enabled {
        if observed.contains(&network.id) {
            continue;
        }
        if network.external {
            debug!(network_id = %network.id, "External network without namespace, tolerated");
            continue;
        }
        warn!(network_id = %network.id, "Scheduled network has no local DHCP namespace");
        return Verdict::unhealthy(format!(
            "network {} scheduled on dhcp agent but not synced locally",
            network.id
        ));
    }

    Verdict::healthy("all non-external scheduled networks have local namespaces")
}

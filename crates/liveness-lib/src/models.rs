//! Core data models for the liveness probe

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network ids excluded from sync-count comparisons.
///
/// These are infra-only networks that never schedule a local DHCP
/// namespace, so counting them on either side of the reconciliation
/// would produce false negatives.
pub const NETWORK_BLACKLIST: &[&str] = &[
    "9b3ba07a-aa3b-4f1c-b399-3b64a1b53582",
    "c53e0d04-1b32-4e08-9e92-79ca0228c7b6",
];

/// Binary name the neutron check is pinned to when DHCP sync is requested
pub const DHCP_AGENT_BINARY: &str = "neutron-dhcp-agent";

/// OpenStack component whose local agent is being probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Neutron,
    Nova,
    Cinder,
    Manila,
    Ironic,
}

impl Component {
    /// All recognized component names, in CLI help order
    pub const ALL: &'static [Component] = &[
        Component::Neutron,
        Component::Nova,
        Component::Cinder,
        Component::Manila,
        Component::Ironic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Neutron => "neutron",
            Component::Nova => "nova",
            Component::Cinder => "cinder",
            Component::Manila => "manila",
            Component::Ironic => "ironic",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neutron" => Ok(Component::Neutron),
            "nova" => Ok(Component::Nova),
            "cinder" => Ok(Component::Cinder),
            "manila" => Ok(Component::Manila),
            "ironic" => Ok(Component::Ironic),
            other => Err(format!("unknown component: {}", other)),
        }
    }
}

/// One liveness check, built once per invocation from configuration
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub component: Component,
    /// Hostname the agent is expected to be registered under
    pub host: String,
    /// Optional agent binary filter (neutron only)
    pub binary: Option<String>,
    /// Corroborate the DHCP agent's network sync state (neutron only)
    pub dhcp_ready: bool,
    /// Share backend names for manila multi-backend hosts
    pub enabled_share_backends: Vec<String>,
    /// Conductor hostname for ironic
    pub ironic_conductor_host: Option<String>,
}

/// Heartbeat state a service record reports to the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Up,
    Down,
    Unknown,
}

/// Registration/health record of one agent, parsed from the loose
/// JSON the control plane returns.
///
/// Field defaults for absent keys are applied once, at the directory
/// boundary: `alive` -> None, `admin_enabled` -> true,
/// `configurations` -> empty map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    pub state: AgentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    pub admin_enabled: bool,
    /// Raw configuration blob the agent publishes about itself
    pub configurations: serde_json::Map<String, serde_json::Value>,
}

impl AgentRecord {
    /// Whether the record reports the agent as up
    pub fn is_up(&self) -> bool {
        self.state == AgentState::Up || self.alive == Some(true)
    }

    /// The `networks` counter from the agent's configuration blob.
    ///
    /// This is the DHCP agent's self-reported count of synced networks.
    /// Absent or non-numeric values read as zero, which forces the
    /// authoritative namespace cross-check.
    pub fn reported_synced_networks(&self) -> u64 {
        self.configurations
            .get("networks")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }
}

/// One network the control plane has scheduled onto a DHCP agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAssignment {
    pub id: String,
    pub admin_state_up: bool,
    /// neutron `router:external`
    pub external: bool,
}

/// Final decision of one probe invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictCode {
    /// Agent confirmed up, or liveness could not be disproven (fail-open)
    Healthy,
    /// Agent confirmed down or local host not ready
    Unhealthy,
    /// Configuration prevented any evaluation
    Unknown,
}

/// Verdict with the reasoning that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub code: VerdictCode,
    pub reason: String,
}

impl Verdict {
    pub fn healthy(reason: impl Into<String>) -> Self {
        Self {
            code: VerdictCode::Healthy,
            reason: reason.into(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            code: VerdictCode::Unhealthy,
            reason: reason.into(),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            code: VerdictCode::Unknown,
            reason: reason.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.code == VerdictCode::Healthy
    }

    /// Process exit code for a supervisor: 0 restartable-healthy,
    /// 1 for everything that should trigger intervention.
    pub fn exit_code(&self) -> i32 {
        match self.code {
            VerdictCode::Healthy => 0,
            VerdictCode::Unhealthy | VerdictCode::Unknown => 1,
        }
    }
}

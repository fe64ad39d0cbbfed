//! Typed clients for the control-plane agent directories
//!
//! One thin query surface per OpenStack service, all sharing a single
//! HTTP client and the session token. The loose, dict-shaped records the
//! APIs return are parsed into `AgentRecord`/`NetworkAssignment` here, at
//! the boundary, so defaults for absent fields live in exactly one place.

use crate::error::DirectoryError;
use crate::models::{AgentRecord, AgentState, NetworkAssignment};
use crate::session::Session;
use serde_json::Value;
use tracing::debug;

/// Manila microversion that includes service state in list responses
const MANILA_API_VERSION: &str = "2.7";

/// Directory access to every control-plane service the probe can query
pub struct ControlPlane {
    http: reqwest::Client,
    session: Session,
}

impl ControlPlane {
    pub fn new(http: reqwest::Client, session: Session) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Neutron agents registered for `host`, optionally filtered by binary
    pub async fn list_agents(
        &self,
        host: &str,
        binary: Option<&str>,
    ) -> Result<Vec<AgentRecord>, DirectoryError> {
        let endpoint = self.session.endpoint("network")?;
        let mut url = format!("{}/v2.0/agents?host={}", endpoint, host);
        if let Some(binary) = binary {
            url.push_str(&format!("&binary={}", binary));
        }

        let body = self.get_json("network", &url).await?;
        let agents = body
            .get("agents")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DirectoryError::InvalidRecord("agents list missing".into()))?;

        Ok(agents.iter().map(parse_agent).collect())
    }

    /// Networks the control plane has scheduled onto a DHCP agent
    pub async fn list_networks_on_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<NetworkAssignment>, DirectoryError> {
        let endpoint = self.session.endpoint("network")?;
        let url = format!("{}/v2.0/agents/{}/dhcp-networks", endpoint, agent_id);

        let body = self.get_json("network", &url).await?;
        let networks = body
            .get("networks")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DirectoryError::InvalidRecord("networks list missing".into()))?;

        Ok(networks.iter().map(parse_network).collect())
    }

    /// Nova services registered for `host`
    pub async fn list_compute_services(
        &self,
        host: &str,
    ) -> Result<Vec<AgentRecord>, DirectoryError> {
        let endpoint = self.session.endpoint("compute")?;
        let url = format!("{}/os-services?host={}", endpoint, host);
        self.list_services("compute", &url).await
    }

    /// Cinder services registered for `host`
    pub async fn list_volume_services(
        &self,
        host: &str,
    ) -> Result<Vec<AgentRecord>, DirectoryError> {
        let endpoint = self.session.endpoint("volumev3")?;
        let url = format!("{}/os-services?host={}", endpoint, host);
        self.list_services("volumev3", &url).await
    }

    /// Manila services registered for `host` (including `host@backend` forms)
    pub async fn list_share_services(
        &self,
        host: &str,
    ) -> Result<Vec<AgentRecord>, DirectoryError> {
        let endpoint = self.session.endpoint("sharev2")?;
        let url = format!("{}/services?host={}", endpoint, host);

        let response = self
            .http
            .get(&url)
            .header("X-Auth-Token", &self.session.token)
            .header("X-OpenStack-Manila-API-Version", MANILA_API_VERSION)
            .send()
            .await
            .map_err(|e| DirectoryError::from_transport("sharev2", e))?;

        let body = Self::json_or_unreachable("sharev2", response).await?;
        let services = body
            .get("services")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DirectoryError::InvalidRecord("services list missing".into()))?;

        Ok(services.iter().map(parse_service).collect())
    }

    /// Ironic conductor record for `hostname`; 404 surfaces as NotFound
    pub async fn get_conductor(&self, hostname: &str) -> Result<AgentRecord, DirectoryError> {
        let endpoint = self.session.endpoint("baremetal")?;
        let url = format!("{}/v1/conductors/{}", endpoint, hostname);

        let response = self
            .http
            .get(&url)
            .header("X-Auth-Token", &self.session.token)
            .send()
            .await
            .map_err(|e| DirectoryError::from_transport("baremetal", e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(format!(
                "conductor {} not registered",
                hostname
            )));
        }

        let body = Self::json_or_unreachable("baremetal", response).await?;
        Ok(parse_conductor(&body))
    }

    /// Hardware driver records with their conductor host lists
    pub async fn list_driver_hosts(&self) -> Result<Vec<Vec<String>>, DirectoryError> {
        let endpoint = self.session.endpoint("baremetal")?;
        let url = format!("{}/v1/drivers", endpoint);

        let body = self.get_json("baremetal", &url).await?;
        let drivers = body
            .get("drivers")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DirectoryError::InvalidRecord("drivers list missing".into()))?;

        Ok(drivers
            .iter()
            .map(|driver| {
                driver
                    .get("hosts")
                    .and_then(|v| v.as_array())
                    .map(|hosts| {
                        hosts
                            .iter()
                            .filter_map(|h| h.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect())
    }

    /// Shared `os-services`-shaped listing for nova and cinder
    async fn list_services(
        &self,
        service: &str,
        url: &str,
    ) -> Result<Vec<AgentRecord>, DirectoryError> {
        let body = self.get_json(service, url).await?;
        let services = body
            .get("services")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DirectoryError::InvalidRecord("services list missing".into()))?;

        Ok(services.iter().map(parse_service).collect())
    }

    async fn get_json(&self, service: &str, url: &str) -> Result<Value, DirectoryError> {
        debug!(service = %service, url = %url, "Querying control plane");

        let response = self
            .http
            .get(url)
            .header("X-Auth-Token", &self.session.token)
            .send()
            .await
            .map_err(|e| DirectoryError::from_transport(service, e))?;

        Self::json_or_unreachable(service, response).await
    }

    async fn json_or_unreachable(
        service: &str,
        response: reqwest::Response,
    ) -> Result<Value, DirectoryError> {
        if !response.status().is_success() {
            return Err(DirectoryError::Unreachable(format!(
                "{} returned {}",
                service,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DirectoryError::from_transport(service, e))
    }
}

/// Parse a neutron agent record (liveness is the boolean `alive` field)
fn parse_agent(value: &Value) -> AgentRecord {
    let alive = value.get("alive").and_then(|v| v.as_bool());
    AgentRecord {
        id: string_field(value, "id"),
        host: string_field(value, "host"),
        binary: value
            .get("binary")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        state: match alive {
            Some(true) => AgentState::Up,
            Some(false) => AgentState::Down,
            None => AgentState::Unknown,
        },
        alive,
        admin_enabled: value
            .get("admin_state_up")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        configurations: value
            .get("configurations")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default(),
    }
}

/// Parse an `os-services`-shaped record (nova/cinder/manila)
fn parse_service(value: &Value) -> AgentRecord {
    AgentRecord {
        id: string_field(value, "id"),
        host: string_field(value, "host"),
        binary: value
            .get("binary")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        state: match value.get("state").and_then(|v| v.as_str()) {
            Some("up") => AgentState::Up,
            Some("down") => AgentState::Down,
            _ => AgentState::Unknown,
        },
        alive: None,
        admin_enabled: value
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s != "disabled")
            .unwrap_or(true),
        configurations: serde_json::Map::new(),
    }
}

/// Parse an ironic conductor record
fn parse_conductor(value: &Value) -> AgentRecord {
    let alive = value.get("alive").and_then(|v| v.as_bool());
    AgentRecord {
        id: string_field(value, "hostname"),
        host: string_field(value, "hostname"),
        binary: None,
        state: match alive {
            Some(true) => AgentState::Up,
            Some(false) => AgentState::Down,
            None => AgentState::Unknown,
        },
        alive,
        admin_enabled: true,
        configurations: serde_json::Map::new(),
    }
}

/// Parse a DHCP network assignment (`router:external` marks externals)
fn parse_network(value: &Value) -> NetworkAssignment {
    NetworkAssignment {
        id: string_field(value, "id"),
        admin_state_up: value
            .get("admin_state_up")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        external: value
            .get("router:external")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

/// String field that tolerates numeric ids (cinder uses integers)
fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn session_for(server: &mockito::Server, service_type: &str) -> Session {
        Session {
            token: "test-token".into(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            endpoints: HashMap::from([(service_type.to_string(), server.url())]),
        }
    }

    #[test]
    fn test_parse_agent_defaults() {
        let record = parse_agent(&serde_json::json!({
            "id": "agent-1",
            "host": "node-1"
        }));
        assert_eq!(record.state, AgentState::Unknown);
        assert_eq!(record.alive, None);
        assert!(record.admin_enabled);
        assert!(record.configurations.is_empty());
    }

    #[test]
    fn test_parse_agent_alive() {
        let record = parse_agent(&serde_json::json!({
            "id": "agent-1",
            "host": "node-1",
            "binary": "neutron-dhcp-agent",
            "alive": true,
            "admin_state_up": true,
            "configurations": {"networks": 12, "subnets": 14}
        }));
        assert!(record.is_up());
        assert_eq!(record.reported_synced_networks(), 12);
    }

    #[test]
    fn test_parse_service_states() {
        let up = parse_service(&serde_json::json!({
            "id": 7, "host": "node-1", "binary": "nova-compute",
            "state": "up", "status": "enabled"
        }));
        assert_eq!(up.id, "7");
        assert_eq!(up.state, AgentState::Up);
        assert!(up.admin_enabled);

        let disabled = parse_service(&serde_json::json!({
            "id": "8", "host": "node-1", "state": "down", "status": "disabled"
        }));
        assert_eq!(disabled.state, AgentState::Down);
        assert!(!disabled.admin_enabled);
    }

    #[test]
    fn test_parse_network_external_flag() {
        let network = parse_network(&serde_json::json!({
            "id": "net-1", "admin_state_up": true, "router:external": true
        }));
        assert!(network.admin_state_up);
        assert!(network.external);

        let plain = parse_network(&serde_json::json!({"id": "net-2"}));
        assert!(!plain.admin_state_up);
        assert!(!plain.external);
    }

    #[tokio::test]
    async fn test_list_agents_with_binary_filter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2.0/agents")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("host".into(), "node-1".into()),
                mockito::Matcher::UrlEncoded("binary".into(), "neutron-dhcp-agent".into()),
            ]))
            .match_header("X-Auth-Token", "test-token")
            .with_body(
                serde_json::json!({
                    "agents": [{"id": "a1", "host": "node-1", "alive": true}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let plane = ControlPlane::new(reqwest::Client::new(), session_for(&server, "network"));
        let agents = plane
            .list_agents("node-1", Some("neutron-dhcp-agent"))
            .await
            .unwrap();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].is_up());
    }

    #[tokio::test]
    async fn test_service_error_maps_to_unreachable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let plane = ControlPlane::new(reqwest::Client::new(), session_for(&server, "compute"));
        let err = plane.list_compute_services("node-1").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_missing_conductor_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/conductors/ironic-3")
            .with_status(404)
            .create_async()
            .await;

        let plane = ControlPlane::new(reqwest::Client::new(), session_for(&server, "baremetal"));
        let err = plane.get_conductor("ironic-3").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_driver_hosts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/drivers")
            .with_body(
                serde_json::json!({
                    "drivers": [
                        {"name": "ipmi", "hosts": ["ironic-1", "ironic-2"]},
                        {"name": "redfish", "hosts": []}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let plane = ControlPlane::new(reqwest::Client::new(), session_for(&server, "baremetal"));
        let hosts = plane.list_driver_hosts().await.unwrap();
        assert_eq!(hosts, vec![vec!["ironic-1".to_string(), "ironic-2".to_string()], vec![]]);
    }
}

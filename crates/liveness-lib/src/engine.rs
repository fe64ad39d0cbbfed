//! Liveness determination engine
//!
//! Dispatches a `CheckRequest` to the per-component strategy and
//! guarantees that no error crosses the `check` boundary: every failure
//! is converted to a `Verdict` through the policy table in
//! [`fail_policy`] before returning.

use crate::directory::ControlPlane;
use crate::error::DirectoryError;
use crate::models::{
    AgentRecord, AgentState, CheckRequest, Component, Verdict, DHCP_AGENT_BINARY,
};
use crate::netns::NamespaceObserver;
use crate::reconciler::NetworkSyncReconciler;
use crate::session::{AuthConfig, SessionProvider, TokenCache};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

/// Engine owning the session provider and the local namespace observer.
///
/// All control-plane calls within one `check` reuse a single session,
/// obtained lazily on the first directory query.
pub struct LivenessEngine {
    http: reqwest::Client,
    provider: SessionProvider,
    observer: NamespaceObserver,
}

impl LivenessEngine {
    pub fn new(auth: AuthConfig, cache: Option<TokenCache>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(auth.insecure)
            .build()
            .context("Failed to create HTTP client")?;

        let provider = SessionProvider::new(http.clone(), auth, cache);

        Ok(Self {
            http,
            provider,
            observer: NamespaceObserver::default(),
        })
    }

    /// Override the namespace directory (tests, non-standard hosts)
    pub fn with_netns_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.observer = NamespaceObserver::new(root);
        self
    }

    /// Run one liveness check. Infallible: failures become verdicts.
    pub async fn check(&self, request: &CheckRequest) -> Verdict {
        let session = match self.provider.obtain().await {
            Ok(session) => session,
            Err(err) => return fail_policy(&err),
        };
        let plane = ControlPlane::new(self.http.clone(), session);

        let result = match request.component {
            Component::Neutron if request.dhcp_ready => self.check_dhcp(&plane, request).await,
            Component::Neutron => self.check_neutron(&plane, request).await,
            Component::Nova => self.check_nova(&plane, request).await,
            Component::Cinder => self.check_cinder(&plane, request).await,
            Component::Manila => self.check_manila(&plane, request).await,
            Component::Ironic => self.check_ironic(&plane, request).await,
        };

        match result {
            Ok(verdict) => {
                info!(
                    component = %request.component,
                    healthy = verdict.is_healthy(),
                    reason = %verdict.reason,
                    "Liveness verdict"
                );
                verdict
            }
            Err(err) => fail_policy(&err),
        }
    }

    /// Plain neutron agent check: first matching record decides.
    ///
    /// A host registers at most one agent per binary, so evaluating only
    /// the first record is a deliberate choice, not a short-circuit bug.
    async fn check_neutron(
        &self,
        plane: &ControlPlane,
        request: &CheckRequest,
    ) -> Result<Verdict, DirectoryError> {
        let agents = plane
            .list_agents(&request.host, request.binary.as_deref())
            .await?;
        Ok(first_record_verdict(agents.first(), &request.host))
    }

    /// DHCP variant: the binary filter is pinned server-side to the DHCP
    /// agent regardless of what the caller configured, and an alive agent
    /// must additionally pass network-sync reconciliation.
    async fn check_dhcp(
        &self,
        plane: &ControlPlane,
        request: &CheckRequest,
    ) -> Result<Verdict, DirectoryError> {
        let agents = plane
            .list_agents(&request.host, Some(DHCP_AGENT_BINARY))
            .await?;

        let agent = match agents.first() {
            Some(agent) => agent,
            None => return Ok(not_registered(&request.host)),
        };

        if !agent.is_up() {
            error!(agent_id = %agent.id, host = %request.host, "DHCP agent registered but down");
            return Ok(Verdict::unhealthy(format!(
                "dhcp agent {} registered but down",
                agent.id
            )));
        }

        let reconciler = NetworkSyncReconciler::new(self.observer.clone());
        reconciler.reconcile(plane, agent).await
    }

    async fn check_nova(
        &self,
        plane: &ControlPlane,
        request: &CheckRequest,
    ) -> Result<Verdict, DirectoryError> {
        let services = plane.list_compute_services(&request.host).await?;
        Ok(first_record_verdict(services.first(), &request.host))
    }

    /// Cinder additionally excuses administratively disabled services:
    /// an operator turned it off on purpose, the probe must not restart it.
    async fn check_cinder(
        &self,
        plane: &ControlPlane,
        request: &CheckRequest,
    ) -> Result<Verdict, DirectoryError> {
        let services = plane.list_volume_services(&request.host).await?;

        let record = match services.first() {
            Some(record) => record,
            None => return Ok(not_registered(&request.host)),
        };

        if record.state == AgentState::Down && !record.admin_enabled {
            warn!(service_id = %record.id, "Service down but administratively disabled");
            return Ok(Verdict::healthy(format!(
                "service {} down but administratively disabled",
                record.id
            )));
        }

        Ok(first_record_verdict(Some(record), &request.host))
    }

    /// Manila multi-backend: every `<host>@<backend>` must be registered
    /// and up for the host to count as healthy.
    async fn check_manila(
        &self,
        plane: &ControlPlane,
        request: &CheckRequest,
    ) -> Result<Verdict, DirectoryError> {
        if request.enabled_share_backends.is_empty() {
            let services = plane.list_share_services(&request.host).await?;
            return Ok(first_record_verdict(services.first(), &request.host));
        }

        for backend in &request.enabled_share_backends {
            let backend_host = format!("{}@{}", request.host, backend);
            let services = plane.list_share_services(&backend_host).await?;

            let record = match services.first() {
                Some(record) => record,
                None => {
                    error!(host = %backend_host, "No share service registered for backend");
                    return Ok(Verdict::unhealthy(format!(
                        "no share service registered for {}",
                        backend_host
                    )));
                }
            };

            if record.state == AgentState::Down {
                error!(service_id = %record.id, host = %backend_host, "Share service down");
                return Ok(Verdict::unhealthy(format!(
                    "share service {} down for {}",
                    record.id, backend_host
                )));
            }
        }

        Ok(Verdict::healthy(format!(
            "all {} share backends up",
            request.enabled_share_backends.len()
        )))
    }

    /// Ironic two-part check: the conductor must report alive AND appear
    /// in at least one driver's host list. A conductor serving zero
    /// drivers cannot manage hardware even when its heartbeat is fine.
    async fn check_ironic(
        &self,
        plane: &ControlPlane,
        request: &CheckRequest,
    ) -> Result<Verdict, DirectoryError> {
        let conductor_host = match &request.ironic_conductor_host {
            Some(host) => host,
            None => {
                warn!("No ironic conductor host configured, cannot evaluate");
                return Ok(Verdict::healthy(
                    "no ironic conductor host configured, cannot evaluate",
                ));
            }
        };

        let conductor = plane.get_conductor(conductor_host).await?;
        if conductor.alive != Some(true) {
            error!(conductor = %conductor_host, "Conductor registered but not alive");
            return Ok(Verdict::unhealthy(format!(
                "conductor {} registered but not alive",
                conductor_host
            )));
        }

        let driver_hosts = plane.list_driver_hosts().await?;
        let serves_driver = driver_hosts
            .iter()
            .any(|hosts| hosts.iter().any(|h| h == conductor_host));

        if !serves_driver {
            error!(conductor = %conductor_host, "Conductor absent from every driver host list");
            return Ok(Verdict::unhealthy(format!(
                "conductor {} not listed for any driver",
                conductor_host
            )));
        }

        Ok(Verdict::healthy(format!(
            "conductor {} alive and serving drivers",
            conductor_host
        )))
    }
}

/// Decision rule shared by the simple-form strategies
fn first_record_verdict(record: Option<&AgentRecord>, host: &str) -> Verdict {
    let record = match record {
        Some(record) => record,
        None => return not_registered(host),
    };

    if record.is_up() {
        return Verdict::healthy(format!("agent {} up on {}", record.id, host));
    }

    if record.state == AgentState::Down || record.alive == Some(false) {
        error!(agent_id = %record.id, host = %host, "Agent registered but down");
        return Verdict::unhealthy(format!("agent {} registered but down", record.id));
    }

    // State unreported: we cannot prove it is down
    warn!(agent_id = %record.id, host = %host, "Agent state unknown, failing open");
    Verdict::healthy(format!("agent {} state unknown", record.id))
}

/// Fail-open verdict for a host with no registered agent
fn not_registered(host: &str) -> Verdict {
    warn!(host = %host, "No agent registered for host, failing open");
    Verdict::healthy(format!("no agent registered for {}", host))
}

/// The fail-open/fail-closed policy as one auditable mapping.
///
/// Remote unavailability must never trigger a restart; local readiness
/// problems must.
pub fn fail_policy(err: &DirectoryError) -> Verdict {
    match err {
        DirectoryError::Unreachable(reason) => {
            warn!(reason = %reason, "Control plane unreachable, failing open");
            Verdict::healthy(format!("control plane unreachable: {}", reason))
        }
        DirectoryError::InvalidRecord(reason) => {
            warn!(reason = %reason, "Uninterpretable control-plane response, failing open");
            Verdict::healthy(format!("uninterpretable response: {}", reason))
        }
        DirectoryError::NotFound(reason) => {
            error!(reason = %reason, "Required entity not registered");
            Verdict::unhealthy(reason.clone())
        }
        DirectoryError::LocalStateUnavailable(reason) => {
            error!(reason = %reason, "Local host state unavailable");
            Verdict::unhealthy(reason.clone())
        }
    }
}

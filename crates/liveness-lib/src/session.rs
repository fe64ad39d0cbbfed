//! Authenticated session handling
//!
//! Produces an authenticated handle to the control plane via keystone v3
//! password authentication, optionally reusing a token cached on disk by a
//! previous invocation. Cache problems of any kind degrade to a fresh
//! authentication, never to a hard failure.

use crate::error::DirectoryError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Tokens this close to expiry are treated as a cache miss.
///
/// Stands in for the auto-renew window of the original credential
/// plugin: a token that would expire mid-probe is not worth reusing.
const EXPIRY_SKEW_MINUTES: i64 = 5;

/// Well-known slot name in the cache file
const CACHE_SLOT: &str = "auth_ref";

/// Identity credentials and endpoint, loaded from configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Keystone v3 endpoint, e.g. "https://identity.example.net/v3"
    #[serde(default)]
    pub auth_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_domain_name")]
    pub user_domain_name: String,
    #[serde(default = "default_domain_name")]
    pub project_domain_name: String,
    /// Disable SSL certificate verification
    #[serde(default)]
    pub insecure: bool,
}

fn default_project_name() -> String {
    "service".to_string()
}

fn default_domain_name() -> String {
    "default".to_string()
}

/// An authenticated control-plane session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Public endpoint per service type from the keystone catalog
    pub endpoints: HashMap<String, String>,
}

impl Session {
    /// Whether the token is still worth using at `now`.
    ///
    /// A session without an expiry never goes stale here; keystone will
    /// reject it and the failure maps to fail-open like any other.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry - now > Duration::minutes(EXPIRY_SKEW_MINUTES),
            None => true,
        }
    }

    /// Endpoint URL for an OpenStack service type
    pub fn endpoint(&self, service_type: &str) -> Result<String, DirectoryError> {
        self.endpoints
            .get(service_type)
            .cloned()
            .ok_or_else(|| {
                DirectoryError::Unreachable(format!(
                    "no {} endpoint in service catalog",
                    service_type
                ))
            })
    }
}

/// Single-slot persistent token cache shared across invocations.
///
/// Invocations are serial by construction (one probe per supervisor
/// tick), so the file carries no inter-process locking.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the cached session. Absent, unreadable, or corrupt entries
    /// are all a miss.
    pub fn load(&self) -> Option<Session> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "Token cache not readable");
                return None;
            }
        };

        let mut slots: HashMap<String, Session> = match serde_json::from_str(&content) {
            Ok(slots) => slots,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Token cache corrupt, ignoring");
                return None;
            }
        };

        slots.remove(CACHE_SLOT)
    }

    /// Write the session back for the next invocation. Best effort.
    pub fn store(&self, session: &Session) {
        let slots = HashMap::from([(CACHE_SLOT.to_string(), session.clone())]);
        let serialized = match serde_json::to_string_pretty(&slots) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(error = %err, "Failed to serialize session for cache");
                return;
            }
        };

        if let Err(err) = std::fs::write(&self.path, serialized) {
            warn!(path = %self.path.display(), error = %err, "Failed to write token cache");
        }
    }
}

/// Produces a `Session`, preferring the cache over fresh authentication
pub struct SessionProvider {
    http: reqwest::Client,
    auth: AuthConfig,
    cache: Option<TokenCache>,
}

impl SessionProvider {
    pub fn new(http: reqwest::Client, auth: AuthConfig, cache: Option<TokenCache>) -> Self {
        Self { http, auth, cache }
    }

    /// Obtain an authenticated session.
    ///
    /// Fails only when fresh password authentication itself fails; every
    /// cache problem silently falls through to re-authentication.
    pub async fn obtain(&self) -> Result<Session, DirectoryError> {
        if let Some(cache) = &self.cache {
            if let Some(session) = cache.load() {
                if session.is_fresh(Utc::now()) {
                    debug!("Reusing cached session");
                    return Ok(session);
                }
                debug!("Cached session expired or near expiry");
            }
        }

        let session = self.authenticate().await?;

        if let Some(cache) = &self.cache {
            cache.store(&session);
        }

        Ok(session)
    }

    /// Full keystone v3 password authentication
    async fn authenticate(&self) -> Result<Session, DirectoryError> {
        let url = format!("{}/auth/tokens", self.auth.auth_url.trim_end_matches('/'));

        let payload = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.auth.username,
                            "domain": {"name": self.auth.user_domain_name},
                            "password": self.auth.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.auth.project_name,
                        "domain": {"name": self.auth.project_domain_name},
                    }
                }
            }
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DirectoryError::from_transport("identity service", e))?;

        if !response.status().is_success() {
            return Err(DirectoryError::Unreachable(format!(
                "identity service returned {}",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                DirectoryError::InvalidRecord("auth response missing X-Subject-Token".into())
            })?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DirectoryError::from_transport("identity service", e))?;

        let expires_at = body
            .pointer("/token/expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let endpoints = parse_catalog(&body);

        debug!(expires_at = ?expires_at, "Authenticated against identity service");

        Ok(Session {
            token,
            expires_at,
            endpoints,
        })
    }
}

/// Extract public endpoints per service type from the auth response catalog
fn parse_catalog(body: &serde_json::Value) -> HashMap<String, String> {
    let mut endpoints = HashMap::new();

    let catalog = match body.pointer("/token/catalog").and_then(|v| v.as_array()) {
        Some(catalog) => catalog,
        None => return endpoints,
    };

    for service in catalog {
        let service_type = match service.get("type").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => continue,
        };

        let service_endpoints = match service.get("endpoints").and_then(|v| v.as_array()) {
            Some(e) => e,
            None => continue,
        };

        for endpoint in service_endpoints {
            let interface = endpoint.get("interface").and_then(|v| v.as_str());
            let url = endpoint.get("url").and_then(|v| v.as_str());
            if let (Some("public"), Some(url)) = (interface, url) {
                endpoints.insert(service_type.to_string(), url.trim_end_matches('/').to_string());
                break;
            }
        }
    }

    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            token: "gAAAAABtoken".into(),
            expires_at,
            endpoints: HashMap::from([(
                "network".to_string(),
                "http://neutron.example.net:9696".to_string(),
            )]),
        }
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token_cache"));

        let session = sample_session(Some(Utc::now() + Duration::hours(1)));
        cache.store(&session);

        let loaded = cache.load().expect("cached session should load");
        assert_eq!(loaded.token, session.token);
        assert_eq!(
            loaded.endpoint("network").unwrap(),
            "http://neutron.example.net:9696"
        );
    }

    #[test]
    fn test_cache_missing_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("nonexistent"));
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_cache_corrupt_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_cache");
        std::fs::write(&path, "not json {").unwrap();

        let cache = TokenCache::new(path);
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_session_freshness() {
        let now = Utc::now();
        assert!(sample_session(Some(now + Duration::hours(1))).is_fresh(now));
        assert!(!sample_session(Some(now + Duration::minutes(2))).is_fresh(now));
        assert!(!sample_session(Some(now - Duration::hours(1))).is_fresh(now));
        // No expiry: trust it and let the control plane reject it
        assert!(sample_session(None).is_fresh(now));
    }

    #[test]
    fn test_missing_endpoint_is_unreachable() {
        let session = sample_session(None);
        let err = session.endpoint("baremetal").unwrap_err();
        assert!(matches!(err, DirectoryError::Unreachable(_)));
    }

    #[test]
    fn test_parse_catalog_prefers_public_interface() {
        let body = serde_json::json!({
            "token": {
                "catalog": [
                    {
                        "type": "compute",
                        "endpoints": [
                            {"interface": "internal", "url": "http://internal:8774/v2.1"},
                            {"interface": "public", "url": "http://public:8774/v2.1/"}
                        ]
                    },
                    {"type": "placement", "endpoints": []}
                ]
            }
        });

        let endpoints = parse_catalog(&body);
        assert_eq!(endpoints.get("compute").unwrap(), "http://public:8774/v2.1");
        assert!(!endpoints.contains_key("placement"));
    }

    fn auth_config(url: &str) -> AuthConfig {
        AuthConfig {
            auth_url: url.to_string(),
            username: "liveness".into(),
            password: "secret".into(),
            project_name: "service".into(),
            user_domain_name: "default".into(),
            project_domain_name: "default".into(),
            insecure: false,
        }
    }

    fn auth_body(server_url: &str) -> String {
        serde_json::json!({
            "token": {
                "expires_at": (Utc::now() + Duration::hours(2)).to_rfc3339(),
                "catalog": [
                    {
                        "type": "network",
                        "endpoints": [{"interface": "public", "url": server_url}]
                    }
                ]
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_password_authentication() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/auth/tokens")
            .with_status(201)
            .with_header("X-Subject-Token", "fresh-token")
            .with_body(auth_body(&server.url()))
            .create_async()
            .await;

        let provider = SessionProvider::new(
            reqwest::Client::new(),
            auth_config(&format!("{}/v3", server.url())),
            None,
        );

        let session = provider.obtain().await.unwrap();
        assert_eq!(session.token, "fresh-token");
        assert!(session.endpoint("network").is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cache_avoids_reauthentication() {
        let mut server = mockito::Server::new_async().await;
        // Exactly one password authentication is allowed
        let mock = server
            .mock("POST", "/v3/auth/tokens")
            .with_status(201)
            .with_header("X-Subject-Token", "fresh-token")
            .with_body(auth_body(&server.url()))
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token_cache"));
        let provider = SessionProvider::new(
            reqwest::Client::new(),
            auth_config(&format!("{}/v3", server.url())),
            Some(cache),
        );

        let first = provider.obtain().await.unwrap();
        let second = provider.obtain().await.unwrap();
        assert_eq!(first.token, second.token);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_cache_entry_triggers_reauth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/auth/tokens")
            .with_status(201)
            .with_header("X-Subject-Token", "fresh-token")
            .with_body(auth_body(&server.url()))
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token_cache"));
        cache.store(&sample_session(Some(Utc::now() - Duration::hours(1))));

        let provider = SessionProvider::new(
            reqwest::Client::new(),
            auth_config(&format!("{}/v3", server.url())),
            Some(cache),
        );

        let session = provider.obtain().await.unwrap();
        assert_eq!(session.token, "fresh-token");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_unreachable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v3/auth/tokens")
            .with_status(503)
            .create_async()
            .await;

        let provider = SessionProvider::new(
            reqwest::Client::new(),
            auth_config(&format!("{}/v3", server.url())),
            None,
        );

        let err = provider.obtain().await.unwrap_err();
        assert!(matches!(err, DirectoryError::Unreachable(_)));
    }
}

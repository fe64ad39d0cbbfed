//! Configuration management for the probe CLI

use anyhow::{Context, Result};
use liveness_lib::{AuthConfig, Component};

/// Load identity credentials from an optional config file plus the
/// `LIVENESS_*` environment (env wins).
///
/// Absent credentials are not an error here: an unauthenticatable probe
/// fails open at the engine boundary, which is the intended behavior
/// when the identity service is what broke.
pub fn load_auth(config_file: Option<&str>) -> Result<AuthConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_file {
        builder = builder.add_source(config::File::with_name(path));
    }

    builder = builder.add_source(config::Environment::with_prefix("LIVENESS"));

    builder
        .build()
        .context("Failed to assemble configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")
}

/// clap value parser for the component selector
pub fn parse_component(s: &str) -> Result<Component, String> {
    s.parse()
}

/// Guess the component from the host's first hyphen-delimited token.
///
/// `nova-compute-003` -> nova. A hostname without a hyphen never
/// guesses, even when it equals a component name outright.
pub fn guess_component(host: &str) -> Option<Component> {
    let (head, tail) = host.split_once('-')?;
    if tail.is_empty() {
        return None;
    }
    head.parse().ok()
}

/// Local hostname, the way a supervisor-managed probe sees it
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_component_from_hostname() {
        assert_eq!(guess_component("nova-compute-003"), Some(Component::Nova));
        assert_eq!(guess_component("neutron-agent-7"), Some(Component::Neutron));
        assert_eq!(guess_component("ironic-1"), Some(Component::Ironic));
        // No hyphen: never guess
        assert_eq!(guess_component("nova"), None);
        assert_eq!(guess_component("nova-"), None);
        assert_eq!(guess_component("db-primary"), None);
    }

    #[test]
    fn test_load_auth_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liveness.toml");
        std::fs::write(
            &path,
            r#"
auth_url = "https://identity.example.net/v3"
username = "liveness"
password = "secret"
insecure = true
"#,
        )
        .unwrap();

        let auth = load_auth(path.to_str()).unwrap();
        assert_eq!(auth.auth_url, "https://identity.example.net/v3");
        assert_eq!(auth.username, "liveness");
        assert_eq!(auth.project_name, "service");
        assert_eq!(auth.user_domain_name, "default");
        assert!(auth.insecure);
    }

    #[test]
    fn test_load_auth_without_file_uses_defaults() {
        let auth = load_auth(None).unwrap();
        assert_eq!(auth.project_name, "service");
        assert_eq!(auth.project_domain_name, "default");
    }

    #[test]
    fn test_local_hostname_is_nonempty() {
        assert!(!local_hostname().is_empty());
    }
}

//! Agent liveness probe CLI
//!
//! Invoked periodically by a process supervisor against the local
//! OpenStack agent. Exit code 0 means healthy (or liveness could not be
//! disproven), exit code 1 means the agent is down or the configuration
//! is broken.

mod config;

use clap::Parser;
use liveness_lib::{CheckRequest, Component, LivenessEngine, TokenCache, Verdict};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Liveness probe for OpenStack control-plane agents
#[derive(Parser)]
#[command(name = "agent-liveness")]
#[command(author, version, about = "Liveness probe for OpenStack agents", long_about = None)]
struct Cli {
    /// OpenStack component to check (guessed from the hostname if omitted)
    #[arg(short = 'c', long, value_parser = config::parse_component)]
    component: Option<Component>,

    /// For neutron agents, filter for this binary
    #[arg(short = 'b', long)]
    binary: Option<String>,

    /// Check that the dhcp-agent has all scheduled networks synced
    #[arg(short = 'r', long)]
    dhcp_ready: bool,

    /// Ironic conductor hostname to check
    #[arg(short = 'i', long)]
    ironic_conductor_host: Option<String>,

    /// Hostname the agent registers under (defaults to the local hostname)
    #[arg(long, env = "LIVENESS_HOST")]
    host: Option<String>,

    /// Share backend names for manila multi-backend hosts
    #[arg(long, value_delimiter = ',')]
    enabled_share_backends: Vec<String>,

    /// File to read/write the cached auth token to/from
    #[arg(long, env = "LIVENESS_TOKEN_CACHE_FILE")]
    token_cache_file: Option<PathBuf>,

    /// Path to a config file with identity credentials
    #[arg(long, env = "LIVENESS_CONFIG_FILE")]
    config_file: Option<String>,

    /// Disable SSL certificate verification
    #[arg(long)]
    insecure: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let host = cli.host.unwrap_or_else(config::local_hostname);

    let component = match cli.component.or_else(|| config::guess_component(&host)) {
        Some(component) => component,
        None => {
            error!(host = %host, "No component resolvable, use --component");
            return Verdict::unknown("no component resolvable").exit_code();
        }
    };

    let mut auth = match config::load_auth(cli.config_file.as_deref()) {
        Ok(auth) => auth,
        Err(err) => {
            error!(error = %err, "Configuration unreadable");
            return 1;
        }
    };
    if cli.insecure {
        auth.insecure = true;
    }

    let cache = cli.token_cache_file.map(TokenCache::new);

    let request = CheckRequest {
        component,
        host,
        binary: cli.binary,
        dhcp_ready: cli.dhcp_ready,
        enabled_share_backends: cli.enabled_share_backends,
        ironic_conductor_host: cli.ironic_conductor_host,
    };

    let engine = match LivenessEngine::new(auth, cache) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "Failed to initialize probe");
            return 1;
        }
    };

    let verdict = engine.check(&request).await;
    info!(
        component = %request.component,
        exit_code = verdict.exit_code(),
        reason = %verdict.reason,
        "Probe finished"
    );
    verdict.exit_code()
}

//! OIDC Relying Party
//!
//! Logs users in through an OAuth2 authorization server, validates their ID
//! Tokens and keeps their tokens in server-side sessions.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use oidc_relying_party::{
    cli::{Cli, Command},
    config::Config,
    oauth::ProviderMetadata,
    server::RelyingParty,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Discover) => run_discover(&config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return None;
        }
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return None;
    }
    Some(config)
}

fn check_config(config: &Config) -> ExitCode {
    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_discover(config: &Config) -> ExitCode {
    let Some(issuer) = config.provider.issuer.as_deref() else {
        error!("provider.issuer is not configured");
        return ExitCode::FAILURE;
    };

    let metadata = match config.http.build_client() {
        Ok(http) => ProviderMetadata::discover(&http, issuer).await,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match metadata.map(|m| serde_json::to_string_pretty(&m)) {
        Ok(Ok(json)) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("Failed to render discovery document: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Discovery failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        discover = config.provider.discover,
        "Starting OIDC relying party"
    );

    let relying_party = match RelyingParty::new(config).await {
        Ok(rp) => rp,
        Err(e) => {
            error!("Failed to start relying party: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = relying_party.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

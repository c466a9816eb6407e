//! Relying-party HTTP front end

mod cookies;
mod routes;

pub use cookies::CookieSettings;
pub use routes::{AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::flow::{FlowOrchestrator, FlowSettings, spawn_reaper};
use crate::oauth::{AuthClient, ProviderMetadata};
use crate::oidc::{HttpKeySource, KeySetCache, TokenValidator};
use crate::session::SessionStore;
use crate::{Error, Result};

/// Relying-party server
pub struct RelyingParty {
    /// Resolved configuration (discovered endpoints filled in)
    config: Config,
    /// Shared application state
    state: Arc<AppState>,
}

impl RelyingParty {
    /// Resolve provider metadata and wire the client, validator and stores.
    ///
    /// With `provider.discover` set, endpoints not configured explicitly are
    /// taken from the issuer's discovery document.
    pub async fn new(mut config: Config) -> Result<Self> {
        let http = config.http.build_client()?;

        if config.provider.discover
            && let Some(issuer) = config.provider.issuer.clone()
        {
            let metadata = ProviderMetadata::discover(&http, &issuer).await?;
            metadata.fill_missing(&mut config.provider);
        }

        let client = AuthClient::from_config(&config, http.clone())?;

        let keys = config.provider.jwks_uri.clone().map(|uri| {
            info!(jwks_uri = %uri, "ID Token signatures verified against JWKS");
            Arc::new(
                KeySetCache::new(Arc::new(HttpKeySource::new(http.clone(), uri)))
                    .with_ttl(config.validation.jwks_cache_ttl),
            )
        });
        let validator = TokenValidator::new(keys).with_leeway(config.validation.clock_skew);

        let flow = FlowOrchestrator::new(
            Arc::new(client),
            Arc::new(validator),
            Arc::new(SessionStore::new()),
            FlowSettings::from_config(&config),
        );

        let state = Arc::new(AppState {
            flow: Arc::new(flow),
            cookies: CookieSettings::from_config(&config),
        });

        Ok(Self { config, state })
    }

    /// Configuration after discovery
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The router serving this relying party
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Serve until ctrl-c or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let reaper = spawn_reaper(
            Arc::clone(self.state.flow.pending_logins()),
            self.config.login.reap_interval,
            shutdown_tx.subscribe(),
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("OIDC RELYING PARTY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(server = %self.state.flow.server_name(), client_id = %self.config.client.client_id, "Authorization server");
        if let Some(redirect_uri) = &self.config.client.redirect_uri {
            info!(redirect_uri = %redirect_uri, "Callback");
        }
        if !self.config.server.secure_cookies {
            warn!("Cookies are not marked Secure; enable server.secure_cookies behind HTTPS");
        }
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        if let Err(e) = reaper.await {
            warn!(error = %e, "Pending login reaper ended abnormally");
        }
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

//! OIDC Relying Party
//!
//! An OAuth 2.0 Authorization Code Grant client that validates OpenID Connect
//! ID Tokens and keeps per-user token state on the server.
//!
//! # Components
//!
//! - **[`oidc::KeySetCache`]**: JWKS fetch, `kid` lookup, coalesced refresh
//! - **[`oidc::TokenValidator`]**: signature, issuer, audience and lifetime checks
//! - **[`oauth::AuthClient`]**: authorization URL, code exchange, refresh, revocation
//! - **[`session::SessionStore`]**: in-memory session map with per-session locking
//! - **[`flow::FlowOrchestrator`]**: login, callback, refresh, revoke and logout
//! - **[`server`]**: a thin axum front end over the orchestrator
//!
//! Sessions live in process memory only and do not survive a restart.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod oidc;
pub mod server;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

//! OAuth 2.0 Authorization Code client
//!
//! Features:
//! - Authorization request construction with anti-CSRF `state`
//! - Code-for-token exchange (RFC 6749 §4.1)
//! - Refresh (RFC 6749 §6)
//! - Token revocation (RFC 7009)
//! - OpenID Provider discovery (OIDC Discovery 1.0)
//!
//! [`AuthClient`] is a stateless request/response mapper. It holds no tokens;
//! callers decide what to do with each [`TokenResponse`].

mod client;
mod metadata;

pub use client::{AuthClient, ClientCredentials, Endpoints, TokenResponse, TokenTypeHint};
pub use metadata::ProviderMetadata;

use reqwest::StatusCode;

/// How a call to the authorization server failed.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamFailure {
    /// Connection, TLS or timeout failure. No response was received.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} - {body}")]
    Status {
        /// Response status
        status: StatusCode,
        /// Response body, as text
        body: String,
    },

    /// The response body could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl UpstreamFailure {
    /// The upstream HTTP status, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// OAuth client errors
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Authorization code could not be exchanged.
    #[error("Token exchange failed: {0}")]
    TokenExchange(UpstreamFailure),

    /// Refresh token grant failed.
    #[error("Token refresh failed: {0}")]
    TokenRefresh(UpstreamFailure),

    /// Revocation request failed.
    #[error("Token revocation failed: {0}")]
    Revocation(UpstreamFailure),

    /// Provider discovery document could not be fetched.
    #[error("Provider discovery failed: {0}")]
    Discovery(UpstreamFailure),

    /// A required endpoint or credential is not configured.
    #[error("OAuth configuration error: {0}")]
    Configuration(String),
}

//! OpenID Provider Metadata discovery
//!
//! Fetches `{issuer}/.well-known/openid-configuration` and fills in the
//! endpoints the configuration left unset.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{OAuthError, UpstreamFailure};
use crate::config::ProviderConfig;

/// OpenID Provider Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier. Must equal the configured issuer exactly.
    pub issuer: String,

    /// Authorization endpoint
    pub authorization_endpoint: Url,

    /// Token endpoint
    pub token_endpoint: Url,

    /// JWKS document
    #[serde(default)]
    pub jwks_uri: Option<Url>,

    /// RFC 7009 revocation endpoint
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,

    /// RP-initiated logout endpoint
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,

    /// Supported token endpoint auth methods
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported ID Token signing algorithms
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Discover provider metadata for `issuer`
    ///
    /// # Errors
    ///
    /// [`OAuthError::Discovery`] if the document is unreachable or invalid,
    /// [`OAuthError::Configuration`] if it names a different issuer.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self, OAuthError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Discovering OpenID provider metadata");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| OAuthError::Discovery(UpstreamFailure::Transport(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Discovery(UpstreamFailure::Status { status, body }));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| OAuthError::Discovery(UpstreamFailure::Malformed(e.to_string())))?;

        if metadata.issuer != issuer {
            return Err(OAuthError::Configuration(format!(
                "discovery document issuer {} does not match configured issuer {issuer}",
                metadata.issuer
            )));
        }

        info!(issuer = %metadata.issuer, "Discovered OpenID provider");
        Ok(metadata)
    }

    /// Copy discovered endpoints into `provider` where it has none configured.
    pub fn fill_missing(&self, provider: &mut ProviderConfig) {
        provider
            .authorization_endpoint
            .get_or_insert_with(|| self.authorization_endpoint.clone());
        provider
            .token_endpoint
            .get_or_insert_with(|| self.token_endpoint.clone());
        if provider.jwks_uri.is_none() {
            provider.jwks_uri.clone_from(&self.jwks_uri);
        }
        if provider.revocation_endpoint.is_none() {
            provider.revocation_endpoint.clone_from(&self.revocation_endpoint);
        }
        if provider.logout_endpoint.is_none() {
            provider.logout_endpoint.clone_from(&self.end_session_endpoint);
        }
    }
}

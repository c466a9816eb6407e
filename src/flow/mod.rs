//! Login flow orchestration.
//!
//! [`FlowOrchestrator`] ties the pieces together for the five user-facing
//! operations:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`start_login`](FlowOrchestrator::start_login) | remember a fresh `state`, build the authorization URL |
//! | [`handle_callback`](FlowOrchestrator::handle_callback) | check `state`, exchange the code, validate the ID Token, create a session |
//! | [`refresh`](FlowOrchestrator::refresh) | refresh grant, then replace tokens atomically |
//! | [`revoke`](FlowOrchestrator::revoke) | revoke access and refresh tokens independently |
//! | [`logout`](FlowOrchestrator::logout) | drop the session, point at the end-session endpoint |
//!
//! Refresh and revoke hold the session's lock across the network call, so a
//! concurrent operation on the same session waits instead of losing an update.

mod error;
mod pending;

pub use error::{FlowError, RevocationOutcome, RevocationReport};
pub use pending::{LoginHandle, PendingLogins, StateRejection, spawn_reaper};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::oauth::{AuthClient, OAuthError, TokenTypeHint, UpstreamFailure};
use crate::oidc::{TokenValidator, ValidatedClaims};
use crate::session::{SessionId, SessionStore, UserSession};

/// Query parameters of the redirect back from the authorization server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed anti-CSRF state
    pub state: Option<String>,
    /// OAuth error code, when authorization failed
    pub error: Option<String>,
    /// Human-readable error description
    pub error_description: Option<String>,
}

/// Where to send the browser to log in, and the handle to remember.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Authorization request URL
    pub url: Url,
    /// Handle the browser must present on callback
    pub handle: LoginHandle,
}

/// What a successful refresh changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// The server issued a new refresh token
    pub refresh_token_rotated: bool,
    /// The server issued a new (validated) ID Token
    pub id_token_replaced: bool,
}

/// Result of logging out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    /// A session existed and was removed
    pub session_removed: bool,
    /// End-session URL to send the browser to, if one is configured
    pub redirect: Option<Url>,
}

/// Display snapshot of a session. Tokens themselves stay server-side.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    /// Host of the authorization server
    pub server_name: String,
    /// `sub` of the ID Token
    pub subject: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Session holds an access token
    pub has_access_token: bool,
    /// Session holds a refresh token
    pub has_refresh_token: bool,
    /// Session holds an ID Token
    pub has_id_token: bool,
    /// Decoded ID Token payload
    pub id_token_claims: Option<Value>,
    /// Decoded access token payload, for JWT access tokens
    pub access_token_claims: Option<Value>,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Last token change
    pub updated_at: DateTime<Utc>,
}

/// Settings the orchestrator needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Expected ID Token issuer
    pub issuer: Option<String>,
    /// End-session endpoint
    pub logout_endpoint: Option<Url>,
    /// Where the end-session endpoint should return the browser
    pub post_logout_redirect_uri: Option<Url>,
    /// Lifetime of a pending login
    pub state_ttl: Duration,
}

impl FlowSettings {
    /// Take flow settings from resolved configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            issuer: config.provider.issuer.clone(),
            logout_endpoint: config.provider.logout_endpoint.clone(),
            post_logout_redirect_uri: config.client.post_logout_redirect_uri.clone(),
            state_ttl: config.login.state_ttl,
        }
    }
}

/// Drives the Authorization Code flow and the session lifecycle.
pub struct FlowOrchestrator {
    client: Arc<AuthClient>,
    validator: Arc<TokenValidator>,
    sessions: Arc<SessionStore>,
    pending: Arc<PendingLogins>,
    settings: FlowSettings,
}

impl FlowOrchestrator {
    /// Create an orchestrator over an explicit session store.
    #[must_use]
    pub fn new(
        client: Arc<AuthClient>,
        validator: Arc<TokenValidator>,
        sessions: Arc<SessionStore>,
        settings: FlowSettings,
    ) -> Self {
        if !validator.has_key_source() {
            warn!("No jwks_uri configured: ID Token signatures cannot be verified, logins returning an ID Token will be refused");
        }
        if settings.issuer.is_none() {
            warn!("No issuer configured: logins returning an ID Token will be refused");
        }

        Self {
            client,
            validator,
            sessions,
            pending: Arc::new(PendingLogins::new(settings.state_ttl)),
            settings,
        }
    }

    /// The session store
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Outstanding pending logins
    pub fn pending_logins(&self) -> &Arc<PendingLogins> {
        &self.pending
    }

    /// Begin a login: remember a fresh `state` and build the authorization URL.
    pub fn start_login(&self) -> LoginRedirect {
        let (handle, state) = self.pending.issue();
        LoginRedirect {
            url: self.client.build_authorization_url(&state),
            handle,
        }
    }

    /// Complete a login from the authorization server's redirect.
    ///
    /// The pending login behind `handle` is consumed whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`FlowError::StateMismatch`] for an unknown, expired, missing or different `state`
    /// - [`FlowError::AuthorizationDenied`] when the server reported an error
    /// - [`FlowError::MissingCode`] when no code was returned
    /// - [`FlowError::OAuth`] when the exchange fails
    /// - [`FlowError::Validation`] when the ID Token fails validation or
    ///   cannot be validated for lack of issuer or key source
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
        handle: Option<&LoginHandle>,
    ) -> Result<SessionId, FlowError> {
        if let Err(rejection) = self.pending.redeem(handle, params.state.as_deref()) {
            warn!(reason = %rejection, "Callback rejected");
            return Err(FlowError::StateMismatch(rejection));
        }

        if let Some(error) = &params.error {
            warn!(error = %error, description = ?params.error_description, "Authorization server returned an error");
            return Err(FlowError::AuthorizationDenied {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(FlowError::MissingCode)?;

        let tokens = self.client.exchange_code_for_tokens(code).await?;

        let claims = match tokens.id_token.as_deref() {
            Some(id_token) => Some(self.validate_id_token(id_token).await?),
            None => None,
        };

        let session = UserSession::from_tokens(tokens, claims.as_ref());
        let id = self.sessions.create(session);
        info!(
            session = %id.fingerprint(),
            subject = ?claims.as_ref().and_then(|c| c.subject.as_deref()),
            "Login completed"
        );
        Ok(id)
    }

    /// Refresh the session's tokens.
    ///
    /// Nothing is written unless the refresh grant succeeds and any returned
    /// ID Token validates. A response without `refresh_token` keeps the
    /// current one.
    ///
    /// # Errors
    ///
    /// [`FlowError::UnknownSession`], [`FlowError::NoRefreshToken`],
    /// [`FlowError::OAuth`] (including a response without `access_token`) and
    /// [`FlowError::Validation`].
    pub async fn refresh(&self, id: &SessionId) -> Result<RefreshSummary, FlowError> {
        let mut session = self
            .sessions
            .lock(id)
            .await
            .ok_or(FlowError::UnknownSession)?;
        let refresh_token = session
            .refresh_token
            .clone()
            .ok_or(FlowError::NoRefreshToken)?;

        let tokens = self.client.refresh(&refresh_token).await.inspect_err(|e| {
            warn!(session = %id.fingerprint(), error = %e, "Token refresh failed");
        })?;

        let access_token = tokens.access_token.ok_or_else(|| {
            OAuthError::TokenRefresh(UpstreamFailure::Malformed(
                "response carried no access_token".to_string(),
            ))
        })?;
        let id_token = match tokens.id_token {
            Some(id_token) => {
                let claims = self.validate_id_token(&id_token).await?;
                Some((id_token, claims))
            }
            None => None,
        };

        let summary = RefreshSummary {
            refresh_token_rotated: tokens.refresh_token.is_some(),
            id_token_replaced: id_token.is_some(),
        };

        session.access_token = Some(access_token);
        if let Some(rotated) = tokens.refresh_token {
            session.refresh_token = Some(rotated);
        }
        if let Some((id_token, claims)) = id_token {
            session.id_token = Some(id_token);
            session.subject = claims.subject;
            session.name = claims.name;
        }
        session.touch();

        info!(
            session = %id.fingerprint(),
            rotated = summary.refresh_token_rotated,
            "Tokens refreshed"
        );
        Ok(summary)
    }

    /// Revoke the session's access and refresh tokens.
    ///
    /// Each token is revoked independently; a success clears that token, a
    /// failure leaves it in place. The ID Token is cleared either way.
    ///
    /// # Errors
    ///
    /// [`FlowError::UnknownSession`], [`FlowError::OAuth`] when no revocation
    /// endpoint is configured (only the ID Token is cleared), and
    /// [`FlowError::PartialRevocation`] when either call failed.
    pub async fn revoke(&self, id: &SessionId) -> Result<RevocationReport, FlowError> {
        let mut session = self
            .sessions
            .lock(id)
            .await
            .ok_or(FlowError::UnknownSession)?;

        if self.client.endpoints().revocation.is_none() {
            session.id_token = None;
            session.touch();
            return Err(OAuthError::Configuration(
                "no revocation_endpoint configured".to_string(),
            )
            .into());
        }

        let access_token = self
            .revoke_one(session.access_token.as_deref(), TokenTypeHint::AccessToken)
            .await;
        if access_token == RevocationOutcome::Revoked {
            session.access_token = None;
        }

        let refresh_token = self
            .revoke_one(session.refresh_token.as_deref(), TokenTypeHint::RefreshToken)
            .await;
        if refresh_token == RevocationOutcome::Revoked {
            session.refresh_token = None;
        }

        session.id_token = None;
        session.touch();
        let emptied = session.holds_no_tokens();

        let report = RevocationReport {
            access_token,
            refresh_token,
        };
        if report.is_complete() {
            info!(session = %id.fingerprint(), emptied, "Tokens revoked");
            Ok(report)
        } else {
            warn!(session = %id.fingerprint(), %report, emptied, "Revocation incomplete");
            Err(FlowError::PartialRevocation { report })
        }
    }

    /// End the session. Idempotent.
    pub async fn logout(&self, id: Option<&SessionId>) -> LogoutOutcome {
        let session_removed = id.is_some_and(|id| self.sessions.delete(id));
        if session_removed {
            info!("Logged out");
        }

        LogoutOutcome {
            session_removed,
            redirect: self.end_session_url(),
        }
    }

    /// Display snapshot of a session, or `None` when there is none.
    pub async fn session_view(&self, id: Option<&SessionId>) -> Option<SessionView> {
        let session = self.sessions.get(id?).await?;
        Some(SessionView {
            server_name: self.server_name(),
            subject: session.subject.clone(),
            name: session.name.clone(),
            has_access_token: session.access_token.is_some(),
            has_refresh_token: session.refresh_token.is_some(),
            has_id_token: session.id_token.is_some(),
            id_token_claims: session.id_token_claims(),
            access_token_claims: session.access_token_claims(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        })
    }

    /// Host of the authorization endpoint, for display.
    pub fn server_name(&self) -> String {
        let endpoint = &self.client.endpoints().authorization;
        match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => endpoint.to_string(),
        }
    }

    async fn validate_id_token(&self, id_token: &str) -> Result<ValidatedClaims, FlowError> {
        self.validator
            .validate(id_token, self.settings.issuer.as_deref(), self.client.client_id())
            .await
            .map_err(|e| {
                warn!(error = %e, "ID Token rejected");
                FlowError::from(e)
            })
    }

    async fn revoke_one(&self, token: Option<&str>, hint: TokenTypeHint) -> RevocationOutcome {
        let Some(token) = token else {
            return RevocationOutcome::NotPresent;
        };
        match self.client.revoke(token, hint).await {
            Ok(()) => RevocationOutcome::Revoked,
            Err(e) => {
                warn!(hint = hint.as_str(), error = %e, "Token revocation failed");
                RevocationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn end_session_url(&self) -> Option<Url> {
        let mut url = self.settings.logout_endpoint.clone()?;
        if let Some(after) = &self.settings.post_logout_redirect_uri {
            url.query_pairs_mut()
                .append_pair("redirect_uri", after.as_str());
        }
        Some(url)
    }
}

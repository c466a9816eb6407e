//! Flow errors and revocation reporting.

use std::fmt;

use serde::Serialize;

use super::pending::StateRejection;
use crate::oauth::OAuthError;
use crate::oidc::ValidationError;

/// What happened to one token during revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevocationOutcome {
    /// Revoked upstream and cleared from the session.
    Revoked,
    /// The session held no such token.
    NotPresent,
    /// The revocation call failed. The token is still in the session.
    Failed {
        /// Upstream failure, as text
        reason: String,
    },
}

impl RevocationOutcome {
    /// Whether this token no longer needs revoking.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for RevocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revoked => f.write_str("revoked"),
            Self::NotPresent => f.write_str("not present"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// Per-token result of a revoke operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationReport {
    /// Access token outcome
    pub access_token: RevocationOutcome,
    /// Refresh token outcome
    pub refresh_token: RevocationOutcome,
}

impl RevocationReport {
    /// Whether both tokens are revoked or were absent.
    pub fn is_complete(&self) -> bool {
        self.access_token.is_settled() && self.refresh_token.is_settled()
    }
}

impl fmt::Display for RevocationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "access token {}, refresh token {}",
            self.access_token, self.refresh_token
        )
    }
}

/// Errors surfaced by [`FlowOrchestrator`](super::FlowOrchestrator) operations.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The callback's `state` could not be matched to a pending login.
    #[error("State mismatch: {0}")]
    StateMismatch(StateRejection),

    /// The callback carried no authorization code.
    #[error("No authorization code in callback")]
    MissingCode,

    /// The authorization server returned an error to the callback.
    #[error("Authorization denied: {error}")]
    AuthorizationDenied {
        /// OAuth error code, e.g. `access_denied`
        error: String,
        /// Optional human-readable description
        description: Option<String>,
    },

    /// No session exists for the presented identifier.
    #[error("Unknown session")]
    UnknownSession,

    /// The session holds no refresh token.
    #[error("Session has no refresh token")]
    NoRefreshToken,

    /// At least one token could not be revoked.
    #[error("Partial revocation: {report}")]
    PartialRevocation {
        /// Outcome for each token
        report: RevocationReport,
    },

    /// Token endpoint, revocation endpoint or client configuration failure.
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    /// ID Token validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl FlowError {
    /// Stable `snake_case` tag for responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateMismatch(_) => "state_mismatch",
            Self::MissingCode => "missing_code",
            Self::AuthorizationDenied { .. } => "authorization_denied",
            Self::UnknownSession => "unknown_session",
            Self::NoRefreshToken => "no_refresh_token",
            Self::PartialRevocation { .. } => "partial_revocation",
            Self::OAuth(OAuthError::TokenExchange(_)) => "token_exchange",
            Self::OAuth(OAuthError::TokenRefresh(_)) => "token_refresh",
            Self::OAuth(OAuthError::Revocation(_)) => "revocation",
            Self::OAuth(OAuthError::Discovery(_)) => "discovery",
            Self::OAuth(OAuthError::Configuration(_))
            | Self::Validation(ValidationError::Configuration(_)) => "configuration",
            Self::Validation(ValidationError::Signature(_)) => "signature",
            Self::Validation(ValidationError::ClaimValidation { .. }) => "claim_validation",
        }
    }

    /// Whether the failure lies with this deployment or the authorization
    /// server rather than with the browser's request.
    pub fn is_server_side(&self) -> bool {
        matches!(
            self,
            Self::OAuth(_)
                | Self::PartialRevocation { .. }
                | Self::Validation(ValidationError::Configuration(_))
        )
    }
}

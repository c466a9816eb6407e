//! Session identifier and per-user token state.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngExt;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::oauth::TokenResponse;
use crate::oidc::{ValidatedClaims, peek_claims};

/// Opaque session identifier carried by the browser.
///
/// 256 bits from the thread CSPRNG, base64url encoded. `Debug` prints a
/// fingerprint, never the identifier itself.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh, unguessable identifier.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an identifier received from the browser.
    #[must_use]
    pub fn from_cookie(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identifier, for writing into a cookie.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-reversible tag for log correlation.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.fingerprint())
    }
}

/// One authenticated browser session.
///
/// A non-empty `refresh_token` always came from a completed token exchange,
/// and an `id_token` is only stored after it passed validation.
#[derive(Clone)]
pub struct UserSession {
    /// Access token
    pub access_token: Option<String>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Validated ID Token
    pub id_token: Option<String>,
    /// `sub` of the validated ID Token
    pub subject: Option<String>,
    /// Display name from the validated ID Token
    pub name: Option<String>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When tokens were last replaced or cleared
    pub updated_at: DateTime<Utc>,
}

impl UserSession {
    /// Build a session from a token exchange. `claims` must come from the
    /// validation of `tokens.id_token`.
    #[must_use]
    pub fn from_tokens(tokens: TokenResponse, claims: Option<&ValidatedClaims>) -> Self {
        let now = Utc::now();
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            subject: claims.and_then(|c| c.subject.clone()),
            name: claims.and_then(|c| c.name.clone()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Unverified view of the ID Token payload, for display.
    pub fn id_token_claims(&self) -> Option<Value> {
        self.id_token.as_deref().and_then(peek_claims)
    }

    /// Unverified view of the access token payload, for display. `None` for
    /// opaque access tokens.
    pub fn access_token_claims(&self) -> Option<Value> {
        self.access_token.as_deref().and_then(peek_claims)
    }

    /// Whether every token has been cleared.
    pub fn holds_no_tokens(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.id_token.is_none()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl fmt::Debug for UserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSession")
            .field("access_token", &self.access_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .field("id_token", &self.id_token.is_some())
            .field("subject", &self.subject)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

//! ID Token validation.
//!
//! # Verification flow
//!
//! 1. Refuse to run without an expected issuer or a key source.
//! 2. Decode the JWS header (no verification) to get `kid` and `alg`.
//! 3. Reject anything but RS*, PS*, ES256/384 and EdDSA.
//! 4. Resolve the key through [`KeySetCache`] (one refetch on unknown `kid`).
//! 5. Verify the signature.
//! 6. Check `iss`, `aud`, `exp` and `nbf`, in that order, with clock-skew
//!    leeway on the time claims.
//!
//! The signature library only verifies the signature here. Claim checks are
//! done by hand so each failure names the claim that failed.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::jwks::{JwksError, KeySetCache};

/// Algorithms an ID Token may be signed with.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// A registered claim that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Claim {
    /// `iss`
    Issuer,
    /// `aud`
    Audience,
    /// `exp`
    Expiry,
    /// `nbf`
    NotBefore,
}

impl std::fmt::Display for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Issuer => "issuer",
            Self::Audience => "audience",
            Self::Expiry => "expiry",
            Self::NotBefore => "not_before",
        })
    }
}

/// Why a signature could not be trusted.
#[derive(Debug, thiserror::Error)]
pub enum SignatureFailure {
    /// Not a well-formed compact JWS.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// `alg` is not an accepted asymmetric algorithm, or does not fit the key.
    #[error("algorithm {0:?} is not accepted")]
    Algorithm(Algorithm),

    /// No key could be resolved for the token (`KeyNotFound` or fetch failure).
    #[error("no verification key: {0}")]
    Key(#[source] JwksError),

    /// The signature does not verify under the resolved key.
    #[error("signature does not verify")]
    Mismatch,
}

/// ID Token validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Signature could not be verified. Claims were not looked at.
    #[error("Signature validation failed: {0}")]
    Signature(#[from] SignatureFailure),

    /// Signature verified but a registered claim did not.
    #[error("Claim validation failed ({claim}): {detail}")]
    ClaimValidation {
        /// Which claim failed
        claim: Claim,
        /// Human-readable reason
        detail: String,
    },

    /// No trust anchor configured. Never downgraded to "unverified".
    #[error("Token validation not configured: {0}")]
    Configuration(String),
}

impl ValidationError {
    fn claim(claim: Claim, detail: impl Into<String>) -> Self {
        Self::ClaimValidation {
            claim,
            detail: detail.into(),
        }
    }
}

/// Claims of an ID Token that passed validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedClaims {
    /// `iss`
    pub issuer: String,
    /// `sub`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `aud`, normalized to a list
    pub audience: Vec<String>,
    /// `exp` (Unix seconds)
    pub expires_at: i64,
    /// `nbf` (Unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<i64>,
    /// `name`, falling back to `preferred_username`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The full claim set
    pub claims: Value,
}

/// Verifies ID Tokens against a provider's key set.
pub struct TokenValidator {
    keys: Option<Arc<KeySetCache>>,
    leeway: Duration,
}

impl TokenValidator {
    /// Create a validator. `None` means no `jwks_uri` was configured and
    /// every validation fails with [`ValidationError::Configuration`].
    #[must_use]
    pub fn new(keys: Option<Arc<KeySetCache>>) -> Self {
        Self {
            keys,
            leeway: Duration::from_secs(60),
        }
    }

    /// Clock-skew tolerance for `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Whether a key source is configured.
    pub fn has_key_source(&self) -> bool {
        self.keys.is_some()
    }

    /// Validate `id_token` for `expected_issuer` and `expected_audience`.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::Configuration`] without an issuer or key source
    /// - [`ValidationError::Signature`] for malformed tokens, rejected
    ///   algorithms, unknown keys and bad signatures
    /// - [`ValidationError::ClaimValidation`] naming the first failing claim
    pub async fn validate(
        &self,
        id_token: &str,
        expected_issuer: Option<&str>,
        expected_audience: &str,
    ) -> Result<ValidatedClaims, ValidationError> {
        let issuer = expected_issuer
            .ok_or_else(|| ValidationError::Configuration("no issuer configured".to_string()))?;
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| ValidationError::Configuration("no jwks_uri configured".to_string()))?;

        let claims = verify_signature(keys, id_token).await?;
        self.check_claims(claims, issuer, expected_audience, chrono::Utc::now().timestamp())
    }

    fn check_claims(
        &self,
        claims: Value,
        expected_issuer: &str,
        expected_audience: &str,
        now: i64,
    ) -> Result<ValidatedClaims, ValidationError> {
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);

        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::claim(Claim::Issuer, "missing iss"))?;
        if issuer != expected_issuer {
            return Err(ValidationError::claim(
                Claim::Issuer,
                format!("expected {expected_issuer}, got {issuer}"),
            ));
        }

        let audience = audience_list(claims.get("aud"))
            .ok_or_else(|| ValidationError::claim(Claim::Audience, "missing aud"))?;
        if !audience.iter().any(|a| a == expected_audience) {
            return Err(ValidationError::claim(
                Claim::Audience,
                format!("{expected_audience} is not an audience of this token"),
            ));
        }

        let expires_at = numeric_date(&claims, "exp")
            .ok_or_else(|| ValidationError::claim(Claim::Expiry, "missing exp"))?;
        if expires_at.saturating_add(leeway) <= now {
            return Err(ValidationError::claim(
                Claim::Expiry,
                format!("expired at {expires_at}"),
            ));
        }

        let not_before = numeric_date(&claims, "nbf");
        if let Some(nbf) = not_before
            && nbf.saturating_sub(leeway) > now
        {
            return Err(ValidationError::claim(
                Claim::NotBefore,
                format!("not valid before {nbf}"),
            ));
        }

        let issuer = issuer.to_string();
        let subject = claims.get("sub").and_then(Value::as_str).map(String::from);
        let name = claims
            .get("name")
            .or_else(|| claims.get("preferred_username"))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(ValidatedClaims {
            issuer,
            subject,
            audience,
            expires_at,
            not_before,
            name,
            claims,
        })
    }
}

async fn verify_signature(keys: &KeySetCache, token: &str) -> Result<Value, SignatureFailure> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| SignatureFailure::Malformed(e.to_string()))?;

    if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
        return Err(SignatureFailure::Algorithm(header.alg));
    }

    let key = keys
        .get_key(header.kid.as_deref())
        .await
        .map_err(SignatureFailure::Key)?;
    if !key.permits(header.alg) {
        return Err(SignatureFailure::Algorithm(header.alg));
    }

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.set_required_spec_claims::<&str>(&[]);

    let data = jsonwebtoken::decode::<Value>(token, key.decoding_key(), &validation).map_err(
        |e| match e.kind() {
            ErrorKind::InvalidSignature => SignatureFailure::Mismatch,
            ErrorKind::InvalidAlgorithm => SignatureFailure::Algorithm(header.alg),
            _ => SignatureFailure::Malformed(e.to_string()),
        },
    )?;

    debug!(kid = ?key.kid(), alg = ?header.alg, "ID Token signature verified");
    Ok(data.claims)
}

/// `aud` may be a single string or an array of strings.
fn audience_list(aud: Option<&Value>) -> Option<Vec<String>> {
    match aud? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn numeric_date(claims: &Value, name: &str) -> Option<i64> {
    let value = claims.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.floor() as i64))
}

/// Decode a JWT payload without verifying anything.
///
/// For display only. Returns `None` for opaque (non-JWT) tokens.
pub fn peek_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

//! OpenID Connect ID Token verification
//!
//! - [`KeySetCache`]: signing keys fetched from the provider's JWKS document
//! - [`TokenValidator`]: signature, issuer, audience, expiry and not-before
//!   checks on a compact JWS ID Token

pub mod jwks;
pub mod validator;

pub use jwks::{HttpKeySource, JwksError, KeySetCache, KeySource, StaticKeySource, VerificationKey};
pub use validator::{Claim, SignatureFailure, TokenValidator, ValidatedClaims, ValidationError, peek_claims};

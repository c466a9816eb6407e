//! Process-level error types
//!
//! Protocol failures carry their own per-layer enums
//! ([`OAuthError`](crate::oauth::OAuthError),
//! [`ValidationError`](crate::oidc::ValidationError),
//! [`FlowError`](crate::flow::FlowError)). This type covers what can go wrong
//! while assembling and running the process around them.

use std::io;

use thiserror::Error;

/// Result type alias for the relying party
pub type Result<T> = std::result::Result<T, Error>;

/// Relying party startup and runtime errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider discovery or client setup failed
    #[error(transparent)]
    OAuth(#[from] crate::oauth::OAuthError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

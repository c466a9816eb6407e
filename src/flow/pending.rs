//! Pending logins: the anti-CSRF `state` remembered between `/login` and `/callback`.
//!
//! Each login attempt gets a random `state` stored under an opaque
//! [`LoginHandle`] that the browser carries in a short-lived cookie. A
//! pending login is single-use: redeeming removes it whether the check passes
//! or not. Records older than the TTL are refused and swept by a background
//! reaper.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use rand::RngExt;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Opaque reference to a pending login, carried by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginHandle(String);

impl LoginHandle {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap a handle received from the browser.
    #[must_use]
    pub fn from_cookie(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The handle, for writing into a cookie.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Why a callback's `state` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRejection {
    /// The browser presented no handle, or one we never issued or already redeemed.
    UnknownLogin,
    /// The pending login outlived its TTL.
    Expired,
    /// The callback carried no `state` parameter.
    Missing,
    /// The `state` differs from the one issued.
    Mismatch,
}

impl fmt::Display for StateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnknownLogin => "no pending login",
            Self::Expired => "pending login expired",
            Self::Missing => "state parameter missing",
            Self::Mismatch => "state parameter does not match",
        })
    }
}

struct PendingLogin {
    state: String,
    issued_at: Instant,
}

/// Pending login records keyed by handle.
pub struct PendingLogins {
    entries: DashMap<LoginHandle, PendingLogin>,
    ttl: Duration,
}

impl PendingLogins {
    /// Create an empty set whose records expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Generate a fresh `state` and remember it. Returns `(handle, state)`.
    pub fn issue(&self) -> (LoginHandle, String) {
        let state = generate_state();
        let handle = self.remember(state.clone());
        (handle, state)
    }

    /// Remember a caller-chosen `state` under a new handle.
    pub fn remember(&self, state: String) -> LoginHandle {
        let handle = LoginHandle::generate();
        self.entries.insert(
            handle.clone(),
            PendingLogin {
                state,
                issued_at: Instant::now(),
            },
        );
        handle
    }

    /// Consume the pending login behind `handle` and check `presented` against it.
    ///
    /// The record is removed before any comparison, so a second attempt with
    /// the same handle always fails with [`StateRejection::UnknownLogin`].
    pub fn redeem(
        &self,
        handle: Option<&LoginHandle>,
        presented: Option<&str>,
    ) -> Result<(), StateRejection> {
        let (_, pending) = handle
            .and_then(|h| self.entries.remove(h))
            .ok_or(StateRejection::UnknownLogin)?;

        if pending.issued_at.elapsed() >= self.ttl {
            return Err(StateRejection::Expired);
        }
        let presented = presented.ok_or(StateRejection::Missing)?;
        if bool::from(presented.as_bytes().ct_eq(pending.state.as_bytes())) {
            Ok(())
        } else {
            Err(StateRejection::Mismatch)
        }
    }

    /// Drop records older than the TTL. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, pending| pending.issued_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Number of outstanding pending logins.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no login is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 128 bits from the thread CSPRNG, base64url encoded.
fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Spawn a background task that sweeps expired pending logins every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    pending: Arc<PendingLogins>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = pending.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired pending logins");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Pending login reaper shutting down");
                    break;
                }
            }
        }
    })
}

//! JWKS key-set cache.
//!
//! Keys are indexed by `kid`. A lookup miss triggers one refetch of the whole
//! key set, which is how provider key rotation is picked up. Concurrent
//! misses coalesce: whichever task takes the refresh lock fetches, and tasks
//! queued behind it see the bumped generation and reuse the new snapshot
//! instead of fetching again.
//!
//! Only asymmetric signing keys are indexed. `oct` keys, keys marked
//! `"use": "enc"` and keys declaring a non-signing `alg` are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Key-set lookup and fetch failures.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// Network, TLS, timeout or JSON error while fetching the key set.
    #[error("JWKS fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The JWKS endpoint answered with a non-success status.
    #[error("JWKS endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),

    /// No key matches the token's `kid`, even after a refetch.
    #[error("Unknown key ID: {0}")]
    KeyNotFound(String),
}

/// Where a key set comes from.
#[async_trait]
pub trait KeySource: Send + Sync + 'static {
    /// Fetch the current key set.
    async fn fetch(&self) -> Result<JwkSet, JwksError>;
}

/// Fetches the key set from a `jwks_uri` over HTTP.
pub struct HttpKeySource {
    http: reqwest::Client,
    uri: Url,
}

impl HttpKeySource {
    /// Create a source for `uri` using the shared outbound client.
    #[must_use]
    pub fn new(http: reqwest::Client, uri: Url) -> Self {
        Self { http, uri }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        debug!(uri = %self.uri, "Fetching JWKS");
        let response = self.http.get(self.uri.clone()).send().await?;
        if !response.status().is_success() {
            return Err(JwksError::Status(response.status()));
        }
        Ok(response.json::<JwkSet>().await?)
    }
}

/// A fixed key set, for deployments that pin keys out of band.
pub struct StaticKeySource(JwkSet);

impl StaticKeySource {
    /// Wrap an already-parsed key set.
    #[must_use]
    pub fn new(keys: JwkSet) -> Self {
        Self(keys)
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        Ok(self.0.clone())
    }
}

/// Key type of a JWK, used to reject a header `alg` from the wrong family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    Ec,
    Okp,
}

impl KeyFamily {
    fn accepts(self, alg: Algorithm) -> bool {
        match self {
            Self::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            Self::Ec => matches!(alg, Algorithm::ES256 | Algorithm::ES384),
            Self::Okp => alg == Algorithm::EdDSA,
        }
    }
}

/// A public key able to verify ID Token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl VerificationKey {
    /// The key's `kid`, if the JWK carried one.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// The `alg` the JWK is pinned to, if declared.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether a token signed with `alg` may be verified with this key.
    pub fn permits(&self, alg: Algorithm) -> bool {
        self.family.accepts(alg) && self.algorithm.is_none_or(|pinned| pinned == alg)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    fn from_jwk(jwk: &Jwk) -> Option<Self> {
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return None;
        }

        let algorithm = match &jwk.common.key_algorithm {
            Some(declared) => Some(signing_algorithm(declared)?),
            None => None,
        };

        let (family, key) = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => (
                KeyFamily::Rsa,
                DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()?,
            ),
            AlgorithmParameters::EllipticCurve(ec) => (
                KeyFamily::Ec,
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()?,
            ),
            AlgorithmParameters::OctetKeyPair(okp) => (
                KeyFamily::Okp,
                DecodingKey::from_ed_components(&okp.x).ok()?,
            ),
            AlgorithmParameters::OctetKey(_) => return None,
        };

        Some(Self {
            kid: jwk.common.key_id.clone(),
            algorithm,
            family,
            key,
        })
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// Map a JWK `alg` to a signature algorithm. `None` for HMAC and encryption algorithms.
fn signing_algorithm(declared: &KeyAlgorithm) -> Option<Algorithm> {
    match declared {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// One indexed key set.
struct KeySnapshot {
    generation: u64,
    fetched_at: Option<Instant>,
    by_kid: HashMap<String, VerificationKey>,
    all: Vec<VerificationKey>,
}

impl KeySnapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            fetched_at: None,
            by_kid: HashMap::new(),
            all: Vec::new(),
        }
    }

    fn index(set: &JwkSet, generation: u64) -> Self {
        let all: Vec<VerificationKey> = set.keys.iter().filter_map(VerificationKey::from_jwk).collect();
        let skipped = set.keys.len() - all.len();
        if skipped > 0 {
            debug!(skipped, "Ignored JWKS entries that are not asymmetric signing keys");
        }

        let by_kid = all
            .iter()
            .filter_map(|k| k.kid.clone().map(|kid| (kid, k.clone())))
            .collect();

        Self {
            generation,
            fetched_at: Some(Instant::now()),
            by_kid,
            all,
        }
    }

    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        match (self.fetched_at, ttl) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(at), Some(ttl)) => at.elapsed() < ttl,
        }
    }

    /// A token without `kid` resolves only when the set is unambiguous.
    fn lookup(&self, kid: Option<&str>) -> Option<VerificationKey> {
        match kid {
            Some(kid) => self.by_kid.get(kid).cloned(),
            None if self.all.len() == 1 => self.all.first().cloned(),
            None => None,
        }
    }
}

/// Cache of verification keys for one provider.
pub struct KeySetCache {
    source: Arc<dyn KeySource>,
    snapshot: RwLock<Arc<KeySnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    ttl: Option<Duration>,
}

impl KeySetCache {
    /// Create an empty cache. Nothing is fetched until the first lookup.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(KeySnapshot::empty())),
            refresh_lock: tokio::sync::Mutex::new(()),
            ttl: None,
        }
    }

    /// Refetch the set on next use once it is older than `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Number of completed fetches.
    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    /// Number of indexed keys in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.read().all.len()
    }

    /// Whether the current snapshot holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the key for `kid`, fetching or refetching the set as needed.
    ///
    /// # Errors
    ///
    /// [`JwksError::KeyNotFound`] when the key is absent after one refetch;
    /// fetch errors when the set could not be retrieved and no cached key matches.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<VerificationKey, JwksError> {
        let current = self.current();
        let cached = current.lookup(kid);
        if let Some(key) = &cached
            && current.is_fresh(self.ttl)
        {
            return Ok(key.clone());
        }

        if cached.is_none() && current.fetched_at.is_some() {
            debug!(kid = kid.unwrap_or("<none>"), "Key not found in cached JWKS, refreshing");
        }

        match self.refresh_after(current.generation).await {
            Ok(snapshot) => snapshot
                .lookup(kid)
                .ok_or_else(|| JwksError::KeyNotFound(kid.unwrap_or("<none>").to_string())),
            Err(e) => match cached {
                Some(stale) => {
                    warn!(error = %e, "JWKS refresh failed, using stale key");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    fn current(&self) -> Arc<KeySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Fetch a new snapshot unless one newer than `seen` appeared while waiting.
    async fn refresh_after(&self, seen: u64) -> Result<Arc<KeySnapshot>, JwksError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.current();
        if current.generation > seen {
            return Ok(current);
        }

        let set = self.source.fetch().await?;
        let snapshot = Arc::new(KeySnapshot::index(&set, current.generation + 1));
        info!(
            generation = snapshot.generation,
            keys = snapshot.all.len(),
            "JWKS refreshed"
        );
        *self.snapshot.write() = Arc::clone(&snapshot);
        Ok(snapshot)
    }
}

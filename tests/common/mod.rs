//! Shared helpers: a mock authorization server and ID Token minting.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_relying_party::config::ClientAuthMethod;
use oidc_relying_party::flow::{FlowOrchestrator, FlowSettings, LoginHandle};
use oidc_relying_party::oauth::{AuthClient, ClientCredentials, Endpoints, TokenResponse};
use oidc_relying_party::oidc::{HttpKeySource, KeySetCache, TokenValidator};
use oidc_relying_party::session::{SessionId, SessionStore, UserSession};

pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "rp-client";
pub const CLIENT_SECRET: &str = "rp-secret";
pub const PRIMARY_KID: &str = "primary-2026";
pub const ROTATED_KID: &str = "rotated-2026";

pub const PRIMARY_PEM: &str = include_str!("../fixtures/signing_key_primary.pem");
pub const ROTATED_PEM: &str = include_str!("../fixtures/signing_key_rotated.pem");
pub const PRIMARY_JWKS: &str = include_str!("../fixtures/jwks_primary.json");
pub const ROTATED_JWKS: &str = include_str!("../fixtures/jwks_rotated.json");

/// How the orchestrator under test is wired.
pub struct Wiring {
    pub jwks: bool,
    pub revocation: bool,
    pub logout: bool,
    pub timeout: Duration,
}

impl Default for Wiring {
    fn default() -> Self {
        Self {
            jwks: true,
            revocation: true,
            logout: false,
            timeout: Duration::from_secs(5),
        }
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims of a valid ID Token for the test client
pub fn id_claims(issuer: &str) -> Value {
    json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": "user-42",
        "name": "Ada Lovelace",
        "iat": now(),
        "exp": now() + 300,
    })
}

pub fn sign_with(pem: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn sign(claims: &Value) -> String {
    sign_with(PRIMARY_PEM, PRIMARY_KID, claims)
}

/// Flip one character inside the signature segment.
pub fn tamper(token: &str) -> String {
    let mut chars: Vec<char> = token.chars().collect();
    let at = chars.len() - 20;
    chars[at] = if chars[at] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}

pub fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", server.uri())).unwrap()
}

/// Serve the primary JWKS at `/jwks`
pub async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRIMARY_JWKS))
        .mount(server)
        .await;
}

/// Answer every token request with `body`
pub async fn mount_token_response(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub fn orchestrator(server: &MockServer, wiring: &Wiring) -> FlowOrchestrator {
    let http = reqwest::Client::builder()
        .timeout(wiring.timeout)
        .build()
        .unwrap();

    let client = AuthClient::new(
        http.clone(),
        Endpoints {
            authorization: url(server, "/authorize"),
            token: url(server, "/token"),
            revocation: wiring.revocation.then(|| url(server, "/revoke")),
        },
        ClientCredentials {
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            redirect_uri: Url::parse("http://localhost:5443/callback").unwrap(),
            scope: "openid profile".to_string(),
            auth_method: ClientAuthMethod::ClientSecretPost,
        },
    );

    let keys = wiring.jwks.then(|| {
        Arc::new(KeySetCache::new(Arc::new(HttpKeySource::new(
            http,
            url(server, "/jwks"),
        ))))
    });

    FlowOrchestrator::new(
        Arc::new(client),
        Arc::new(TokenValidator::new(keys)),
        Arc::new(SessionStore::new()),
        FlowSettings {
            issuer: Some(ISSUER.to_string()),
            logout_endpoint: wiring.logout.then(|| url(server, "/logout")),
            post_logout_redirect_uri: None,
            state_ttl: Duration::from_secs(600),
        },
    )
}

/// Start a login and return the handle with the `state` sent to the server.
pub fn begin_login(flow: &FlowOrchestrator) -> (LoginHandle, String) {
    let login = flow.start_login();
    let state = login
        .url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    (login.handle, state)
}

/// Store an authenticated session holding the given tokens
pub fn seed_session(
    flow: &FlowOrchestrator,
    access: &str,
    refresh: Option<&str>,
    id_token: Option<&str>,
) -> SessionId {
    flow.sessions().create(UserSession::from_tokens(
        TokenResponse {
            access_token: Some(access.to_string()),
            refresh_token: refresh.map(str::to_string),
            id_token: id_token.map(str::to_string),
            ..TokenResponse::default()
        },
        None,
    ))
}

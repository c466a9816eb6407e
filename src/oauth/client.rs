//! OAuth Client
//!
//! Maps the three token-endpoint interactions (code exchange, refresh,
//! revocation) to HTTP requests and their responses to typed results.

use std::fmt;

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{OAuthError, UpstreamFailure};
use crate::config::{ClientAuthMethod, ClientConfig, Config, ProviderConfig};

/// Authorization server endpoints used by the client.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Where the browser is sent to authenticate
    pub authorization: Url,
    /// Token endpoint for code exchange and refresh
    pub token: Url,
    /// RFC 7009 revocation endpoint
    pub revocation: Option<Url>,
}

impl Endpoints {
    /// Take endpoints from resolved provider settings.
    ///
    /// # Errors
    ///
    /// [`OAuthError::Configuration`] if the authorization or token endpoint is unset.
    pub fn from_config(provider: &ProviderConfig) -> Result<Self, OAuthError> {
        Ok(Self {
            authorization: provider.authorization_endpoint.clone().ok_or_else(|| {
                OAuthError::Configuration("no authorization_endpoint configured".to_string())
            })?,
            token: provider
                .token_endpoint
                .clone()
                .ok_or_else(|| OAuthError::Configuration("no token_endpoint configured".to_string()))?,
            revocation: provider.revocation_endpoint.clone(),
        })
    }
}

/// The registered client's identity.
#[derive(Clone)]
pub struct ClientCredentials {
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Registered redirect URI
    pub redirect_uri: Url,
    /// Space-separated scopes requested at login
    pub scope: String,
    /// How the secret is presented to the token endpoint
    pub auth_method: ClientAuthMethod,
}

impl ClientCredentials {
    /// Take credentials from client settings.
    ///
    /// # Errors
    ///
    /// [`OAuthError::Configuration`] if `redirect_uri` is unset.
    pub fn from_config(client: &ClientConfig) -> Result<Self, OAuthError> {
        Ok(Self {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            redirect_uri: client
                .redirect_uri
                .clone()
                .ok_or_else(|| OAuthError::Configuration("no redirect_uri configured".to_string()))?,
            scope: client.scope.clone(),
            auth_method: client.auth_method,
        })
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

/// Which kind of token is being revoked (RFC 7009 §2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    /// `access_token`
    AccessToken,
    /// `refresh_token`
    RefreshToken,
}

impl TokenTypeHint {
    /// Wire value of the hint
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Token endpoint response. Every field is optional on the wire.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    #[serde(default)]
    pub access_token: Option<String>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OpenID Connect ID Token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |t: &Option<String>| t.as_ref().map(|_| "<present>");
        f.debug_struct("TokenResponse")
            .field("access_token", &shown(&self.access_token))
            .field("refresh_token", &shown(&self.refresh_token))
            .field("id_token", &shown(&self.id_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Stateless OAuth 2.0 client, shared across requests.
pub struct AuthClient {
    http: Client,
    endpoints: Endpoints,
    credentials: ClientCredentials,
}

impl AuthClient {
    /// Create a client
    #[must_use]
    pub fn new(http: Client, endpoints: Endpoints, credentials: ClientCredentials) -> Self {
        Self {
            http,
            endpoints,
            credentials,
        }
    }

    /// Create a client from resolved configuration (after discovery).
    ///
    /// # Errors
    ///
    /// [`OAuthError::Configuration`] if an endpoint or the redirect URI is missing.
    pub fn from_config(config: &Config, http: Client) -> Result<Self, OAuthError> {
        Ok(Self::new(
            http,
            Endpoints::from_config(&config.provider)?,
            ClientCredentials::from_config(&config.client)?,
        ))
    }

    /// The client identifier, which is also the expected ID Token audience.
    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Build the authorization request URL for `state`.
    pub fn build_authorization_url(&self, state: &str) -> Url {
        let mut url = self.endpoints.authorization.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.credentials.client_id);
            params.append_pair("redirect_uri", self.credentials.redirect_uri.as_str());
            params.append_pair("state", state);

            let scope = self.credentials.scope.trim();
            if !scope.is_empty() {
                params.append_pair("scope", scope);
            }
        }
        url
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// [`OAuthError::TokenExchange`] on transport failure, non-2xx status or malformed JSON.
    pub async fn exchange_code_for_tokens(&self, code: &str) -> Result<TokenResponse, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];
        let tokens = self
            .token_request(&params)
            .await
            .map_err(OAuthError::TokenExchange)?;
        debug!(
            id_token = tokens.id_token.is_some(),
            refresh_token = tokens.refresh_token.is_some(),
            "Authorization code exchanged"
        );
        Ok(tokens)
    }

    /// Use a refresh token to obtain new tokens.
    ///
    /// # Errors
    ///
    /// [`OAuthError::TokenRefresh`] on transport failure, non-2xx status or malformed JSON.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params)
            .await
            .map_err(OAuthError::TokenRefresh)
    }

    /// Revoke one token.
    ///
    /// # Errors
    ///
    /// [`OAuthError::Configuration`] without a revocation endpoint,
    /// [`OAuthError::Revocation`] on transport failure or non-2xx status.
    pub async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<(), OAuthError> {
        let endpoint = self.endpoints.revocation.as_ref().ok_or_else(|| {
            OAuthError::Configuration("no revocation_endpoint configured".to_string())
        })?;

        let params = [("token", token), ("token_type_hint", hint.as_str())];
        let response = self
            .authenticated_post(endpoint, &params)
            .send()
            .await
            .map_err(|e| OAuthError::Revocation(UpstreamFailure::Transport(e)))?;
        ensure_success(response)
            .await
            .map_err(OAuthError::Revocation)?;

        debug!(hint = hint.as_str(), "Token revoked");
        Ok(())
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, UpstreamFailure> {
        let response = self
            .authenticated_post(&self.endpoints.token, params)
            .send()
            .await
            .map_err(UpstreamFailure::Transport)?;
        let response = ensure_success(response).await?;

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| UpstreamFailure::Malformed(e.to_string()))
    }

    /// Form POST carrying client authentication.
    fn authenticated_post(&self, endpoint: &Url, params: &[(&str, &str)]) -> RequestBuilder {
        let credentials = &self.credentials;
        let request = self
            .http
            .post(endpoint.clone())
            .header(ACCEPT, "application/json");

        match credentials.auth_method {
            ClientAuthMethod::ClientSecretPost => {
                let mut form = params.to_vec();
                form.push(("client_id", &credentials.client_id));
                form.push(("client_secret", &credentials.client_secret));
                request.form(&form)
            }
            // RFC 6749 §2.3.1: both parts are form-urlencoded before Basic encoding
            ClientAuthMethod::ClientSecretBasic => request
                .basic_auth(
                    form_encode(&credentials.client_id),
                    Some(form_encode(&credentials.client_secret)),
                )
                .form(params),
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, UpstreamFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamFailure::Status { status, body })
}

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, auth_method: ClientAuthMethod) -> AuthClient {
        client_with_http(server, auth_method, Client::new())
    }

    fn client_with_http(server: &MockServer, auth_method: ClientAuthMethod, http: Client) -> AuthClient {
        let base = Url::parse(&server.uri()).unwrap();
        AuthClient::new(
            http,
            Endpoints {
                authorization: base.join("/authorize").unwrap(),
                token: base.join("/token").unwrap(),
                revocation: Some(base.join("/revoke").unwrap()),
            },
            ClientCredentials {
                client_id: "rp client".to_string(),
                client_secret: "s3cret:+".to_string(),
                redirect_uri: Url::parse("https://rp.example.com/callback").unwrap(),
                scope: "openid profile".to_string(),
                auth_method,
            },
        )
    }

    async fn form_of_last_request(server: &MockServer) -> HashMap<String, String> {
        let requests = server.received_requests().await.unwrap();
        let last = requests.last().unwrap();
        serde_urlencoded::from_bytes(&last.body).unwrap()
    }

    #[tokio::test]
    async fn authorization_url_carries_required_parameters() {
        let server = MockServer::start().await;
        let client = client_for(&server, ClientAuthMethod::ClientSecretPost);

        let url = client.build_authorization_url("abc123");
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/authorize");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "rp client");
        assert_eq!(query["redirect_uri"], "https://rp.example.com/callback");
        assert_eq!(query["state"], "abc123");
        assert_eq!(query["scope"], "openid profile");
    }

    #[tokio::test]
    async fn exchange_posts_code_with_client_secret_post() {
        // GIVEN: a token endpoint returning all three tokens
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "id_token": "header.payload.sig",
                "token_type": "Bearer",
                "expires_in": 300
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = client_for(&server, ClientAuthMethod::ClientSecretPost);

        // WHEN: the code is exchanged
        let tokens = client.exchange_code_for_tokens("code-1").await.unwrap();

        // THEN: tokens are mapped and the form carried the grant and credentials
        assert_eq!(tokens.access_token.as_deref(), Some("at-1"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(tokens.expires_in, Some(300));

        let form = form_of_last_request(&server).await;
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "code-1");
        assert_eq!(form["redirect_uri"], "https://rp.example.com/callback");
        assert_eq!(form["client_id"], "rp client");
        assert_eq!(form["client_secret"], "s3cret:+");
    }

    #[tokio::test]
    async fn client_secret_basic_uses_form_encoded_authorization_header() {
        let server = MockServer::start().await;
        let expected = format!("Basic {}", STANDARD.encode("rp+client:s3cret%3A%2B"));
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("authorization", expected.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "at" })))
            .expect(1)
            .mount(&server)
            .await;
        let client = client_for(&server, ClientAuthMethod::ClientSecretBasic);

        client.refresh("rt-1").await.unwrap();

        let form = form_of_last_request(&server).await;
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "rt-1");
        assert!(!form.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;
        let client = client_for(&server, ClientAuthMethod::ClientSecretPost);

        let err = client.exchange_code_for_tokens("stale").await.unwrap_err();

        match err {
            OAuthError::TokenExchange(UpstreamFailure::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_reported_as_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        let client = client_for(&server, ClientAuthMethod::ClientSecretPost);

        let err = client.refresh("rt-1").await.unwrap_err();

        assert!(matches!(
            err,
            OAuthError::TokenRefresh(UpstreamFailure::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn slow_upstream_times_out_as_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "late" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;
        let http = Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let client = client_with_http(&server, ClientAuthMethod::ClientSecretPost, http);

        let err = client.refresh("rt-1").await.unwrap_err();

        assert!(matches!(
            err,
            OAuthError::TokenRefresh(UpstreamFailure::Transport(_))
        ));
    }

    #[tokio::test]
    async fn revoke_sends_token_and_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let client = client_for(&server, ClientAuthMethod::ClientSecretPost);

        client
            .revoke("rt-1", TokenTypeHint::RefreshToken)
            .await
            .unwrap();

        let form = form_of_last_request(&server).await;
        assert_eq!(form["token"], "rt-1");
        assert_eq!(form["token_type_hint"], "refresh_token");
    }

    #[tokio::test]
    async fn revoke_without_endpoint_is_a_configuration_error() {
        let server = MockServer::start().await;
        let mut client = client_for(&server, ClientAuthMethod::ClientSecretPost);
        client.endpoints.revocation = None;

        let err = client
            .revoke("at-1", TokenTypeHint::AccessToken)
            .await
            .unwrap_err();

        assert!(matches!(err, OAuthError::Configuration(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn token_response_debug_hides_token_values() {
        let tokens = TokenResponse {
            access_token: Some("at-secret".to_string()),
            ..TokenResponse::default()
        };

        let debug = format!("{tokens:?}");

        assert!(!debug.contains("at-secret"));
        assert!(debug.contains("<present>"));
    }
}

//! Configuration management
//!
//! Settings are merged from, in order of increasing precedence:
//!
//! 1. built-in defaults,
//! 2. a YAML or JSON file (`--config`, else `settings.json` / `settings.yaml`
//!    in the working directory),
//! 3. environment variables prefixed `OIDC_RP_`, with `__` separating
//!    sections (`OIDC_RP_CLIENT__CLIENT_ID`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Yaml},
};
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "OIDC_RP_";

/// Files looked up in the working directory when no `--config` is given
const DEFAULT_FILES: &[&str] = &["settings.json", "settings.yaml", "settings.yml"];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before environment overrides are applied.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Front-end listener settings
    pub server: ServerConfig,
    /// Authorization server endpoints and trust anchors
    pub provider: ProviderConfig,
    /// Registered client identity
    pub client: ClientConfig,
    /// ID Token validation settings
    pub validation: ValidationConfig,
    /// Pending login settings
    pub login: LoginConfig,
    /// Outbound HTTP settings
    pub http: HttpConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit config file does not exist or the merged
    /// settings cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) if !p.exists() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            Some(p) => Some(p.to_path_buf()),
            None => default_file(),
        };

        let mut figment = Figment::new();
        if let Some(ref p) = file {
            tracing::debug!(path = %p.display(), "Loading settings file");
            figment = if is_json(p) {
                figment.merge(Json::file(p))
            } else {
                figment.merge(Yaml::file(p))
            };
        }

        // env files must land in the process environment before Env is read
        let env_files: Vec<String> = figment.extract_inner("env_files").unwrap_or_default();
        load_env_files(&env_files);

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check that the settings are complete enough to start.
    ///
    /// Endpoints may be left unset when `provider.discover` is enabled; they
    /// are filled from the discovery document at startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<&str> = Vec::new();

        if self.client.client_id.trim().is_empty() {
            problems.push("client.client_id is required");
        }
        if self.client.client_secret.is_empty() {
            problems.push("client.client_secret is required");
        }
        if self.client.redirect_uri.is_none() {
            problems.push("client.redirect_uri is required");
        }

        if self.provider.discover {
            if self.provider.issuer.is_none() {
                problems.push("provider.issuer is required when provider.discover is enabled");
            }
        } else {
            if self.provider.authorization_endpoint.is_none() {
                problems.push("provider.authorization_endpoint is required");
            }
            if self.provider.token_endpoint.is_none() {
                problems.push("provider.token_endpoint is required");
            }
        }

        if self.login.state_ttl.is_zero() {
            problems.push("login.state_ttl must be greater than zero");
        }
        if self.http.timeout.is_zero() {
            problems.push("http.timeout must be greater than zero");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

fn default_file() -> Option<PathBuf> {
    DEFAULT_FILES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Load environment files into the process environment.
/// Supports ~ expansion. Files that don't exist are silently skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
            (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
            _ => path_str.clone(),
        };

        let path = Path::new(&expanded);
        if !path.exists() {
            tracing::debug!("Env file not found (skipped): {expanded}");
            continue;
        }
        match dotenvy::from_path(path) {
            Ok(()) => tracing::info!("Loaded env file: {expanded}"),
            Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
        }
    }
}

/// Front-end listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Mark cookies `Secure` (enable whenever served over HTTPS)
    pub secure_cookies: bool,
    /// Name of the cookie carrying the session identifier
    pub session_cookie: String,
    /// Name of the short-lived cookie carrying the pending login handle
    pub login_cookie: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5443,
            secure_cookies: false,
            session_cookie: "rp_session".to_string(),
            login_cookie: "rp_login".to_string(),
        }
    }
}

/// Authorization server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Expected `iss` of ID Tokens. Compared as an exact string.
    pub issuer: Option<String>,
    /// Authorization endpoint
    pub authorization_endpoint: Option<Url>,
    /// Token endpoint
    pub token_endpoint: Option<Url>,
    /// RFC 7009 revocation endpoint
    pub revocation_endpoint: Option<Url>,
    /// End-session endpoint the browser is sent to on logout
    pub logout_endpoint: Option<Url>,
    /// JWKS location. Without it ID Tokens cannot be verified.
    pub jwks_uri: Option<Url>,
    /// Fill unset endpoints from `{issuer}/.well-known/openid-configuration`
    pub discover: bool,
}

/// How the client authenticates to the token and revocation endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` in the form body
    #[default]
    ClientSecretPost,
    /// HTTP Basic authentication
    ClientSecretBasic,
}

/// Registered client configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identifier, also the expected ID Token audience
    pub client_id: String,
    /// Client secret
    #[serde(serialize_with = "redact")]
    pub client_secret: String,
    /// Registered redirect URI of the callback route
    pub redirect_uri: Option<Url>,
    /// Space-separated scopes requested at login
    pub scope: String,
    /// Client authentication method
    pub auth_method: ClientAuthMethod,
    /// Where the end-session endpoint should send the browser afterwards
    pub post_logout_redirect_uri: Option<Url>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: None,
            scope: "openid".to_string(),
            auth_method: ClientAuthMethod::default(),
            post_logout_redirect_uri: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("auth_method", &self.auth_method)
            .field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .finish()
    }
}

fn redact<S: Serializer>(secret: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if secret.is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("<redacted>")
    }
}

/// ID Token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Leeway applied to `exp` and `nbf`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Age after which a fetched key set is refetched on next use
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(60),
            jwks_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Pending login configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// How long an issued `state` stays redeemable
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,
    /// How often expired pending logins are swept
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout for every call to the authorization server
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl HttpConfig {
    /// Build the shared outbound client
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("oidc-rp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }
}

/// Human-readable `Duration` serde (`"30s"`, `"10m"`, `"1h"`, `"250ms"`)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        // "ms" before "s" and "m"
        let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            return number(ms).map(Duration::from_millis);
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            // Assume seconds
            (s, 1)
        };

        number(digits)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {s}"))
    }

    fn number(digits: &str) -> Result<u64, String> {
        digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {digits:?}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn complete() -> Config {
        let mut config = Config::default();
        config.client.client_id = "rp-client".to_string();
        config.client.client_secret = "s3cret".to_string();
        config.client.redirect_uri = Url::parse("https://rp.example.com/callback").ok();
        config.provider.authorization_endpoint =
            Url::parse("https://idp.example.com/authorize").ok();
        config.provider.token_endpoint = Url::parse("https://idp.example.com/token").ok();
        config
    }

    #[test]
    fn humantime_parses_all_units() {
        assert_eq!(humantime_serde::parse("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(humantime_serde::parse("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(humantime_serde::parse("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(humantime_serde::parse("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(humantime_serde::parse("45"), Ok(Duration::from_secs(45)));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn humantime_rejects_overflowing_durations() {
        assert!(humantime_serde::parse("9999999999999999h").is_err());
        assert!(humantime_serde::parse("999999999999999999m").is_err());
        assert_eq!(
            humantime_serde::parse("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );

        let err = serde_json::from_value::<LoginConfig>(serde_json::json!({
            "state_ttl": "9999999999999999h"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 5443);
        assert_eq!(config.client.scope, "openid");
        assert_eq!(config.client.auth_method, ClientAuthMethod::ClientSecretPost);
        assert_eq!(config.validation.clock_skew, Duration::from_secs(60));
        assert_eq!(config.login.state_ttl, Duration::from_secs(600));
        assert_eq!(config.http.timeout, Duration::from_secs(10));
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn validate_reports_every_missing_field() {
        // GIVEN: an empty configuration
        let config = Config::default();

        // WHEN: validated
        let err = config.validate().unwrap_err().to_string();

        // THEN: all required fields are named
        assert!(err.contains("client.client_id"));
        assert!(err.contains("client.client_secret"));
        assert!(err.contains("client.redirect_uri"));
        assert!(err.contains("provider.authorization_endpoint"));
        assert!(err.contains("provider.token_endpoint"));
    }

    #[test]
    fn validate_with_discovery_requires_issuer_only() {
        // GIVEN: discovery enabled without explicit endpoints
        let mut config = complete();
        config.provider.authorization_endpoint = None;
        config.provider.token_endpoint = None;
        config.provider.discover = true;

        // THEN: the missing issuer is the only complaint
        let err = config.validate().unwrap_err().to_string();
        assert_eq!(
            err,
            "Configuration error: provider.issuer is required when provider.discover is enabled"
        );

        // WHEN: the issuer is set
        config.provider.issuer = Some("https://idp.example.com".to_string());

        // THEN: it validates
        assert!(config.validate().is_ok());
    }

    #[test]
    fn client_secret_is_redacted_in_debug_and_serialized_output() {
        let config = complete();

        let debug = format!("{:?}", config.client);
        let json = serde_json::to_string(&config).unwrap();

        assert!(!debug.contains("s3cret"));
        assert!(!json.contains("s3cret"));
        assert!(json.contains("<redacted>"));
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/settings.yaml")));
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("not found")));
    }

    #[test]
    fn load_yaml_file_with_env_override() {
        Jail::expect_with(|jail| {
            // GIVEN: a YAML file and an env override for the client id
            jail.create_file(
                "rp.yaml",
                r#"
server:
  port: 8080
provider:
  issuer: "https://idp.example.com"
  authorization_endpoint: "https://idp.example.com/authorize"
  token_endpoint: "https://idp.example.com/token"
client:
  client_id: "from-file"
  client_secret: "file-secret"
  redirect_uri: "https://rp.example.com/callback"
  auth_method: client_secret_basic
login:
  state_ttl: "5m"
"#,
            )?;
            jail.set_env("OIDC_RP_CLIENT__CLIENT_ID", "from-env");

            // WHEN: loaded
            let config =
                Config::load(Some(Path::new("rp.yaml"))).map_err(|e| e.to_string())?;

            // THEN: file values apply and env wins
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.client.client_id, "from-env");
            assert_eq!(config.client.auth_method, ClientAuthMethod::ClientSecretBasic);
            assert_eq!(config.login.state_ttl, Duration::from_secs(300));
            assert_eq!(
                config.provider.issuer.as_deref(),
                Some("https://idp.example.com")
            );
            Ok(())
        });
    }

    #[test]
    fn load_picks_up_settings_json_from_working_directory() {
        Jail::expect_with(|jail| {
            // GIVEN: settings.json in the working directory and no --config
            jail.create_file(
                "settings.json",
                r#"{
                    "provider": {
                        "issuer": "https://idp.example.com",
                        "jwks_uri": "https://idp.example.com/jwks",
                        "logout_endpoint": "https://idp.example.com/logout"
                    },
                    "client": { "client_id": "json-client", "scope": "openid profile" }
                }"#,
            )?;

            // WHEN: loaded without a path
            let config = Config::load(None).map_err(|e| e.to_string())?;

            // THEN: the JSON file was used
            assert_eq!(config.client.client_id, "json-client");
            assert_eq!(config.client.scope, "openid profile");
            assert_eq!(
                config.provider.jwks_uri.as_ref().map(Url::as_str),
                Some("https://idp.example.com/jwks")
            );
            Ok(())
        });
    }

    #[test]
    fn load_json_file_by_extension_from_any_directory() {
        Jail::expect_with(|_jail| {
            // GIVEN: a .json settings file outside the working directory
            let mut file = tempfile::Builder::new()
                .suffix(".json")
                .tempfile()
                .map_err(|e| e.to_string())?;
            write!(
                file,
                r#"{{ "client": {{ "client_id": "temp-client" }}, "login": {{ "state_ttl": "90s" }} }}"#
            )
            .map_err(|e| e.to_string())?;

            // WHEN: loaded through its absolute path
            let config = Config::load(Some(file.path())).map_err(|e| e.to_string())?;

            // THEN: it was parsed as JSON
            assert_eq!(config.client.client_id, "temp-client");
            assert_eq!(config.login.state_ttl, Duration::from_secs(90));
            Ok(())
        });
    }

    #[test]
    fn load_rejects_out_of_range_duration_instead_of_panicking() {
        Jail::expect_with(|_jail| {
            // GIVEN: a YAML file whose TTL overflows when scaled to seconds
            let mut file = tempfile::Builder::new()
                .suffix(".yaml")
                .tempfile()
                .map_err(|e| e.to_string())?;
            writeln!(file, "login:\n  state_ttl: \"9999999999999999h\"")
                .map_err(|e| e.to_string())?;

            // WHEN: loaded
            let result = Config::load(Some(file.path()));

            // THEN: a configuration error comes back
            assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("out of range")));
            Ok(())
        });
    }

    #[test]
    fn load_applies_env_files_before_env_overrides() {
        Jail::expect_with(|jail| {
            // GIVEN: a config listing an env file that sets the client secret
            jail.create_file("rp.env", "OIDC_RP_CLIENT__CLIENT_SECRET=from-env-file\n")?;
            let env_path = jail.directory().join("rp.env");
            jail.create_file(
                "rp.yaml",
                &format!("env_files:\n  - \"{}\"\n", env_path.display()),
            )?;

            // WHEN: loaded
            let config =
                Config::load(Some(Path::new("rp.yaml"))).map_err(|e| e.to_string())?;

            // THEN: the env file value reached the merged settings
            assert_eq!(config.client.client_secret, "from-env-file");
            Ok(())
        });
    }
}

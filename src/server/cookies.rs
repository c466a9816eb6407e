//! Cookies carrying the login handle and the session identifier.

use std::time::Duration;

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::Config;
use crate::flow::LoginHandle;
use crate::session::SessionId;

/// Cookie names and attributes.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Session cookie name
    pub session_name: String,
    /// Login handle cookie name
    pub login_name: String,
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Lifetime of the login handle cookie
    pub login_max_age: Duration,
}

impl CookieSettings {
    /// Take cookie settings from resolved configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_name: config.server.session_cookie.clone(),
            login_name: config.server.login_cookie.clone(),
            secure: config.server.secure_cookies,
            login_max_age: config.login.state_ttl,
        }
    }

    /// Session identifier presented by the browser, if any.
    pub fn session_id(&self, jar: &CookieJar) -> Option<SessionId> {
        jar.get(&self.session_name)
            .map(|c| SessionId::from_cookie(c.value()))
    }

    /// Login handle presented by the browser, if any.
    pub fn login_handle(&self, jar: &CookieJar) -> Option<LoginHandle> {
        jar.get(&self.login_name)
            .map(|c| LoginHandle::from_cookie(c.value()))
    }

    /// Session cookie for `id`. A browser-session cookie: no `Max-Age`.
    pub fn session_cookie(&self, id: &SessionId) -> Cookie<'static> {
        Cookie::build((self.session_name.clone(), id.as_str().to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    /// Short-lived cookie carrying the pending login handle.
    pub fn login_cookie(&self, handle: &LoginHandle) -> Cookie<'static> {
        let max_age = i64::try_from(self.login_max_age.as_secs()).unwrap_or(i64::MAX);
        Cookie::build((self.login_name.clone(), handle.as_str().to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(max_age))
            .build()
    }

    /// Jar with the session cookie removed.
    pub fn clear_session(&self, jar: CookieJar) -> CookieJar {
        jar.remove(removal(&self.session_name))
    }

    /// Jar with the login handle cookie removed.
    pub fn clear_login(&self, jar: CookieJar) -> CookieJar {
        jar.remove(removal(&self.login_name))
    }
}

fn removal(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), "")).path("/").build()
}

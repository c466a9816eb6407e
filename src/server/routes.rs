//! HTTP routes and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, warn};

use super::cookies::CookieSettings;
use crate::flow::{CallbackParams, FlowError, FlowOrchestrator};
use crate::oauth::OAuthError;
use crate::oidc::ValidationError;

/// Shared application state
pub struct AppState {
    /// Login and session operations
    pub flow: Arc<FlowOrchestrator>,
    /// Cookie names and attributes
    pub cookies: CookieSettings,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(session_handler))
        .route("/health", get(health_handler))
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        // Session-changing actions only accept POST
        .route("/refresh", post(refresh_handler))
        .route("/revoke", post(revoke_handler))
        .route("/logout", post(logout_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.flow.sessions().len(),
        "pending_logins": state.flow.pending_logins().len(),
    }))
}

/// GET / - what the current session holds
async fn session_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let id = state.cookies.session_id(&jar);
    match state.flow.session_view(id.as_ref()).await {
        Some(view) => Json(json!({ "authenticated": true, "session": view })),
        None => Json(json!({
            "authenticated": false,
            "server_name": state.flow.server_name(),
        })),
    }
}

async fn login_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let login = state.flow.start_login();
    let jar = jar.add(state.cookies.login_cookie(&login.handle));
    (jar, Redirect::to(login.url.as_str()))
}

async fn callback_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let handle = state.cookies.login_handle(&jar);
    let previous = state.cookies.session_id(&jar);
    let jar = state.cookies.clear_login(jar);

    match state.flow.handle_callback(&params, handle.as_ref()).await {
        Ok(id) => {
            if let Some(previous) = previous {
                state.flow.sessions().delete(&previous);
            }
            let jar = jar.add(state.cookies.session_cookie(&id));
            (jar, Redirect::to("/")).into_response()
        }
        Err(e) => (jar, e).into_response(),
    }
}

async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, FlowError> {
    let id = state
        .cookies
        .session_id(&jar)
        .ok_or(FlowError::UnknownSession)?;
    let summary = state.flow.refresh(&id).await?;
    Ok(Json(json!({ "refreshed": true, "changes": summary })))
}

async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, FlowError> {
    let id = state
        .cookies
        .session_id(&jar)
        .ok_or(FlowError::UnknownSession)?;
    let report = state.flow.revoke(&id).await?;
    Ok(Json(json!({ "revoked": true, "report": report })))
}

async fn logout_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let id = state.cookies.session_id(&jar);
    let outcome = state.flow.logout(id.as_ref()).await;
    let jar = state.cookies.clear_session(jar);

    let target = outcome
        .redirect
        .map_or_else(|| "/".to_string(), |url| url.to_string());
    (jar, Redirect::to(&target))
}

impl FlowError {
    fn status(&self) -> StatusCode {
        match self {
            Self::StateMismatch(_) | Self::MissingCode => StatusCode::BAD_REQUEST,
            Self::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            Self::UnknownSession
            | Self::Validation(
                ValidationError::Signature(_) | ValidationError::ClaimValidation { .. },
            ) => StatusCode::UNAUTHORIZED,
            Self::NoRefreshToken => StatusCode::CONFLICT,
            Self::OAuth(OAuthError::Configuration(_))
            | Self::Validation(ValidationError::Configuration(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::OAuth(_) | Self::PartialRevocation { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.is_server_side() {
            error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "Request refused");
        }

        let mut body = json!({ "error": self.kind(), "message": self.to_string() });
        if let Self::PartialRevocation { report } = &self {
            body["report"] = json!(report);
        }
        (status, Json(body)).into_response()
    }
}

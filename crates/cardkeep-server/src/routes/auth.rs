//! Login routes.
//!
//! Form login for the browser (`/login`, `/logout`) and a JSON flavour under
//! `/api/auth`. Successful logins set the session cookie; logout revokes the
//! session and clears it.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Form, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cardkeep_core::auth::{SESSION_COOKIE, Session, verify_credentials};
use cardkeep_core::settings::{MAX_SESSION_TTL_HOURS, Settings};

use crate::error::AppError;
use crate::middleware::{AuthContext, ClientIp, clear_session_cookie, read_cookie, session_cookie, with_cookie};
use crate::routes::ui::login_page;
use crate::state::AppState;

/// Where to land after login when `next` is missing or unsafe.
const DEFAULT_LANDING: &str = "/cards";

/// Build the login router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", get(logout_page).post(logout_page))
        .route("/api/auth/login", post(api_login))
        .route("/api/auth/logout", post(api_logout))
        .route("/api/auth/status", get(status))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub username: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub auth_enabled: bool,
    pub authenticated: bool,
    pub method: Option<&'static str>,
    pub username: Option<String>,
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Keep `next` only when it is a local path: a single leading `/`, no
/// backslashes and no whitespace or control characters. Browsers drop tabs
/// and newlines while parsing, so `/\t/host` would otherwise become `//host`.
#[must_use]
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(n)
            if !n.chars().any(|c| c.is_whitespace() || c.is_control())
                && n.starts_with('/')
                && !n.starts_with("//")
                && !n.contains('\\') =>
        {
            n
        }
        _ => DEFAULT_LANDING,
    }
}

fn session_ttl(settings: &Settings) -> chrono::Duration {
    let hours = settings.auth.session_ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS);
    chrono::Duration::hours(i64::try_from(hours).unwrap_or(168))
}

/// Verify credentials and open a session. Returns the token, the session
/// and the cookie to set.
async fn open_session(
    state: &AppState,
    client_ip: Option<ClientIp>,
    username: &str,
    password: &str,
) -> Result<(Session, String), AppError> {
    let settings = state.settings.effective().await;
    if !settings.auth_enabled() {
        return Err(AppError::BadRequest("authentication is not enabled".to_owned()));
    }
    if let Err(e) = verify_credentials(&settings, username, password) {
        let ip = client_ip.map(|c| c.0.to_string()).unwrap_or_default();
        warn!(ip = %ip, username = %username, "failed login attempt");
        return Err(e.into());
    }

    let ttl = session_ttl(&settings);
    let (token, session) = state.sessions.create(username, ttl).await;
    info!(username = %username, "login succeeded");
    Ok((session, session_cookie(&token, ttl.num_seconds())))
}

async fn end_session(state: &AppState, headers: &HeaderMap) {
    if let Some(token) = read_cookie(headers, SESSION_COOKIE) {
        state.sessions.revoke(&token).await;
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Render the login form; straight through when auth is off.
async fn login_form(State(state): State<Arc<AppState>>, Query(q): Query<NextQuery>) -> Response {
    let next = safe_next(q.next.as_deref());
    if !state.settings.effective().await.auth_enabled() {
        return Redirect::to(next).into_response();
    }
    login_page(None, next).into_response()
}

async fn login_submit(
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    Form(form): Form<LoginForm>,
) -> Response {
    let next = safe_next(form.next.as_deref()).to_owned();
    match open_session(&state, client_ip.map(|e| e.0), &form.username, &form.password).await {
        Ok((_, cookie)) => with_cookie(Redirect::to(&next).into_response(), &cookie),
        Err(AppError::BadRequest(_)) => Redirect::to(&next).into_response(),
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            login_page(Some("Invalid username or password"), &next),
        )
            .into_response(),
    }
}

async fn logout_page(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    end_session(&state, &headers).await;
    with_cookie(Redirect::to("/login").into_response(), &clear_session_cookie())
}

async fn api_login(
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let (session, cookie) =
        open_session(&state, client_ip.map(|e| e.0), &body.username, &body.password).await?;
    let response = Json(LoginResponse {
        ok: true,
        username: session.username,
        expires_at: session.expires_at.to_rfc3339(),
    })
    .into_response();
    Ok(with_cookie(response, &cookie))
}

async fn api_logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    end_session(&state, &headers).await;
    with_cookie(
        Json(serde_json::json!({ "ok": true })).into_response(),
        &clear_session_cookie(),
    )
}

async fn status(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
) -> Json<StatusResponse> {
    let auth_enabled = state.settings.effective().await.auth_enabled();
    let ctx = ctx.map(|e| e.0);
    Json(StatusResponse {
        auth_enabled,
        authenticated: ctx.is_some(),
        method: ctx.as_ref().map(AuthContext::method),
        username: ctx.as_ref().and_then(AuthContext::username).map(str::to_owned),
    })
}

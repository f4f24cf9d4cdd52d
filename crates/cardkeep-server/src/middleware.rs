//! Login and IP whitelist middleware.
//!
//! Every request resolves its client address and then passes through, in
//! order: auth disabled, public path, whitelisted address, valid session
//! cookie. Anything else is rejected with a JSON 401 under `/api/` and a
//! redirect to the login page elsewhere. The outcome is injected into the
//! request extensions as an [`AuthContext`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;
use tracing::debug;

use cardkeep_core::auth::SESSION_COOKIE;
use cardkeep_core::whitelist::resolve_client_ip;

use crate::error::AppError;
use crate::state::AppState;

/// Paths reachable without logging in.
const PUBLIC_PATHS: [&str; 4] = ["/login", "/api/auth/login", "/api/v2/health", "/favicon.ico"];

/// How a request was let through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthContext {
    /// No credentials are configured.
    Disabled,
    /// The client address matched the whitelist.
    Whitelisted { ip: IpAddr },
    /// A valid session cookie was presented.
    Session { username: String },
}

impl AuthContext {
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Whitelisted { .. } => "whitelist",
            Self::Session { .. } => "session",
        }
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Session { username } => Some(username),
            _ => None,
        }
    }
}

/// The resolved client address, injected for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Value of the cookie `name`, if present.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value for a new session.
#[must_use]
pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value that removes the session cookie.
#[must_use]
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Attach a `Set-Cookie` header to a response.
pub fn with_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The login URL that returns to `path_and_query` afterwards.
#[must_use]
pub fn login_redirect_target(path_and_query: &str) -> String {
    format!("/login?next={}", urlencoding::encode(path_and_query))
}

/// Authenticate a request. See the module docs for the order of checks.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let settings = state.settings.effective().await;

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |c| c.0.ip());
    let client_ip = resolve_client_ip(
        peer,
        header_str(req.headers(), "x-forwarded-for"),
        header_str(req.headers(), "x-real-ip"),
        settings.auth.trust_proxy_headers,
    );
    req.extensions_mut().insert(ClientIp(client_ip));

    if !settings.auth_enabled() {
        req.extensions_mut().insert(AuthContext::Disabled);
        return next.run(req).await;
    }

    let path = req.uri().path().to_owned();
    if PUBLIC_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let whitelist = state.whitelist(&settings.auth.trusted_ips).await;
    if whitelist.is_trusted(client_ip, settings.auth.trust_loopback) {
        debug!(ip = %client_ip, path = %path, "whitelisted address, login skipped");
        req.extensions_mut()
            .insert(AuthContext::Whitelisted { ip: client_ip });
        return next.run(req).await;
    }

    if let Some(token) = read_cookie(req.headers(), SESSION_COOKIE) {
        match state.sessions.validate(&token).await {
            Ok(session) => {
                req.extensions_mut().insert(AuthContext::Session {
                    username: session.username,
                });
                return next.run(req).await;
            }
            Err(e) => debug!(ip = %client_ip, error = %e, "session rejected"),
        }
    }

    if path.starts_with("/api/") {
        return AppError::Unauthorized("login required".to_owned()).into_response();
    }
    let original = req
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_owned());
    Redirect::to(&login_redirect_target(&original)).into_response()
}

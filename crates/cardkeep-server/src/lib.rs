//! cardkeep HTTP server.
//!
//! Wires the core library into an Axum router: the JSON API under `/api/*`,
//! the server-rendered views, and the login/whitelist middleware in front of
//! all of them.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware as axum_mw;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Concurrent requests allowed into the login routes.
const LOGIN_CONCURRENCY: usize = 8;

/// Build the router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let login_routes = routes::auth::router().layer(ConcurrencyLimitLayer::new(LOGIN_CONCURRENCY));

    Router::new()
        .merge(login_routes)
        .merge(routes::cards::router())
        .merge(routes::worldinfo::router())
        .merge(routes::settings::router())
        .merge(routes::resources::router())
        .merge(routes::v2::router())
        .merge(routes::ui::router())
        .layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

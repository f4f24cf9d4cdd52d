//! Settings panel routes: `/api/settings`

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use cardkeep_core::settings::SettingsUpdate;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/settings` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/settings", get(get_settings).post(update_settings))
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// Effective settings with the password replaced by `password_set`.
    pub settings: Value,
    /// Fields currently set by environment variables.
    pub pinned: Vec<&'static str>,
    pub credentials_changed: bool,
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        settings: state.settings.effective().await.redacted(),
        pinned: state.settings.pinned_fields(),
        credentials_changed: false,
    })
}

/// Merge and persist an update. Changed credentials end every session.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsResponse>, AppError> {
    let outcome = state.settings.update(update).await?;
    if outcome.credentials_changed {
        state.sessions.revoke_all().await;
    }
    state.backup.notify_schedule_changed();
    Ok(Json(SettingsResponse {
        settings: outcome.settings.redacted(),
        pinned: state.settings.pinned_fields(),
        credentials_changed: outcome.credentials_changed,
    }))
}

//! v2 API: health, statistics, backups, public config and change tracking.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cardkeep_core::backup::{BackupMetadata, BackupRequest, RestoreOutcome, ScheduleUpdate};
use cardkeep_core::settings::{BackupSettings, PublicConfig, PublicConfigUpdate};
use cardkeep_core::stats::{self, LibraryStats};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/v2` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v2/health", get(health).post(health))
        .route("/api/v2/stats", get(library_stats))
        .route("/api/v2/backup/trigger", post(trigger_backup))
        .route("/api/v2/backup/list", get(list_backups))
        .route("/api/v2/backup/restore", post(restore_backup))
        .route("/api/v2/backup/delete", delete(delete_backup))
        .route("/api/v2/backup/schedule", get(get_schedule).post(set_schedule))
        .route("/api/v2/config", get(get_config).post(update_config))
        .route("/api/v2/track-change", post(track_change))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct BackupListResponse {
    pub backups: Vec<BackupMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct BackupIdRequest {
    pub backup_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackChangeRequest {
    pub resource_type: String,
    pub resource_id: String,
    /// Milliseconds since the epoch; defaults to now.
    pub timestamp: Option<i64>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn library_stats(State(state): State<Arc<AppState>>) -> Result<Json<LibraryStats>, AppError> {
    Ok(Json(stats::collect(&state.settings).await?))
}

async fn trigger_backup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BackupRequest>,
) -> Result<Json<BackupMetadata>, AppError> {
    Ok(Json(state.backup.trigger(request).await?))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupListResponse>, AppError> {
    let backups = state.backup.list().await?;
    Ok(Json(BackupListResponse { backups }))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BackupIdRequest>,
) -> Result<Json<RestoreOutcome>, AppError> {
    Ok(Json(state.backup.restore(&body.backup_id).await?))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Query(q): Query<BackupIdRequest>,
) -> Result<Json<Value>, AppError> {
    state.backup.delete(&q.backup_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn get_schedule(State(state): State<Arc<AppState>>) -> Json<BackupSettings> {
    Json(state.backup.schedule().await)
}

async fn set_schedule(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ScheduleUpdate>,
) -> Result<Json<BackupSettings>, AppError> {
    Ok(Json(state.backup.set_schedule(update).await?))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<PublicConfig> {
    Json(state.settings.effective().await.public_config())
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PublicConfigUpdate>,
) -> Result<Json<PublicConfig>, AppError> {
    let outcome = state.settings.update(update.into()).await?;
    state.backup.notify_schedule_changed();
    Ok(Json(outcome.settings.public_config()))
}

async fn track_change(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TrackChangeRequest>,
) -> Result<Json<Value>, AppError> {
    if body.resource_type.trim().is_empty() || body.resource_id.trim().is_empty() {
        return Err(AppError::BadRequest(
            "resource_type and resource_id are required".to_owned(),
        ));
    }
    state
        .backup
        .track_change(&body.resource_type, &body.resource_id, body.timestamp)
        .await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

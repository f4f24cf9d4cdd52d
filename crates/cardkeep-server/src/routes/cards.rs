//! Card routes: `/api/cards/*`
//!
//! Listing, CRUD, folder moves, tag and favorite changes, batch plans and
//! the per-card UI notes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use cardkeep_core::automation::{Plan, PlanOutcome, apply_plan};
use cardkeep_core::backup::ResourceType;
use cardkeep_core::cards::{AttributeChange, CardDocument, CardPage, CardQuery, CardSummary};
use cardkeep_core::ui_store::{UiEntry, UiEntryUpdate};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/cards` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/cards", get(list_cards).post(create_card))
        .route(
            "/api/cards/file/{*id}",
            get(get_card).put(update_card).delete(delete_card),
        )
        .route("/api/cards/folders", get(list_folders))
        .route("/api/cards/move", post(move_card))
        .route("/api/cards/attributes", post(modify_attributes))
        .route("/api/cards/batch", post(batch))
        .route("/api/cards/meta/{*id}", get(get_meta).put(update_meta))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateCardRequest {
    #[serde(default)]
    pub folder: String,
    pub card: Value,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct FoldersResponse {
    pub folders: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub id: String,
    #[serde(default)]
    pub folder: String,
}

#[derive(Debug, Deserialize)]
pub struct AttributesRequest {
    pub id: String,
    #[serde(flatten)]
    pub change: AttributeChange,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<String>,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PlanOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
    pub succeeded: usize,
    pub failed: usize,
}

async fn track(state: &AppState, id: &str) {
    state
        .backup
        .track_change(ResourceType::Characters.name(), id, None)
        .await;
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_cards(
    State(state): State<Arc<AppState>>,
    Query(mut query): Query<CardQuery>,
) -> Result<Json<CardPage>, AppError> {
    let settings = state.settings.effective().await;
    if query.page_size == 0 {
        query.page_size = usize::try_from(settings.page_size).unwrap_or_default();
    }
    Ok(Json(state.cards_for(&settings).list(query).await?))
}

async fn create_card(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCardRequest>,
) -> Result<(StatusCode, Json<IdResponse>), AppError> {
    let id = state.cards().await.create(&body.folder, body.card).await?;
    track(&state, &id).await;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn get_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CardDocument>, AppError> {
    Ok(Json(state.cards().await.get(&id).await?))
}

async fn update_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(card): Json<Value>,
) -> Result<Json<CardSummary>, AppError> {
    let summary = state.cards().await.update(&id, card).await?;
    track(&state, &summary.id).await;
    Ok(Json(summary))
}

async fn delete_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.cards().await.delete(&id).await?;
    if let Err(e) = state.ui().await.remove(&id).await {
        warn!(id = %id, error = %e, "failed to drop ui metadata of deleted card");
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn list_folders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FoldersResponse>, AppError> {
    let folders = state.cards().await.folders().await?;
    Ok(Json(FoldersResponse { folders }))
}

async fn move_card(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MoveRequest>,
) -> Result<Json<IdResponse>, AppError> {
    let new_id = state.cards().await.move_card(&body.id, &body.folder).await?;
    if let Err(e) = state.ui().await.rename(&body.id, &new_id).await {
        warn!(from = %body.id, to = %new_id, error = %e, "failed to move ui metadata");
    }
    track(&state, &new_id).await;
    Ok(Json(IdResponse { id: new_id }))
}

async fn modify_attributes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AttributesRequest>,
) -> Result<Json<CardSummary>, AppError> {
    let summary = state
        .cards()
        .await
        .modify_attributes(&body.id, &body.change)
        .await?;
    track(&state, &summary.id).await;
    Ok(Json(summary))
}

/// Apply one plan to many cards. Failures are reported per card.
async fn batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    if body.ids.is_empty() {
        return Err(AppError::BadRequest("no card ids given".to_owned()));
    }
    let store = state.cards().await;
    let ui = state.ui().await;

    let mut results = Vec::with_capacity(body.ids.len());
    for id in body.ids {
        match apply_plan(&store, Some(&*ui), &id, &body.plan).await {
            Ok(outcome) => {
                track(&state, &outcome.final_id).await;
                results.push(BatchItem {
                    id,
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(e) => {
                warn!(id = %id, error = %e, "batch plan failed");
                results.push(BatchItem {
                    id,
                    outcome: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    Ok(Json(BatchResponse {
        succeeded: results.len() - failed,
        failed,
        results,
    }))
}

async fn get_meta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UiEntry>, AppError> {
    Ok(Json(state.ui().await.get(&id).await?))
}

async fn update_meta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<UiEntryUpdate>,
) -> Result<Json<UiEntry>, AppError> {
    let (id, path) = state.cards().await.path_of(&id)?;
    if !path.is_file() {
        return Err(AppError::NotFound(format!("card not found: {id}")));
    }
    Ok(Json(state.ui().await.update(&id, update).await?))
}

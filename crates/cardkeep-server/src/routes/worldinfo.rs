//! World info routes: `/api/worldinfo/*`

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cardkeep_core::backup::ResourceType;
use cardkeep_core::history::HistoryRecord;
use cardkeep_core::worldinfo::{SaveOutcome, WorldInfoDocument, WorldInfoSummary};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/api/worldinfo` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/worldinfo", get(list_books).post(create_book))
        .route(
            "/api/worldinfo/file/{*id}",
            get(get_book).put(save_book).delete(delete_book),
        )
        .route("/api/worldinfo/history", get(entry_history))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub id: String,
    pub uid: String,
    pub limit: Option<usize>,
}

async fn list_books(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse<WorldInfoSummary>>, AppError> {
    let items = state.worldinfo().await.list(q.search.as_deref()).await?;
    Ok(Json(ListResponse { items }))
}

async fn create_book(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let id = state.worldinfo().await.create(&body.name).await?;
    state
        .backup
        .track_change(ResourceType::Worldbooks.name(), &id, None)
        .await;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorldInfoDocument>, AppError> {
    Ok(Json(state.worldinfo().await.get(&id).await?))
}

async fn save_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(book): Json<Value>,
) -> Result<Json<SaveOutcome>, AppError> {
    let outcome = state.worldinfo().await.save(&id, book).await?;
    state
        .backup
        .track_change(ResourceType::Worldbooks.name(), &outcome.summary.id, None)
        .await;
    Ok(Json(outcome))
}

async fn delete_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.worldinfo().await.delete(&id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Previous versions of one entry, newest first.
async fn entry_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<ListResponse<HistoryRecord>>, AppError> {
    let items = state
        .worldinfo()
        .await
        .entry_history(&q.id, &q.uid, q.limit)
        .await?;
    Ok(Json(ListResponse { items }))
}

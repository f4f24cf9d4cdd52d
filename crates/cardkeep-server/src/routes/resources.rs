//! Per-card resource folders and static file serving.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use cardkeep_core::cards::{SIDECAR_IMAGE_EXTENSIONS, find_sidecar_image};
use cardkeep_core::fsutil;
use cardkeep_core::resources::{ResourceListing, UploadOutcome};

use crate::error::AppError;
use crate::state::AppState;

/// Largest accepted resource upload.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the resource router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/resources", get(list_resources))
        .route("/api/resources/folder", post(ensure_folder))
        .route(
            "/api/upload_card_resource",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/delete_resource_file", post(delete_file))
        .route("/cards_file/{*path}", get(card_file))
        .route("/resources_file/{*path}", get(resource_file))
}

#[derive(Debug, Deserialize)]
pub struct CardIdQuery {
    pub card_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    pub card_id: String,
}

#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub folder: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFileRequest {
    pub card_id: String,
    pub filename: String,
}

/// Canonical form of a card id.
async fn card_key(state: &AppState, card_id: &str) -> Result<String, AppError> {
    Ok(state.cards().await.path_of(card_id)?.0)
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CardIdQuery>,
) -> Result<Json<ResourceListing>, AppError> {
    let id = card_key(&state, &q.card_id).await?;
    Ok(Json(state.resources().await.list(&id).await?))
}

async fn ensure_folder(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FolderRequest>,
) -> Result<Json<FolderResponse>, AppError> {
    let doc = state.cards().await.get(&body.card_id).await?;
    let folder = state
        .resources()
        .await
        .ensure_folder(&doc.summary.id, &doc.summary.name)
        .await?;
    Ok(Json(FolderResponse { folder }))
}

fn multipart_err(e: &axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(format!("invalid upload: {e}"))
}

/// Multipart upload with a `card_id` text field and a `file` part.
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, AppError> {
    let mut card_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_err(&e))? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "card_id" => card_id = Some(field.text().await.map_err(|e| multipart_err(&e))?),
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let bytes = field.bytes().await.map_err(|e| multipart_err(&e))?;
                file = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let card_id = card_id.ok_or_else(|| AppError::BadRequest("missing card_id".to_owned()))?;
    let (file_name, bytes) = file.ok_or_else(|| AppError::BadRequest("missing file".to_owned()))?;
    let id = card_key(&state, &card_id).await?;
    Ok(Json(
        state.resources().await.upload(&id, &file_name, &bytes).await?,
    ))
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteFileRequest>,
) -> Result<Json<Value>, AppError> {
    let id = card_key(&state, &body.card_id).await?;
    state.resources().await.delete(&id, &body.filename).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn serve(path: PathBuf, req: Request) -> Response {
    match ServeFile::new(path).oneshot(req).await {
        Ok(res) => res.map(Body::new).into_response(),
        Err(never) => match never {},
    }
}

/// An image below the cards directory. A `.json` path serves the card's
/// sidecar image.
async fn card_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    req: Request,
) -> Result<Response, AppError> {
    let rel = fsutil::normalize_id(&path)?;
    let cards = state.cards().await;
    let full = fsutil::resolve(cards.root(), &rel);
    let not_found = || AppError::NotFound(format!("file not found: {rel}"));

    let target = if fsutil::has_extension(&full, "json") {
        find_sidecar_image(&full).ok_or_else(not_found)?
    } else if SIDECAR_IMAGE_EXTENSIONS
        .iter()
        .any(|ext| fsutil::has_extension(&full, ext))
        && full.is_file()
    {
        full
    } else {
        return Err(not_found());
    };
    Ok(serve(target, req).await)
}

/// Any file below the resources directory.
async fn resource_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    req: Request,
) -> Result<Response, AppError> {
    let full = state.resources().await.resolve_file(&path)?;
    if !full.is_file() {
        return Err(AppError::NotFound(format!("file not found: {path}")));
    }
    Ok(serve(full, req).await)
}

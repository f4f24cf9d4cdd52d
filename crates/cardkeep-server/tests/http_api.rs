//! Integration tests for the cardkeep HTTP API.
//!
//! Each test builds the full router over a temporary base directory and
//! drives it in-process with `oneshot`. The peer address is injected as
//! `ConnectInfo` so whitelist and login decisions can be exercised.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use cardkeep_core::settings::{EnvOverrides, SettingsStore};
use cardkeep_server::build_router;
use cardkeep_server::state::AppState;
use cardkeep_storage::MemoryBackend;

const REMOTE: &str = "203.0.113.9:40000";
const LOOPBACK: &str = "127.0.0.1:40000";

/// Helper: a router over a fresh base directory with `settings` as the
/// settings file.
async fn app_with(settings: Value) -> (TempDir, Router) {
    let (dir, state) = state_with(settings).await;
    (dir, build_router(state))
}

/// Helper: the application state behind [`app_with`].
async fn state_with(settings: Value) -> (TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, serde_json::to_vec_pretty(&settings).unwrap()).unwrap();

    let store = SettingsStore::load(&config_path, dir.path(), EnvOverrides::default())
        .await
        .unwrap();
    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(MemoryBackend::new()),
    ));
    (dir, state)
}

/// Helper: settings with login enabled.
fn secured(extra_auth: Value) -> Value {
    let mut auth = json!({ "username": "admin", "password": "hunter2" });
    if let (Some(auth), Some(extra)) = (auth.as_object_mut(), extra_auth.as_object()) {
        for (k, v) in extra {
            auth.insert(k.clone(), v.clone());
        }
    }
    json!({ "auth": auth })
}

/// Helper: send one request from `peer`.
async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    cookie: Option<&str>,
    peer: &str,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    send_request(app, req, peer).await
}

/// Helper: send a prepared request from `peer`.
async fn send_request(app: &Router, mut req: Request<Body>, peer: &str) -> Response {
    let addr: SocketAddr = peer.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    app.clone().oneshot(req).await.unwrap()
}

async fn body_bytes(res: Response) -> Vec<u8> {
    to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn json_body(res: Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Helper: the `name=value` pair of the session cookie set by a response.
fn session_cookie(res: &Response) -> String {
    let set_cookie = res
        .headers()
        .get(header::SET_COOKIE)
        .expect("no Set-Cookie header")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_owned()
}

async fn login(app: &Router) -> String {
    let res = send(
        app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "username": "admin", "password": "hunter2" })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    session_cookie(&res)
}

// ── Access control ───────────────────────────────────────────────────

#[tokio::test]
async fn test_auth_disabled_allows_everything() {
    let (_dir, app) = app_with(json!({})).await;

    let res = send(&app, Method::GET, "/api/cards", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["total"], 0);

    let res = send(&app, Method::GET, "/api/auth/status", None, None, REMOTE).await;
    let body = json_body(res).await;
    assert_eq!(body["auth_enabled"], false);
    assert_eq!(body["method"], "disabled");
}

#[tokio::test]
async fn test_api_rejects_and_pages_redirect_without_login() {
    let (_dir, app) = app_with(secured(json!({}))).await;

    let res = send(&app, Method::GET, "/api/cards", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(res).await["error"], "unauthorized");

    let res = send(&app, Method::GET, "/cards?tag=x", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        res.headers().get(header::LOCATION).unwrap(),
        "/login?next=%2Fcards%3Ftag%3Dx"
    );
}

#[tokio::test]
async fn test_public_paths_skip_login() {
    let (_dir, app) = app_with(secured(json!({}))).await;

    let res = send(&app, Method::GET, "/api/v2/health", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "ok");

    let res = send(&app, Method::GET, "/login", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_cookie_grants_access_and_logout_revokes() {
    let (_dir, app) = app_with(secured(json!({}))).await;
    let cookie = login(&app).await;
    assert!(cookie.starts_with("cardkeep_session=cks_"));

    let res = send(&app, Method::GET, "/api/cards", None, Some(&cookie), REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = send(&app, Method::GET, "/api/auth/status", None, Some(&cookie), REMOTE).await;
    let body = json_body(res).await;
    assert_eq!(body["method"], "session");
    assert_eq!(body["username"], "admin");

    let res = send(&app, Method::POST, "/api/auth/logout", None, Some(&cookie), REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );

    let res = send(&app, Method::GET, "/api/cards", None, Some(&cookie), REMOTE).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (_dir, app) = app_with(secured(json!({}))).await;
    let res = send(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "username": "admin", "password": "nope" })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_form_login_redirects_to_next() {
    let (_dir, app) = app_with(secured(json!({}))).await;
    let mut req = Request::builder()
        .method(Method::POST)
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "username=admin&password=hunter2&next=%2Fworldinfo",
        ))
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo::<SocketAddr>(REMOTE.parse().unwrap()));
    let res = app.clone().oneshot(req).await.unwrap();

    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/worldinfo");
    assert!(session_cookie(&res).starts_with("cardkeep_session="));
}

#[tokio::test]
async fn test_form_login_ignores_unsafe_next() {
    let (_dir, app) = app_with(secured(json!({}))).await;
    for next in ["%2F%09%2Fevil.example", "%2F%0A", "%2F%2Fevil.example"] {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "username=admin&password=hunter2&next={next}"
            )))
            .unwrap();
        let res = send_request(&app, req, REMOTE).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER, "next={next}");
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/cards");
    }
}

#[tokio::test]
async fn test_expired_session_is_sent_to_login() {
    let (_dir, state) = state_with(secured(json!({}))).await;
    let app = build_router(Arc::clone(&state));
    let (token, _) = state
        .sessions
        .create("admin", chrono::Duration::seconds(-1))
        .await;
    let cookie = format!("cardkeep_session={token}");

    let res = send(&app, Method::GET, "/cards", None, Some(&cookie), REMOTE).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        res.headers().get(header::LOCATION).unwrap(),
        "/login?next=%2Fcards"
    );

    let res = send(&app, Method::GET, "/api/cards", None, Some(&cookie), REMOTE).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_whitelisted_addresses_bypass_login() {
    let (_dir, app) = app_with(secured(json!({ "trusted_ips": ["10.1.0.0/16", "192.168.*.*"] }))).await;

    for peer in ["10.1.2.3:1", "192.168.7.8:1", LOOPBACK] {
        let res = send(&app, Method::GET, "/api/cards", None, None, peer).await;
        assert_eq!(res.status(), StatusCode::OK, "{peer} should be trusted");
    }
    let res = send(&app, Method::GET, "/api/cards", None, None, "10.2.0.1:1").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(&app, Method::GET, "/api/auth/status", None, None, "10.1.2.3:1").await;
    assert_eq!(json_body(res).await["method"], "whitelist");
}

#[tokio::test]
async fn test_forwarded_address_needs_proxy_trust() {
    async fn forwarded(app: &Router) -> Response {
        let req = Request::builder()
            .uri("/api/cards")
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        send_request(app, req, REMOTE).await
    }

    let (_dir, app) = app_with(secured(json!({ "trusted_ips": ["198.51.100.7"] }))).await;
    assert_eq!(forwarded(&app).await.status(), StatusCode::UNAUTHORIZED);

    let (_dir, app) = app_with(secured(json!({
        "trusted_ips": ["198.51.100.7"],
        "trust_proxy_headers": true
    })))
    .await;
    assert_eq!(forwarded(&app).await.status(), StatusCode::OK);
    let res = send(&app, Method::GET, "/api/cards", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_loopback_trust_can_be_disabled() {
    let (_dir, app) = app_with(secured(json!({ "trust_loopback": false }))).await;
    let res = send(&app, Method::GET, "/api/cards", None, None, LOOPBACK).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_security_headers() {
    let (_dir, app) = app_with(json!({})).await;
    let res = send(&app, Method::GET, "/api/v2/health", None, None, REMOTE).await;
    let headers = res.headers();
    assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
    assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
}

// ── Cards and world info ─────────────────────────────────────────────

/// Helper: create a card named `name` in `folder`, returning its id.
async fn create_card(app: &Router, folder: &str, name: &str) -> String {
    let res = send(
        app,
        Method::POST,
        "/api/cards",
        Some(json!({ "folder": folder, "card": { "spec": "chara_card_v2", "data": { "name": name } } })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    json_body(res).await["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn test_card_lifecycle() {
    let (dir, app) = app_with(json!({})).await;

    let card = json!({
        "spec": "chara_card_v2",
        "data": { "name": "Alice", "creator": "me", "tags": ["fantasy"] }
    });
    let res = send(
        &app,
        Method::POST,
        "/api/cards",
        Some(json!({ "folder": "heroes", "card": card })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = json_body(res).await["id"].as_str().unwrap().to_owned();
    assert_eq!(id, "heroes/Alice.json");
    assert!(dir.path().join("data/library/characters/heroes/Alice.json").is_file());

    let res = send(&app, Method::GET, &format!("/api/cards/file/{id}"), None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["summary"]["name"], "Alice");
    assert_eq!(body["summary"]["folder"], "heroes");

    let res = send(&app, Method::GET, "/api/cards?search=alice", None, None, REMOTE).await;
    let body = json_body(res).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["id"], id.as_str());

    let res = send(
        &app,
        Method::POST,
        "/api/cards/attributes",
        Some(json!({ "id": id, "add_tags": ["hero"], "favorite": true })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = send(&app, Method::GET, "/api/cards?favorites_only=true", None, None, REMOTE).await;
    assert_eq!(json_body(res).await["total"], 1);

    let res = send(&app, Method::DELETE, &format!("/api/cards/file/{id}"), None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = send(&app, Method::GET, &format!("/api/cards/file/{id}"), None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_card_path_traversal_is_rejected() {
    let (_dir, app) = app_with(json!({})).await;
    let res = send(
        &app,
        Method::GET,
        "/api/cards/file/..%2F..%2Fconfig.json",
        None,
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_reports_each_card() {
    let (_dir, app) = app_with(json!({})).await;
    let id = create_card(&app, "heroes", "Alice").await;

    let res = send(
        &app,
        Method::POST,
        "/api/cards/batch",
        Some(json!({ "ids": [id, "heroes/Nobody.json"], "plan": { "add_tags": ["batch"] } })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["results"][0]["outcome"]["tags_added"], json!(["batch"]));
    assert!(body["results"][1]["error"].is_string());

    let res = send(&app, Method::GET, &format!("/api/cards/file/{id}"), None, None, REMOTE).await;
    assert_eq!(json_body(res).await["summary"]["tags"], json!(["batch"]));

    let res = send(
        &app,
        Method::POST,
        "/api/cards/batch",
        Some(json!({ "ids": [], "plan": {} })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

// ── Resources ────────────────────────────────────────────────────────

const BOUNDARY: &str = "cardkeep-test-boundary";

/// Helper: a multipart upload of `bytes` as `file_name` for `card_id`.
fn upload_request(card_id: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"card_id\"\r\n\r\n{card_id}\r\n\
         --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Request::builder()
        .method(Method::POST)
        .uri("/api/upload_card_resource")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_resource_upload_routes_lorebooks_and_deduplicates() {
    let (dir, app) = app_with(json!({})).await;
    let id = create_card(&app, "heroes", "Alice").await;

    let res = send(
        &app,
        Method::POST,
        "/api/resources/folder",
        Some(json!({ "card_id": id })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["folder"], "Alice");
    let folder = dir.path().join("data/assets/card_assets/Alice");

    let book = br#"{"entries":{"0":{"key":["castle"],"content":"A keep."}}}"#;
    let res = send_request(&app, upload_request(&id, "book.json", book), REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        json_body(res).await,
        json!({ "filename": "book.json", "subdir": "lorebooks", "is_lorebook": true })
    );
    assert_eq!(std::fs::read(folder.join("lorebooks/book.json")).unwrap(), book);

    let res = send_request(&app, upload_request(&id, "book.json", book), REMOTE).await;
    assert_eq!(json_body(res).await["filename"], "book_1.json");
    assert!(folder.join("lorebooks/book_1.json").is_file());

    let res = send_request(&app, upload_request(&id, "notes.json", br#"{"a":1}"#), REMOTE).await;
    assert_eq!(
        json_body(res).await,
        json!({ "filename": "notes.json", "subdir": "", "is_lorebook": false })
    );
    assert!(folder.join("notes.json").is_file());

    let res = send(&app, Method::GET, &format!("/api/resources?card_id={id}"), None, None, REMOTE).await;
    let body = json_body(res).await;
    let names: Vec<&str> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["lorebooks/book.json", "lorebooks/book_1.json", "notes.json"]);

    let res = send(&app, Method::GET, "/resources_file/Alice/lorebooks/book.json", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, book);
    let res = send(&app, Method::GET, "/resources_file/Alice/missing.png", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = send(&app, Method::GET, "/resources_file/..%2F..%2Fconfig.json", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resource_delete_stays_inside_the_folder() {
    let (dir, app) = app_with(json!({})).await;
    let id = create_card(&app, "", "Bob").await;
    send(
        &app,
        Method::POST,
        "/api/resources/folder",
        Some(json!({ "card_id": id })),
        None,
        REMOTE,
    )
    .await;
    let res = send_request(&app, upload_request(&id, "pic.png", b"png"), REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);

    for bad in ["../../../config.json", "/etc/passwd", "..\\..\\config.json"] {
        let res = send(
            &app,
            Method::POST,
            "/api/delete_resource_file",
            Some(json!({ "card_id": id, "filename": bad })),
            None,
            REMOTE,
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{bad}");
    }
    assert!(dir.path().join("config.json").is_file());

    let res = send(
        &app,
        Method::POST,
        "/api/delete_resource_file",
        Some(json!({ "card_id": id, "filename": "pic.png" })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!dir.path().join("data/assets/card_assets/Bob/pic.png").exists());
}

#[tokio::test]
async fn test_card_file_serves_the_sidecar_image() {
    let (dir, app) = app_with(json!({})).await;
    let id = create_card(&app, "heroes", "Alice").await;
    std::fs::write(
        dir.path().join("data/library/characters/heroes/Alice.png"),
        b"\x89PNG fake",
    )
    .unwrap();

    let res = send(&app, Method::GET, &format!("/cards_file/{id}"), None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(body_bytes(res).await, b"\x89PNG fake");

    let res = send(&app, Method::GET, "/cards_file/heroes/Alice.png", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = send(&app, Method::GET, "/cards_file/heroes/Alice.txt", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = send(&app, Method::GET, "/cards_file/heroes/Nobody.json", None, None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_worldinfo_save_records_entry_history() {
    let (_dir, app) = app_with(json!({})).await;

    let res = send(
        &app,
        Method::POST,
        "/api/worldinfo",
        Some(json!({ "name": "Lore" })),
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = json_body(res).await["id"].as_str().unwrap().to_owned();

    let version = |content: &str| {
        json!({
            "name": "Lore",
            "entries": { "0": { "uid": 0, "st_manager_uid": "e1", "key": ["dragon"], "content": content } }
        })
    };
    let uri = format!("/api/worldinfo/file/{id}");
    let res = send(&app, Method::PUT, &uri, Some(version("old")), None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["history_recorded"], 0);

    let res = send(&app, Method::PUT, &uri, Some(version("new")), None, REMOTE).await;
    let body = json_body(res).await;
    assert_eq!(body["history_recorded"], 1);
    assert_eq!(body["summary"]["entry_count"], 1);

    let res = send(
        &app,
        Method::GET,
        &format!("/api/worldinfo/history?id={id}&uid=e1"),
        None,
        None,
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["snapshot"]["content"], "old");

    let res = send(&app, Method::GET, "/api/worldinfo?search=lore", None, None, REMOTE).await;
    assert_eq!(json_body(res).await["items"].as_array().unwrap().len(), 1);
}

// ── Settings ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_settings_hide_the_password() {
    let (_dir, app) = app_with(secured(json!({}))).await;
    let res = send(&app, Method::GET, "/api/settings", None, None, LOOPBACK).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert!(body["settings"]["auth"].get("password").is_none());
    assert_eq!(body["settings"]["auth"]["password_set"], true);
    assert_eq!(body["settings"]["auth"]["username"], "admin");
}

#[tokio::test]
async fn test_changing_credentials_ends_sessions() {
    let (dir, app) = app_with(secured(json!({}))).await;
    let cookie = login(&app).await;

    let res = send(
        &app,
        Method::POST,
        "/api/settings",
        Some(json!({ "auth": { "password": "correct horse" }, "page_size": 25 })),
        Some(&cookie),
        REMOTE,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["credentials_changed"], true);
    assert_eq!(body["settings"]["page_size"], 25);

    let res = send(&app, Method::GET, "/api/cards", None, Some(&cookie), REMOTE).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let saved: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("config.json")).unwrap()).unwrap();
    assert_eq!(saved["auth"]["password"], "correct horse");
}

// ── Backups ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_backup_trigger_and_list() {
    let (_dir, app) = app_with(json!({})).await;
    send(
        &app,
        Method::POST,
        "/api/cards",
        Some(json!({ "card": { "name": "Bob" } })),
        None,
        REMOTE,
    )
    .await;

    let res = send(&app, Method::POST, "/api/v2/backup/trigger", Some(json!({})), None, REMOTE).await;
    assert_eq!(res.status(), StatusCode::OK);
    let meta = json_body(res).await;
    assert_eq!(meta["file_count"], 1);
    assert_eq!(meta["incremental"], false);

    let res = send(&app, Method::GET, "/api/v2/backup/list", None, None, REMOTE).await;
    let body = json_body(res).await;
    let backups = body["backups"].as_array().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0]["id"], meta["id"]);

    let res = send(&app, Method::GET, "/api/v2/stats", None, None, REMOTE).await;
    assert_eq!(json_body(res).await["characters"], 1);
}

//! Integration tests for the journal HTTP surface
//!
//! Drives the full router the way a viewer and a producing process do:
//! - Health check
//! - Bearer-token guard on the command and shutdown endpoints
//! - Push via /api/command, then reads over the study/card/artifact routes
//! - Inbound event validation
//! - Export endpoints

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use fieldbook_server::api::server::build_router;
use fieldbook_server::config::Config;
use fieldbook_server::redact::RedactionConfig;
use fieldbook_server::ServerContext;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn test_context(dir: &Path) -> Arc<ServerContext> {
    let config = Config {
        data_dir: dir.to_path_buf(),
        port: 0,
        redaction: RedactionConfig::default(),
        default_timeout_secs: 5.0,
        preview_rows: 5,
    };
    Arc::new(ServerContext::new(config).unwrap())
}

fn setup(dir: &Path) -> (Router, Arc<ServerContext>) {
    let ctx = test_context(dir);
    (build_router(ctx.clone()), ctx)
}

async fn make_request(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Option<Value>) {
    let mut request = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = if let Some(json_body) = body {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap()
    } else {
        request.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json_body = serde_json::from_slice(&bytes).ok();
    (status, json_body)
}

/// Push one table through the guarded command endpoint, returning the card id
async fn push_table(app: &Router, token: &str, study: &str, title: &str) -> Value {
    let command = json!({
        "op": "push",
        "value": [
            {"site": "alpha", "n": 12},
            {"site": "beta", "n": 7},
        ],
        "study": study,
        "title": title,
    });
    let (status, body) = make_request(
        app,
        Method::POST,
        "/api/command",
        Some(command),
        Some(token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body.unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _ctx) = setup(dir.path());

    let (status, body) = make_request(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "fieldbook");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_command_requires_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    let command = json!({"op": "push", "value": "note", "study": "s1"});

    let (status, _) =
        make_request(&app, Method::POST, "/api/command", Some(command.clone()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/api/command",
        Some(command.clone()),
        Some("wrong-token"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/api/command",
        Some(command),
        Some(&ctx.api_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.unwrap()["card_id"].is_string());

    // Viewer routes stay open without a token
    let (status, _) = make_request(&app, Method::GET, "/api/studies", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_push_then_read_study_and_cards() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    push_table(&app, &ctx.api_token, "trial", "Site counts").await;

    let (status, body) = make_request(&app, Method::GET, "/api/studies", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let studies = body.unwrap();
    assert_eq!(studies[0]["label"], "trial");
    assert_eq!(studies[0]["card_count"], 1);

    let (status, body) =
        make_request(&app, Method::GET, "/api/studies/trial/cards", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let cards = body.unwrap();
    assert_eq!(cards.as_array().unwrap().len(), 1);
    assert_eq!(cards[0]["kind"], "table");
    assert_eq!(cards[0]["title"], "Site counts");

    let (status, body) =
        make_request(&app, Method::GET, "/api/studies/trial/summary", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["titles"][0], "Site counts");
}

#[tokio::test]
async fn test_artifact_page_stats_and_csv() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    push_table(&app, &ctx.api_token, "trial", "Site counts").await;

    let cards = ctx.list_cards("trial").await.unwrap();
    let artifact_id = cards[0].payload.artifact_id().unwrap();

    let (status, body) = make_request(
        &app,
        Method::GET,
        &format!("/api/artifacts/{}/page?offset=0&limit=1&sort=n", artifact_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = body.unwrap();
    assert_eq!(page["total_rows"], 2);
    assert_eq!(page["rows"][0]["n"], 7);

    let (status, body) = make_request(
        &app,
        Method::GET,
        &format!("/api/artifacts/{}/stats", artifact_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stats = body.unwrap();
    let n_stats = stats
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "n")
        .unwrap();
    assert_eq!(n_stats["min"], 7);
    assert_eq!(n_stats["max"], 12);

    // CSV body is not JSON; fetch it raw
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/artifacts/{}/csv", artifact_id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.starts_with("site,n\n"));
    assert!(csv.contains("alpha,12"));
}

#[tokio::test]
async fn test_unknown_ids_read_as_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _ctx) = setup(dir.path());
    let missing = uuid::Uuid::new_v4();

    for path in [
        format!("/api/artifacts/{}/page", missing),
        format!("/api/artifacts/{}/raw", missing),
        format!("/api/cards/{}/selection", missing),
        "/api/studies/absent/summary".to_string(),
    ] {
        let (status, body) = make_request(&app, Method::GET, &path, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "path {}", path);
        assert_eq!(body.unwrap()["error"], "not_found");
    }
}

#[tokio::test]
async fn test_event_roundtrip_and_validation() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    let pushed = push_table(&app, &ctx.api_token, "trial", "Site counts").await;
    let card_id = pushed["card_id"].as_str().unwrap().to_string();

    // A well-formed selection event lands in the tracker
    let event = json!({
        "type": "selection",
        "card_id": card_id,
        "state": {"mode": "rows", "items": [1]},
    });
    let (status, _) =
        make_request(&app, Method::POST, "/api/events", Some(event), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = make_request(
        &app,
        Method::GET,
        &format!("/api/cards/{}/selection", card_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["selection"]["state"]["items"][0], 1);

    // A malformed event is rejected without taking the server down
    let (status, _) = make_request(
        &app,
        Method::POST,
        "/api/events",
        Some(json!({"type": "no_such_event", "card_id": card_id})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = make_request(&app, Method::GET, "/api/studies", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_study_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    push_table(&app, &ctx.api_token, "doomed", "T").await;

    let (status, _) =
        make_request(&app, Method::DELETE, "/api/studies/doomed", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        make_request(&app, Method::GET, "/api/studies/doomed/cards", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_export_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    push_table(&app, &ctx.api_token, "trial", "Site counts").await;

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/studies/trial/export?format=html")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Site counts"));
    assert!(html.contains("alpha"));

    let (status, body) = make_request(
        &app,
        Method::GET,
        "/api/studies/trial/export?format=bundle",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["card_count"], 1);

    let (status, body) =
        make_request(&app, Method::GET, "/api/export?format=bundle", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap().as_array().unwrap().len(), 1);

    let (status, _) = make_request(
        &app,
        Method::GET,
        "/api/studies/trial/export?format=zip",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rename_study_over_command() {
    let dir = tempfile::tempdir().unwrap();
    let (app, ctx) = setup(dir.path());
    push_table(&app, &ctx.api_token, "draft", "T").await;

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/api/command",
        Some(json!({"op": "rename_study", "from": "draft", "to": "final"})),
        Some(&ctx.api_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        make_request(&app, Method::GET, "/api/studies", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()[0]["label"], "final");

    // Renaming onto an existing label conflicts
    push_table(&app, &ctx.api_token, "other", "T").await;
    let (status, body) = make_request(
        &app,
        Method::POST,
        "/api/command",
        Some(json!({"op": "rename_study", "from": "other", "to": "final"})),
        Some(&ctx.api_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.unwrap()["error"], "conflict");
}

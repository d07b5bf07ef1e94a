//! HTTP request handlers

use crate::api::{ApiError, ApiResult};
use crate::export::{self, ExportFormat};
use crate::state::ServerContext;
use crate::store::ColumnStats;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use fieldbook_common::api::{
    CommandRequest, PushResponse, SelectionResponse, StatusResponse,
};
use fieldbook_common::events::DisplayEvent;
use fieldbook_common::model::{CardDescriptor, StudyInfo, StudySummary};
use fieldbook_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub sort: Option<String>,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

fn default_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub offset: usize,
    pub limit: usize,
    pub total_rows: u64,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

// ============================================================================
// Health
// ============================================================================

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "fieldbook".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Studies
// ============================================================================

/// GET /api/studies
pub async fn list_studies(
    State(ctx): State<Arc<ServerContext>>,
) -> Json<Vec<StudyInfo>> {
    Json(ctx.studies.list().await)
}

/// DELETE /api/studies/:label
pub async fn delete_study(
    State(ctx): State<Arc<ServerContext>>,
    Path(label): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    ctx.delete_study(&label).await?;
    Ok(Json(StatusResponse::ok()))
}

/// GET /api/studies/:label/cards - card descriptors in display order
pub async fn list_cards(
    State(ctx): State<Arc<ServerContext>>,
    Path(label): Path<String>,
) -> ApiResult<Json<Vec<CardDescriptor>>> {
    let cards = ctx.list_cards(&label).await?;
    Ok(Json(cards.iter().map(CardDescriptor::from).collect()))
}

/// GET /api/studies/:label/summary - re-orientation summary
pub async fn study_summary(
    State(ctx): State<Arc<ServerContext>>,
    Path(label): Path<String>,
) -> ApiResult<Json<StudySummary>> {
    Ok(Json(ctx.summarize(&label).await?))
}

/// GET /api/studies/:label/export?format=html|bundle
pub async fn study_export(
    State(ctx): State<Arc<ServerContext>>,
    Path(label): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("html").parse()?;
    match format {
        ExportFormat::Html => {
            let html = export::export_html(&ctx, &label).await?;
            Ok(Html(html).into_response())
        }
        ExportFormat::Bundle => {
            let manifest = export::export_bundle(&ctx, &label).await?;
            Ok(Json(manifest).into_response())
        }
    }
}

/// GET /api/export?format=html|bundle - every study in one export
pub async fn export_all(
    State(ctx): State<Arc<ServerContext>>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("html").parse()?;
    match format {
        ExportFormat::Html => {
            let html = export::export_all_html(&ctx).await?;
            Ok(Html(html).into_response())
        }
        ExportFormat::Bundle => {
            let manifests = export::export_all_bundle(&ctx).await?;
            Ok(Json(manifests).into_response())
        }
    }
}

// ============================================================================
// Cards
// ============================================================================

/// GET /api/cards/:id/selection - current selection, non-blocking
pub async fn card_selection(
    State(ctx): State<Arc<ServerContext>>,
    Path(card_id): Path<Uuid>,
) -> ApiResult<Json<SelectionResponse>> {
    Ok(Json(SelectionResponse {
        selection: ctx.selection(card_id).await?,
    }))
}

// ============================================================================
// Artifacts
// ============================================================================

/// GET /api/artifacts/:id/page
pub async fn artifact_page(
    State(ctx): State<Arc<ServerContext>>,
    Path(artifact_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PageResponse>> {
    let store = ctx.locate_artifact(artifact_id).await?;
    let table = store.open_table(artifact_id)?;
    let rows = table.page(
        query.offset,
        query.limit,
        query.sort.as_deref(),
        query.ascending,
    )?;
    Ok(Json(PageResponse {
        offset: query.offset,
        limit: query.limit,
        total_rows: table.row_count(),
        rows,
    }))
}

/// GET /api/artifacts/:id/stats
pub async fn artifact_stats(
    State(ctx): State<Arc<ServerContext>>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ColumnStats>>> {
    let store = ctx.locate_artifact(artifact_id).await?;
    Ok(Json(store.read_stats(artifact_id)?))
}

/// GET /api/artifacts/:id/csv
pub async fn artifact_csv(
    State(ctx): State<Arc<ServerContext>>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Response> {
    let store = ctx.locate_artifact(artifact_id).await?;
    let csv = store.read_csv(artifact_id)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", artifact_id),
            ),
        ],
        csv,
    )
        .into_response())
}

/// GET /api/artifacts/:id/raw
pub async fn artifact_raw(
    State(ctx): State<Arc<ServerContext>>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Response> {
    let store = ctx.locate_artifact(artifact_id).await?;
    let bytes = store.read_raw(artifact_id)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

// ============================================================================
// Inbound events
// ============================================================================

/// POST /api/events - one inbound viewer event
///
/// Malformed messages are rejected with a logged warning; the stream and
/// the server stay up either way.
pub async fn post_event(
    State(ctx): State<Arc<ServerContext>>,
    Json(raw): Json<serde_json::Value>,
) -> ApiResult<Json<StatusResponse>> {
    let event: DisplayEvent = match serde_json::from_value(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping malformed display event: {}", e);
            return Err(ApiError(Error::InvalidInput(format!(
                "unrecognized event: {}",
                e
            ))));
        }
    };
    if let Err(e) = ctx.handle_display_event(event).await {
        warn!("Dropping display event: {}", e);
        return Err(ApiError(e));
    }
    Ok(Json(StatusResponse::ok()))
}

// ============================================================================
// Producing-process surface (bearer-token guarded)
// ============================================================================

/// POST /api/command
pub async fn post_command(
    State(ctx): State<Arc<ServerContext>>,
    Json(command): Json<CommandRequest>,
) -> ApiResult<Response> {
    match command {
        CommandRequest::Push(request) => {
            let response: PushResponse = ctx.push(request).await?;
            Ok(Json(response).into_response())
        }
        CommandRequest::RenameStudy { from, to } => {
            ctx.rename_study(&from, &to).await?;
            Ok(Json(StatusResponse::ok()).into_response())
        }
        CommandRequest::RegisterOutputDir { study, path } => {
            ctx.register_output_dir(&study, path).await?;
            Ok(Json(StatusResponse::ok()).into_response())
        }
    }
}

/// POST /api/shutdown
pub async fn post_shutdown(
    State(ctx): State<Arc<ServerContext>>,
) -> Json<StatusResponse> {
    info!("Shutdown requested via API");
    ctx.request_shutdown();
    Json(StatusResponse::ok())
}

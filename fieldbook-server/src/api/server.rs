//! HTTP server setup and routing
//!
//! Binds loopback only: the journal is a local, single-reviewer surface.

use crate::api::{auth, handlers, sse};
use crate::state::ServerContext;
use axum::response::Html;
use axum::routing::{delete, get, post};
use axum::Router;
use fieldbook_common::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Embedded single-file browser viewer
const VIEWER_HTML: &str = include_str!("viewer.html");

/// Build the full application router
pub fn build_router(ctx: Arc<ServerContext>) -> Router {
    let token_layer = auth::TokenLayer {
        token: ctx.api_token.clone(),
    };

    Router::new()
        // Browser viewer
        .route("/", get(|| async { Html(VIEWER_HTML) }))
        // Health
        .route("/api/health", get(handlers::health))
        // Event channel: SSE replay + live out, viewer events in
        .route(
            "/api/events",
            get(sse::event_stream).post(handlers::post_event),
        )
        // Studies
        .route("/api/studies", get(handlers::list_studies))
        .route("/api/studies/:label", delete(handlers::delete_study))
        .route("/api/studies/:label/cards", get(handlers::list_cards))
        .route("/api/studies/:label/summary", get(handlers::study_summary))
        .route("/api/studies/:label/export", get(handlers::study_export))
        .route("/api/export", get(handlers::export_all))
        // Cards
        .route("/api/cards/:id/selection", get(handlers::card_selection))
        // Artifacts
        .route("/api/artifacts/:id/page", get(handlers::artifact_page))
        .route("/api/artifacts/:id/stats", get(handlers::artifact_stats))
        .route("/api/artifacts/:id/csv", get(handlers::artifact_csv))
        .route("/api/artifacts/:id/raw", get(handlers::artifact_raw))
        // Producing-process surface
        .route("/api/command", post(handlers::post_command))
        .route("/api/shutdown", post(handlers::post_shutdown))
        .with_state(ctx)
        // Bearer token for the command/shutdown endpoints
        .layer(token_layer)
        // Local cross-origin access (notebook frontends)
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server until a signal or the shutdown endpoint stops it
pub async fn serve(ctx: Arc<ServerContext>) -> Result<()> {
    let app = build_router(ctx.clone());
    let addr = SocketAddr::from(([127, 0, 0, 1], ctx.config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ctx))
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C, SIGTERM, or the shutdown endpoint
async fn shutdown_signal(ctx: Arc<ServerContext>) {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
        _ = ctx.shutdown_requested() => {
            info!("Shutdown endpoint triggered, shutting down");
        },
    }
}

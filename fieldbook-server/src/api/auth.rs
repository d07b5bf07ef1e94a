//! Bearer-token guard for the producing-process endpoints
//!
//! The command and shutdown endpoints accept `Authorization: Bearer <token>`.
//! The token is generated on first start and stored under the data
//! directory, where local producing processes read it; the viewer endpoints
//! stay open since the server binds loopback only.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fieldbook_common::api::ErrorResponse;
use fieldbook_common::Result;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{info, warn};

const TOKEN_LEN: usize = 40;

/// Paths that require the bearer token
const GUARDED_PATHS: &[&str] = &["/api/command", "/api/shutdown"];

/// Read the API token, generating and persisting one on first start
pub fn load_or_create_token(path: &Path) -> Result<String> {
    if path.exists() {
        let token = std::fs::read_to_string(path)?.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &token)?;
    info!("Generated new API token at {}", path.display());
    Ok(token)
}

/// Tower layer enforcing the bearer token on guarded paths
#[derive(Clone)]
pub struct TokenLayer {
    pub token: String,
}

impl<S> Layer<S> for TokenLayer {
    type Service = TokenGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenGuard {
            inner,
            token: self.token.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TokenGuard<S> {
    inner: S,
    token: String,
}

impl<S> Service<Request<Body>> for TokenGuard<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let token = self.token.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !GUARDED_PATHS.contains(&request.uri().path()) {
                return inner.call(request).await;
            }

            let provided = request
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));

            match provided {
                Some(candidate) if candidate == token => inner.call(request).await,
                _ => {
                    warn!(
                        "Rejected unauthenticated request to {}",
                        request.uri().path()
                    );
                    Ok((
                        StatusCode::UNAUTHORIZED,
                        Json(ErrorResponse::new(
                            "unauthorized",
                            "Missing or invalid bearer token",
                        )),
                    )
                        .into_response())
                }
            }
        })
    }
}

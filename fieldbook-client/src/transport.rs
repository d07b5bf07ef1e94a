//! Transport strategies for the producing-code API
//!
//! The server may sit in the same process (shared memory, direct calls) or
//! behind a local loopback port (every push becomes an HTTP round trip).
//! Both are implementations of one `Transport` trait, so the blocking
//! `wait` semantics and the error taxonomy are identical either way.

use async_trait::async_trait;
use fieldbook_common::api::{
    CommandRequest, ErrorResponse, PushRequest, PushResponse, SelectionResponse,
    StatusResponse,
};
use fieldbook_common::model::{Selection, StudySummary};
use fieldbook_common::{Error, Result};
use fieldbook_server::ServerContext;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, request: PushRequest) -> Result<PushResponse>;
    async fn selection(&self, card_id: Uuid) -> Result<Option<Selection>>;
    async fn summary(&self, study: &str) -> Result<StudySummary>;
    async fn rename_study(&self, from: &str, to: &str) -> Result<()>;
    async fn register_output_dir(&self, study: &str, path: &Path) -> Result<()>;
}

// ----------------------------------------------------------------------
// In-process
// ----------------------------------------------------------------------

/// Direct calls against a shared `ServerContext`
pub struct InProcessTransport {
    ctx: Arc<ServerContext>,
}

impl InProcessTransport {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        self.ctx.push(request).await
    }

    async fn selection(&self, card_id: Uuid) -> Result<Option<Selection>> {
        self.ctx.selection(card_id).await
    }

    async fn summary(&self, study: &str) -> Result<StudySummary> {
        self.ctx.summarize(study).await
    }

    async fn rename_study(&self, from: &str, to: &str) -> Result<()> {
        self.ctx.rename_study(from, to).await
    }

    async fn register_output_dir(&self, study: &str, path: &Path) -> Result<()> {
        self.ctx
            .register_output_dir(study, path.to_path_buf())
            .await
    }
}

// ----------------------------------------------------------------------
// Loopback HTTP
// ----------------------------------------------------------------------

/// HTTP round trips to a server on the local loopback interface
///
/// The client is built without a request timeout: a `wait=true` push holds
/// its connection open until the decision card freezes, and the server's
/// own decision timeout bounds that wait.
pub struct LoopbackTransport {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl LoopbackTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn command(&self, command: &CommandRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/command", self.base_url);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(command)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        check(response).await
    }
}

/// Map an error-status response back onto the common error taxonomy
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .json::<ErrorResponse>()
        .await
        .unwrap_or_else(|_| ErrorResponse::new("http", format!("status {}", status)));
    Err(match body.error.as_str() {
        "not_found" => Error::NotFound(body.message),
        "invalid_input" => Error::InvalidInput(body.message),
        "conflict" => Error::Conflict(body.message),
        _ => Error::Http(format!("{} ({})", body.message, status)),
    })
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        let response = self.command(&CommandRequest::Push(request)).await?;
        response
            .json::<PushResponse>()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn selection(&self, card_id: Uuid) -> Result<Option<Selection>> {
        let url = format!("{}/api/cards/{}/selection", self.base_url, card_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let body = check(response)
            .await?
            .json::<SelectionResponse>()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(body.selection)
    }

    async fn summary(&self, study: &str) -> Result<StudySummary> {
        let url = format!("{}/api/studies/{}/summary", self.base_url, study);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        check(response)
            .await?
            .json::<StudySummary>()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn rename_study(&self, from: &str, to: &str) -> Result<()> {
        let response = self
            .command(&CommandRequest::RenameStudy {
                from: from.to_string(),
                to: to.to_string(),
            })
            .await?;
        response
            .json::<StatusResponse>()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(())
    }

    async fn register_output_dir(&self, study: &str, path: &Path) -> Result<()> {
        let response = self
            .command(&CommandRequest::RegisterOutputDir {
                study: study.to_string(),
                path: path.to_path_buf(),
            })
            .await?;
        response
            .json::<StatusResponse>()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(())
    }
}

//! Request/response types for the command surface
//!
//! The push contract is identical for both transports: in-process callers
//! build a `PushRequest` directly, out-of-process callers POST it to the
//! bearer-token-guarded `/api/command` endpoint.

use crate::model::{ActionSpec, ResponseRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A push of one displayable value into a study
///
/// `value` is an arbitrary JSON value; the server's ordered payload adapters
/// decide how it renders. With `wait: true` the call blocks until the
/// decision card freezes (reviewer response or timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Study label; a new label creates the study implicitly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study: Option<String>,
    /// Source expression recorded as provenance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Active dataset name recorded as provenance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// Card id to update in place instead of appending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<Uuid>,
    /// Insertion index into the study's display order (append if absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Block until the decision card freezes
    #[serde(default)]
    pub wait: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Decision timeout in seconds (server default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSpec>,
}

impl PushRequest {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            title: None,
            description: None,
            study: None,
            source: None,
            dataset: None,
            replace: None,
            position: None,
            wait: false,
            prompt: None,
            timeout_secs: None,
            actions: Vec::new(),
        }
    }
}

/// Result of a push: the card id, plus the frozen response for `wait` pushes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub card_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
}

/// Producing-process commands accepted on `/api/command`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CommandRequest {
    Push(PushRequest),
    RenameStudy { from: String, to: String },
    RegisterOutputDir { study: String, path: PathBuf },
}

/// Current selection for a card, as returned by the selection endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub selection: Option<crate::model::Selection>,
}

/// Generic success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

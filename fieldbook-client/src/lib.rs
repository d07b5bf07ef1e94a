//! # Fieldbook Client
//!
//! The producing-code-facing API. A `Journal` pushes displayable values
//! into a study and optionally blocks on decision cards; the same calls
//! work whether the journal server runs in this process or behind a local
//! loopback port (see `transport`).
//!
//! ```rust,ignore
//! let journal = Journal::in_process(ctx).with_study("cohort-v2");
//! journal.show(json!([{"arm": "a", "n": 12}]), "Enrollment").await?;
//! let response = journal
//!     .decide(json!(null), "Proceed to the adjusted model?", 600.0)
//!     .await?;
//! if response.action == "skip" { /* reviewer was away */ }
//! ```

pub mod transport;

use fieldbook_common::api::{PushRequest, PushResponse};
use fieldbook_common::model::{ActionSpec, ResponseRecord, Selection, StudySummary};
use fieldbook_common::Result;
use fieldbook_server::ServerContext;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub use transport::{InProcessTransport, LoopbackTransport, Transport};

const DEFAULT_STUDY: &str = "default";

/// Handle for pushing cards into one study
#[derive(Clone)]
pub struct Journal {
    transport: Arc<dyn Transport>,
    study: String,
}

impl Journal {
    /// Journal sharing the server's process and memory
    pub fn in_process(ctx: Arc<ServerContext>) -> Journal {
        Journal {
            transport: Arc::new(InProcessTransport::new(ctx)),
            study: DEFAULT_STUDY.to_string(),
        }
    }

    /// Journal reaching a server over local loopback HTTP
    pub fn connect(base_url: impl Into<String>, token: impl Into<String>) -> Journal {
        Journal {
            transport: Arc::new(LoopbackTransport::new(base_url, token)),
            study: DEFAULT_STUDY.to_string(),
        }
    }

    /// Same transport, different study label
    pub fn with_study(mut self, label: impl Into<String>) -> Journal {
        self.study = label.into();
        self
    }

    pub fn study(&self) -> &str {
        &self.study
    }

    /// Send a fully specified push; the journal's study label fills in when
    /// the request carries none
    pub async fn push_request(&self, mut request: PushRequest) -> Result<PushResponse> {
        if request.study.is_none() {
            request.study = Some(self.study.clone());
        }
        self.transport.push(request).await
    }

    /// Fire-and-forget push of a displayable value
    pub async fn push(&self, value: serde_json::Value) -> Result<Uuid> {
        let response = self.push_request(PushRequest::new(value)).await?;
        Ok(response.card_id)
    }

    /// Push with a title
    pub async fn show(
        &self,
        value: serde_json::Value,
        title: impl Into<String>,
    ) -> Result<Uuid> {
        let mut request = PushRequest::new(value);
        request.title = Some(title.into());
        Ok(self.push_request(request).await?.card_id)
    }

    /// Replace an existing card's content in place
    pub async fn replace(
        &self,
        card_id: Uuid,
        value: serde_json::Value,
    ) -> Result<Uuid> {
        let mut request = PushRequest::new(value);
        request.replace = Some(card_id);
        Ok(self.push_request(request).await?.card_id)
    }

    /// Push a decision card and block until it freezes
    ///
    /// Returns the committed response: the reviewer's chosen action, or
    /// `"skip"` when `timeout_secs` elapses first.
    pub async fn decide(
        &self,
        value: serde_json::Value,
        prompt: impl Into<String>,
        timeout_secs: f64,
    ) -> Result<ResponseRecord> {
        self.decide_with_actions(value, prompt, &[], timeout_secs)
            .await
    }

    /// `decide` with named actions offered to the reviewer
    pub async fn decide_with_actions(
        &self,
        value: serde_json::Value,
        prompt: impl Into<String>,
        actions: &[&str],
        timeout_secs: f64,
    ) -> Result<ResponseRecord> {
        let mut request = PushRequest::new(value);
        request.wait = true;
        request.prompt = Some(prompt.into());
        request.timeout_secs = Some(timeout_secs);
        request.actions = actions.iter().map(|a| ActionSpec::new(*a)).collect();
        let pushed = self.push_request(request).await?;
        pushed.response.ok_or_else(|| {
            fieldbook_common::Error::Internal(
                "wait push returned without a response".to_string(),
            )
        })
    }

    /// Current reviewer selection on a card, non-blocking
    pub async fn selection(&self, card_id: Uuid) -> Result<Option<Selection>> {
        self.transport.selection(card_id).await
    }

    /// Re-orientation summary of this journal's study
    pub async fn summary(&self) -> Result<StudySummary> {
        self.transport.summary(&self.study).await
    }

    /// Rename a study, keeping its cards and artifacts
    pub async fn rename_study(&self, from: &str, to: &str) -> Result<()> {
        self.transport.rename_study(from, to).await
    }

    /// Register the directory where this process writes file artifacts
    pub async fn register_output_dir(&self, path: &Path) -> Result<()> {
        self.transport.register_output_dir(&self.study, path).await
    }
}
